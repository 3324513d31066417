//! Per-document metadata carried through the index into responses

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field names with a dedicated slot; `extra` must not reuse them
pub const WELL_KNOWN_KEYS: &[&str] = &["record_id", "record_name", "source_file", "data_type"];

/// Longest value accepted in `extra`, in chars
pub const MAX_EXTRA_VALUE_CHARS: usize = 4096;

/// Metadata attached to an index entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,

    /// Record attributes rendered as text
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl DocumentMetadata {
    /// Check the open part of the metadata before it is trusted
    pub fn validate(&self) -> Result<(), String> {
        for (key, value) in &self.extra {
            if key.is_empty() {
                return Err("metadata key must not be empty".to_string());
            }
            if WELL_KNOWN_KEYS.contains(&key.as_str()) {
                return Err(format!("metadata key `{}` shadows a well-known field", key));
            }
            if !key.chars().all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ')) {
                return Err(format!("metadata key `{}` contains unsupported characters", key));
            }
            if value.chars().count() > MAX_EXTRA_VALUE_CHARS {
                return Err(format!("metadata value for `{}` is too long", key));
            }
        }
        if matches!(&self.record_name, Some(name) if name.trim().is_empty()) {
            return Err("record_name must not be blank".to_string());
        }
        Ok(())
    }

    /// Name for display: record name, then record id
    pub fn label(&self) -> Option<&str> {
        self.record_name.as_deref().or(self.record_id.as_deref())
    }
}
