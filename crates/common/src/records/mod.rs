//! Record Store - normalized records from the static snapshot
//!
//! The snapshot is a directory of JSON files (`spacecrafts.json`,
//! `launchers.json`, `customer_satellites.json`, `centres.json`, ...).
//! Each file holds either a list of records or an object wrapping one.
//! The file stem becomes the record's data type.

use crate::errors::{AppError, Result};
use crate::index::{DocumentMetadata, MAX_EXTRA_VALUE_CHARS, WELL_KNOWN_KEYS};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Date layouts seen in the snapshot
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y"];

/// Keys consumed into dedicated record fields
const RESERVED_KEYS: &[&str] = &["id", "name", "description"];

/// Unique record identifier: `{data_type}:{source id}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(data_type: &str, source_id: &str) -> Self {
        Self(format!("{}:{}", data_type, source_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Kind of domain entity, derived from the source file stem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Spacecraft,
    Launcher,
    CustomerSatellite,
    Centre,
    Other(String),
}

impl RecordKind {
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type {
            "spacecrafts" | "spacecraft" => RecordKind::Spacecraft,
            "launchers" | "launcher" => RecordKind::Launcher,
            "customer_satellites" | "customer_satellite" => RecordKind::CustomerSatellite,
            "centres" | "centers" | "centre" => RecordKind::Centre,
            other => RecordKind::Other(other.to_string()),
        }
    }

    /// Human label used in the rendered record text
    pub fn label(&self) -> &str {
        match self {
            RecordKind::Spacecraft => "Spacecraft",
            RecordKind::Launcher => "Launcher",
            RecordKind::CustomerSatellite => "Customer Satellite",
            RecordKind::Centre => "ISRO Centre",
            RecordKind::Other(name) => name.as_str(),
        }
    }
}

/// Typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Attribute {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl Attribute {
    /// Convert a raw JSON value. Nulls and blank strings carry no information.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Attribute::Boolean(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Attribute::Integer(i)),
                None => n.as_f64().map(Attribute::Float),
            },
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return None;
                }
                Some(parse_date(s).map(Attribute::Date).unwrap_or_else(|| Attribute::Text(s.to_string())))
            }
            Value::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .filter_map(Attribute::from_json)
                    .map(|a| a.to_string())
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(Attribute::Text(parts.join(", ")))
                }
            }
            Value::Object(_) => Some(Attribute::Text(value.to_string())),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Boolean(b) => write!(f, "{}", if *b { "yes" } else { "no" }),
            Attribute::Integer(i) => write!(f, "{}", i),
            Attribute::Float(x) => write!(f, "{}", x),
            Attribute::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Attribute::Text(s) => f.write_str(s),
        }
    }
}

/// Attribute names as accepted by `DocumentMetadata::validate`
fn metadata_key(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ') { c } else { '_' })
        .collect();
    if cleaned.is_empty() || WELL_KNOWN_KEYS.contains(&cleaned.as_str()) {
        format!("field_{}", cleaned)
    } else {
        cleaned
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

/// A normalized domain record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier within the store
    pub id: RecordId,

    /// Identifier as it appears in the source file
    pub source_id: String,

    pub kind: RecordKind,

    /// Source file stem, e.g. `spacecrafts`
    pub data_type: String,

    pub name: String,

    pub description: String,

    pub attributes: BTreeMap<String, Attribute>,

    /// File the record was loaded from
    pub source_file: String,
}

impl Record {
    /// Build a record from one JSON object of a snapshot file
    pub fn from_json(
        object: &serde_json::Map<String, Value>,
        position: usize,
        data_type: &str,
        source_file: &str,
    ) -> Self {
        let source_id = match object.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => position.to_string(),
        };

        let text_field = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        let attributes = object
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .filter_map(|(key, value)| Attribute::from_json(value).map(|a| (key.clone(), a)))
            .collect();

        Self {
            id: RecordId::new(data_type, &source_id),
            source_id,
            kind: RecordKind::from_data_type(data_type),
            data_type: data_type.to_string(),
            name: text_field("name"),
            description: text_field("description"),
            attributes,
            source_file: source_file.to_string(),
        }
    }

    /// Whether anything besides the kind label would be rendered
    pub fn has_text(&self) -> bool {
        !self.name.is_empty() || !self.description.is_empty() || !self.attributes.is_empty()
    }

    /// Name for display, falling back to the identifier
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            self.id.as_str()
        } else {
            &self.name
        }
    }

    /// Text fed to the chunker: header line, description, one line per attribute.
    /// Empty when the record has no extractable text.
    pub fn render_text(&self) -> String {
        if !self.has_text() {
            return String::new();
        }

        let mut text = format!("{}: {}\n", self.kind.label(), self.display_name());
        if !self.description.is_empty() {
            text.push_str(&self.description);
            text.push('\n');
        }
        for (key, value) in &self.attributes {
            text.push_str(&format!("{}: {}\n", key.replace('_', " "), value));
        }
        text
    }

    /// Metadata attached to every index entry of this record
    pub fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata {
            record_id: Some(self.id.to_string()),
            record_name: Some(self.display_name().to_string()),
            source_file: Some(self.source_file.clone()),
            data_type: Some(self.data_type.clone()),
            extra: self.metadata_extra(),
        }
    }

    /// Attributes under sanitized keys. Keys that collide after sanitizing get
    /// a numeric suffix and long values are cut to the metadata limit.
    fn metadata_extra(&self) -> BTreeMap<String, String> {
        let mut extra = BTreeMap::new();
        for (key, value) in &self.attributes {
            let base = metadata_key(key);
            let mut key = base.clone();
            let mut n = 2;
            while extra.contains_key(&key) {
                key = format!("{}_{}", base, n);
                n += 1;
            }

            let mut value = value.to_string();
            if let Some((cut, _)) = value.char_indices().nth(MAX_EXTRA_VALUE_CHARS) {
                debug!(record_id = %self.id, field = %key, "Truncating long attribute value");
                value.truncate(cut);
            }
            extra.insert(key, value);
        }
        extra
    }
}

/// Immutable collection of records loaded from one snapshot
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<Record>,
    by_id: HashMap<RecordId, usize>,
    content_hash: String,
    source_files: Vec<String>,
}

impl RecordStore {
    /// Load every `*.json` file of the snapshot directory
    pub async fn load(dir: &Path) -> Result<Self> {
        let files = read_snapshot_files(dir).await?;
        let store = Self::from_documents(&files)?;

        info!(
            dir = %dir.display(),
            files = store.source_files.len(),
            records = store.len(),
            content_hash = %store.content_hash,
            "Record snapshot loaded"
        );

        Ok(store)
    }

    /// Parse `(file name, contents)` pairs
    pub fn from_documents(files: &[(String, String)]) -> Result<Self> {
        let mut records = Vec::new();
        let mut source_files = Vec::with_capacity(files.len());

        for (file_name, contents) in files {
            let data_type = Path::new(file_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(file_name)
                .to_string();

            let parsed: Value = serde_json::from_str(contents).map_err(|e| AppError::IndexBuild {
                message: format!("snapshot file {} is not valid JSON: {}", file_name, e),
                record_id: None,
            })?;

            let items = match extract_record_list(&parsed) {
                Some(items) => items,
                None => {
                    warn!(file = %file_name, "Snapshot file holds no record list, skipping");
                    source_files.push(file_name.clone());
                    continue;
                }
            };

            let before = records.len();
            for (position, item) in items.iter().enumerate() {
                match item.as_object() {
                    Some(object) => records.push(Record::from_json(object, position, &data_type, file_name)),
                    None => warn!(file = %file_name, position, "Skipping non-object snapshot entry"),
                }
            }

            debug!(file = %file_name, records = records.len() - before, "Snapshot file parsed");
            source_files.push(file_name.clone());
        }

        let mut store = Self::from_records(records, content_hash(files))?;
        store.source_files = source_files;
        Ok(store)
    }

    /// Assemble a store from already-built records
    pub fn from_records(records: Vec<Record>, content_hash: String) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(records.len());
        let mut source_files: Vec<String> = Vec::new();

        for (i, record) in records.iter().enumerate() {
            if by_id.insert(record.id.clone(), i).is_some() {
                return Err(AppError::IndexBuild {
                    message: format!("duplicate record id {} in {}", record.id, record.source_file),
                    record_id: Some(record.id.to_string()),
                });
            }
            if !source_files.contains(&record.source_file) {
                source_files.push(record.source_file.clone());
            }
        }

        Ok(Self {
            records,
            by_id,
            content_hash,
            source_files,
        })
    }

    /// Lookup by identifier
    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.by_id.get(id).map(|&i| &self.records[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// SHA-256 over the snapshot files this store was built from
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn source_files(&self) -> &[String] {
        &self.source_files
    }
}

/// Hash the snapshot directory without parsing it
pub async fn snapshot_hash(dir: &Path) -> Result<String> {
    let files = read_snapshot_files(dir).await?;
    Ok(content_hash(&files))
}

async fn read_snapshot_files(dir: &Path) -> Result<Vec<(String, String)>> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| AppError::IndexBuild {
        message: format!("cannot read snapshot directory {}: {}", dir.display(), e),
        record_id: None,
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| AppError::IndexBuild {
        message: format!("cannot list snapshot directory {}: {}", dir.display(), e),
        record_id: None,
    })? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| AppError::IndexBuild {
            message: format!("cannot read snapshot file {}: {}", file_name, e),
            record_id: None,
        })?;
        files.push((file_name, contents));
    }

    // Directory order is platform dependent
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn extract_record_list(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        // e.g. {"spacecrafts": [...]}
        Value::Object(map) => map.values().find_map(Value::as_array),
        _ => None,
    }
}

fn content_hash(files: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = files.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (name, contents) in sorted {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(contents.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, contents: &str) -> (String, String) {
        (name.to_string(), contents.to_string())
    }

    #[test]
    fn test_parses_list_and_wrapped_files() {
        let files = vec![
            doc("spacecrafts.json", r#"[{"id": 1, "name": "Aryabhata"}, {"id": 2, "name": "Bhaskara-I"}]"#),
            doc("centres.json", r#"{"centres": [{"id": 1, "name": "Satish Dhawan Space Centre", "Place": "Sriharikota", "State": "Andhra Pradesh"}]}"#),
        ];

        let store = RecordStore::from_documents(&files).unwrap();
        assert_eq!(store.len(), 3);

        let centre = store.get(&RecordId::from("centres:1")).unwrap();
        assert_eq!(centre.kind, RecordKind::Centre);
        assert_eq!(centre.attributes.get("Place"), Some(&Attribute::Text("Sriharikota".into())));
        assert!(store.get(&RecordId::from("spacecrafts:2")).is_some());
    }

    #[test]
    fn test_typed_attributes() {
        let files = vec![doc(
            "customer_satellites.json",
            r#"[{"id": "DLR-TUBSAT", "country": "Germany", "launch_date": "26-05-1999", "mass": "45 kg", "orbit_km": 720, "eccentricity": 0.001, "active": false, "launcher": null}]"#,
        )];

        let store = RecordStore::from_documents(&files).unwrap();
        let record = store.get(&RecordId::from("customer_satellites:DLR-TUBSAT")).unwrap();

        assert_eq!(
            record.attributes.get("launch_date"),
            Some(&Attribute::Date(NaiveDate::from_ymd_opt(1999, 5, 26).unwrap()))
        );
        assert_eq!(record.attributes.get("orbit_km"), Some(&Attribute::Integer(720)));
        assert_eq!(record.attributes.get("eccentricity"), Some(&Attribute::Float(0.001)));
        assert_eq!(record.attributes.get("active"), Some(&Attribute::Boolean(false)));
        assert!(!record.attributes.contains_key("launcher"));
        assert_eq!(record.kind, RecordKind::CustomerSatellite);
    }

    #[test]
    fn test_missing_id_uses_position() {
        let files = vec![doc("launchers.json", r#"[{"name": "PSLV"}, {"name": "GSLV"}]"#)];
        let store = RecordStore::from_documents(&files).unwrap();
        assert_eq!(store.get(&RecordId::from("launchers:1")).unwrap().name, "GSLV");
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let files = vec![doc("launchers.json", r#"[{"id": "PSLV"}, {"id": "PSLV"}]"#)];
        let err = RecordStore::from_documents(&files).unwrap_err();
        assert!(matches!(err, AppError::IndexBuild { record_id: Some(_), .. }));
    }

    #[test]
    fn test_invalid_json_is_an_index_build_error() {
        let files = vec![doc("spacecrafts.json", "[{")];
        assert!(matches!(
            RecordStore::from_documents(&files),
            Err(AppError::IndexBuild { .. })
        ));
    }

    #[test]
    fn test_render_text() {
        let files = vec![doc(
            "spacecrafts.json",
            r#"[{"id": 123, "name": "Chandrayaan-3", "description": "Third lunar mission.", "launch_date": "2023-07-14"}]"#,
        )];
        let store = RecordStore::from_documents(&files).unwrap();
        let text = store.iter().next().unwrap().render_text();

        assert_eq!(text, "Spacecraft: Chandrayaan-3\nThird lunar mission.\nlaunch date: 2023-07-14\n");
    }

    #[test]
    fn test_metadata_keys_are_valid() {
        let files = vec![doc(
            "launchers.json",
            r#"[{"id": "PSLV", "name": "PSLV", "Payload (kg)": 1750, "source_file": "x"}]"#,
        )];
        let store = RecordStore::from_documents(&files).unwrap();
        let metadata = store.iter().next().unwrap().metadata();

        assert!(metadata.validate().is_ok());
        assert_eq!(metadata.extra.get("Payload _kg_").map(String::as_str), Some("1750"));
        assert_eq!(metadata.extra.get("field_source_file").map(String::as_str), Some("x"));
        assert_eq!(metadata.source_file.as_deref(), Some("launchers.json"));
    }

    #[test]
    fn test_colliding_metadata_keys_are_kept() {
        let files = vec![doc(
            "launchers.json",
            r#"[{"id": "PSLV", "name": "PSLV", "Payload (kg)": 1750, "Payload [kg]": 3800}]"#,
        )];
        let store = RecordStore::from_documents(&files).unwrap();
        let metadata = store.iter().next().unwrap().metadata();

        assert!(metadata.validate().is_ok());
        assert_eq!(metadata.extra.len(), 2);
        assert_eq!(metadata.extra.get("Payload _kg_").map(String::as_str), Some("1750"));
        assert_eq!(metadata.extra.get("Payload _kg__2").map(String::as_str), Some("3800"));
    }

    #[test]
    fn test_long_attribute_is_truncated_in_metadata() {
        let long = "ऋ".repeat(MAX_EXTRA_VALUE_CHARS + 904);
        let files = vec![doc(
            "spacecrafts.json",
            &format!(r#"[{{"id": 1, "name": "Aditya-L1", "mission_notes": "{}"}}]"#, long),
        )];
        let store = RecordStore::from_documents(&files).unwrap();
        let record = store.iter().next().unwrap();
        let metadata = record.metadata();

        assert!(metadata.validate().is_ok());
        let value = metadata.extra.get("mission_notes").unwrap();
        assert_eq!(value.chars().count(), MAX_EXTRA_VALUE_CHARS);
        // The rendered text keeps the full value
        assert!(record.render_text().contains(&long));
    }

    #[test]
    fn test_record_without_text_renders_empty() {
        let files = vec![doc("centres.json", r#"[{"id": 9}]"#)];
        let store = RecordStore::from_documents(&files).unwrap();
        let record = store.iter().next().unwrap();
        assert!(!record.has_text());
        assert!(record.render_text().is_empty());
    }

    #[test]
    fn test_content_hash_is_order_independent() {
        let a = doc("a.json", "[]");
        let b = doc("b.json", "[]");
        assert_eq!(content_hash(&[a.clone(), b.clone()]), content_hash(&[b, a.clone()]));
        assert_ne!(content_hash(&[a]), content_hash(&[doc("a.json", "[ ]")]));
    }

    #[tokio::test]
    async fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("launchers.json"), r#"[{"id": "PSLV", "name": "PSLV"}]"#).unwrap();
        std::fs::write(dir.path().join("README.md"), "not json").unwrap();

        let store = RecordStore::load(dir.path()).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.source_files(), &["launchers.json".to_string()]);
        assert_eq!(store.content_hash(), snapshot_hash(dir.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_an_index_build_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("launchers.json"), r#"[{"id": "PSLV"}]"#).unwrap();
        std::fs::write(dir.path().join("broken.json"), [0xff, 0xfe, 0x5b, 0x5d]).unwrap();

        let err = RecordStore::load(dir.path()).await.unwrap_err();
        match err {
            AppError::IndexBuild { message, record_id } => {
                assert!(message.contains("broken.json"));
                assert!(record_id.is_none());
            }
            other => panic!("expected IndexBuild, got {:?}", other),
        }
        assert!(matches!(
            snapshot_hash(dir.path()).await,
            Err(AppError::IndexBuild { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let err = RecordStore::load(Path::new("/definitely/not/here")).await.unwrap_err();
        assert!(matches!(err, AppError::IndexBuild { .. }));
    }
}
