//! Context Assembler - turns ranked documents into a bounded prompt
//!
//! Snippets are numbered in rank order so the model can cite them as `[n]`.
//! The assembled text never exceeds the character budget.

use super::SYSTEM_PROMPT;
use crate::records::RecordId;
use crate::retrieval::RetrievedDocument;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

const INSTRUCTIONS: &str = "Answer the question using only the numbered context entries below. \
Cite every entry you rely on by its number, for example [1] or [2]. \
If the context does not contain enough information to answer, say explicitly that the available \
ISRO records do not cover it instead of guessing.";

const NO_CONTEXT: &str = "(no relevant records were found)\n";

/// A context entry the model may cite
#[derive(Debug, Clone, Serialize)]
pub struct ContextSource {
    /// 1-based citation number
    pub index: usize,
    pub record_id: RecordId,
    pub record_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    pub distance: f32,
    /// Text as included in the prompt (possibly truncated)
    pub content: String,
}

/// Prompt ready for generation
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub query: String,
    pub system_prompt: String,
    /// User message: instructions, numbered context, question
    pub text: String,
    pub sources: Vec<ContextSource>,
    /// The first snippet was cut to fit
    pub truncated: bool,
    /// Snippets left out because they did not fit
    pub omitted: usize,
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    max_context_chars: usize,
}

impl ContextAssembler {
    pub fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars }
    }

    pub fn max_context_chars(&self) -> usize {
        self.max_context_chars
    }

    pub fn assemble(&self, query: &str, documents: &[RetrievedDocument]) -> PromptContext {
        self.assemble_with_budget(query, documents, self.max_context_chars)
    }

    /// `documents` must be ranked, most relevant first
    pub fn assemble_with_budget(
        &self,
        query: &str,
        documents: &[RetrievedDocument],
        max_chars: usize,
    ) -> PromptContext {
        let header = format!("{}\n\nContext:\n", INSTRUCTIONS);
        let mut footer = question_block(query);

        // An oversized question is shortened before any context is dropped for it
        let fixed = char_len(&header) + char_len(&footer);
        if fixed > max_chars {
            let keep = char_len(query).saturating_sub(fixed - max_chars);
            footer = question_block(&take_chars(query, keep));
        }

        let mut remaining = max_chars.saturating_sub(char_len(&header) + char_len(&footer));
        let mut body = String::new();
        let mut sources: Vec<ContextSource> = Vec::new();
        let mut truncated = false;
        let mut omitted = 0;

        for (rank, doc) in dedupe_by_record(documents).into_iter().enumerate() {
            let number = sources.len() + 1;
            let label = format!("[{}] {}\n", number, source_label(doc));
            let label_len = char_len(&label);
            // Snippet plus the blank line separating entries
            let block_len = label_len + char_len(&doc.content) + 2;

            let content = if block_len <= remaining {
                doc.content.clone()
            } else if rank == 0 && remaining > label_len + 2 {
                let cut = truncate_at_sentence(&doc.content, remaining - label_len - 2);
                if cut.is_empty() {
                    omitted += 1;
                    continue;
                }
                truncated = true;
                cut
            } else {
                omitted += 1;
                continue;
            };

            remaining -= label_len + char_len(&content) + 2;
            body.push_str(&label);
            body.push_str(&content);
            body.push_str("\n\n");

            sources.push(ContextSource {
                index: number,
                record_id: doc.record_id.clone(),
                record_name: doc.metadata.label().unwrap_or(doc.record_id.as_str()).to_string(),
                source_file: doc.metadata.source_file.clone(),
                distance: doc.distance,
                content,
            });
        }

        if sources.is_empty() && char_len(NO_CONTEXT) <= remaining {
            body.push_str(NO_CONTEXT);
        }

        let mut text = format!("{}{}{}", header, body, footer);
        // Only reachable when the budget is smaller than the instructions
        if char_len(&text) > max_chars {
            text = take_chars(&text, max_chars);
        }

        debug!(
            sources = sources.len(),
            omitted,
            truncated,
            chars = char_len(&text),
            budget = max_chars,
            "Context assembled"
        );

        PromptContext {
            query: query.to_string(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            text,
            sources,
            truncated,
            omitted,
        }
    }
}

fn question_block(query: &str) -> String {
    format!("Question: {}\n\nAnswer:", query)
}

fn source_label(doc: &RetrievedDocument) -> String {
    let name = doc.metadata.label().unwrap_or(doc.record_id.as_str());
    match &doc.metadata.source_file {
        Some(file) => format!("{} ({})", name, file),
        None => name.to_string(),
    }
}

/// Keep the most relevant chunk of each record, preserving rank order
fn dedupe_by_record(documents: &[RetrievedDocument]) -> Vec<&RetrievedDocument> {
    let mut seen = HashSet::new();
    documents
        .iter()
        .filter(|doc| seen.insert(&doc.record_id))
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Cut `text` to at most `max_chars` characters.
///
/// Prefers the end of the last complete sentence, then the last word
/// boundary, then a hard cut on a character boundary.
pub fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    if char_len(text) <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }

    let prefix_end = text
        .char_indices()
        .nth(max_chars)
        .map(|(pos, _)| pos)
        .unwrap_or(text.len());
    let prefix = &text[..prefix_end];

    let sentence_end = prefix
        .char_indices()
        .filter(|&(pos, c)| {
            matches!(c, '.' | '!' | '?')
                && text[pos + c.len_utf8()..]
                    .chars()
                    .next()
                    .map_or(true, char::is_whitespace)
        })
        .map(|(pos, c)| pos + c.len_utf8())
        .last();

    if let Some(end) = sentence_end {
        return prefix[..end].trim_end().to_string();
    }

    match prefix.rfind(char::is_whitespace) {
        Some(ws) if ws > 0 => prefix[..ws].trim_end().to_string(),
        _ => prefix.to_string(),
    }
}
