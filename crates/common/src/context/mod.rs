//! Context assembly and answer generation
//!
//! - `assembler`: ranked documents -> budgeted, numbered prompt
//! - `generator`: prompt -> answer with citations (remote model or extractive fallback)

mod assembler;
mod generator;

pub use assembler::{truncate_at_sentence, ContextAssembler, ContextSource, PromptContext};
pub use generator::{
    create_generator, extract_citations, AnswerGenerator, BackendStatus, Citation, ExtractiveGenerator,
    GeneratedAnswer, LlmGenerator,
};

/// Answer returned when nothing relevant was retrieved
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "I couldn't find any relevant information in the ISRO records for your query.";

/// Persona given to the model
pub const SYSTEM_PROMPT: &str = "You are Vedika, an assistant for data about the Indian Space Research \
Organisation (ISRO): satellites, spacecraft, launch vehicles, ISRO centres and customer satellites. \
Answer strictly from the numbered context you are given and cite the entries you use.";
