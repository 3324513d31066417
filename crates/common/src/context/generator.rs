//! Answer generation
//!
//! Provides:
//! - `LlmGenerator`: OpenAI-compatible chat completions (OpenRouter by default)
//!   with bounded retries on transient failures
//! - `ExtractiveGenerator`: offline fallback quoting the top sources
//! - Citation extraction

use super::{ContextSource, PromptContext, INSUFFICIENT_CONTEXT_ANSWER};
use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::records::RecordId;
use crate::retry::{backoff_delay, AttemptFailure};
use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const EXTRACTIVE_MODEL: &str = "extractive-fallback";
const EXTRACTIVE_SOURCES: usize = 3;
const EXTRACTIVE_SNIPPET_CHARS: usize = 400;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Source referenced from the answer as `[index]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub index: usize,
    pub record_id: RecordId,
    pub record_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

impl From<&ContextSource> for Citation {
    fn from(source: &ContextSource) -> Self {
        Self {
            index: source.index,
            record_id: source.record_id.clone(),
            record_name: source.record_name.clone(),
            source_file: source.source_file.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub answer: String,
    pub model_used: String,
    /// Completion attempts made, retries included
    pub attempts: u32,
    pub citations: Vec<Citation>,
}

/// Result of probing the generation backend
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    /// "up", "down" or "local"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackendStatus {
    pub fn is_available(&self) -> bool {
        self.status != "down"
    }
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, prompt: &PromptContext) -> Result<GeneratedAnswer>;

    fn model_name(&self) -> &str;

    /// Whether answers come from a remote model
    fn is_remote(&self) -> bool;

    async fn check_backend(&self) -> BackendStatus;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Chat-completions client with an explicit retry loop
pub struct LlmGenerator {
    client: reqwest::Client,
    config: GenerationConfig,
    api_key: String,
    timeout: Duration,
}

impl LlmGenerator {
    pub fn new(api_key: String, config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
            config: config.clone(),
        })
    }

    /// Override the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.config.backoff_base_ms, self.config.backoff_max_ms)
    }

    async fn complete_once(&self, prompt: &PromptContext) -> std::result::Result<String, AttemptFailure> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.text,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.config.site_url)
            .header("X-Title", &self.config.site_name)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| AttemptFailure::from_reqwest(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(AttemptFailure::from_response(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| AttemptFailure::from_reqwest(e, self.timeout))?;
        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| AttemptFailure::Malformed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AttemptFailure::Malformed("completion has no content".to_string()))
    }
}

#[async_trait]
impl AnswerGenerator for LlmGenerator {
    async fn generate(&self, prompt: &PromptContext) -> Result<GeneratedAnswer> {
        let start = Instant::now();
        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.complete_once(prompt).await {
                Ok(answer) => {
                    metrics::record_generation(start.elapsed().as_secs_f64(), &self.config.model, attempt, true);
                    info!(
                        model = %self.config.model,
                        attempts = attempt,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Answer generated"
                    );
                    let citations = extract_citations(&answer, &prompt.sources);
                    return Ok(GeneratedAnswer {
                        answer,
                        model_used: self.config.model.clone(),
                        attempts: attempt,
                        citations,
                    });
                }
                Err(failure) if failure.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "Generation attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => {
                    metrics::record_generation(start.elapsed().as_secs_f64(), &self.config.model, attempt, false);
                    error!(attempt, error = %failure, "Generation failed");
                    return Err(AppError::Generation {
                        message: failure.to_string(),
                        attempts: attempt,
                        timed_out: failure.is_timeout(),
                    });
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn check_backend(&self) -> BackendStatus {
        let start = Instant::now();
        let result = self
            .client
            .get(self.endpoint("models"))
            .bearer_auth(&self.api_key)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        let latency_ms = Some(start.elapsed().as_millis() as u64);

        match result {
            Ok(response) if response.status().is_success() => BackendStatus {
                status: "up".to_string(),
                latency_ms,
                error: None,
            },
            Ok(response) => BackendStatus {
                status: "down".to_string(),
                latency_ms,
                error: Some(format!("backend returned {}", response.status())),
            },
            Err(e) => BackendStatus {
                status: "down".to_string(),
                latency_ms,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Offline generator quoting the most relevant sources
#[derive(Debug, Clone, Default)]
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    async fn generate(&self, prompt: &PromptContext) -> Result<GeneratedAnswer> {
        if prompt.sources.is_empty() {
            return Ok(GeneratedAnswer {
                answer: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
                model_used: EXTRACTIVE_MODEL.to_string(),
                attempts: 1,
                citations: Vec::new(),
            });
        }

        let used: Vec<&ContextSource> = prompt.sources.iter().take(EXTRACTIVE_SOURCES).collect();
        let snippets: Vec<String> = used
            .iter()
            .map(|source| {
                let content = source.content.trim();
                let content = if content.chars().count() > EXTRACTIVE_SNIPPET_CHARS {
                    let cut: String = content.chars().take(EXTRACTIVE_SNIPPET_CHARS).collect();
                    format!("{}…", cut)
                } else {
                    content.to_string()
                };
                format!("[{}] {}:\n{}", source.index, source.record_name, content)
            })
            .collect();

        let answer = format!(
            "No language model is configured, so here is a summary of the most relevant records.\n\n\
             Question: {}\n\n{}",
            prompt.query,
            snippets.join("\n\n")
        );

        Ok(GeneratedAnswer {
            answer,
            model_used: EXTRACTIVE_MODEL.to_string(),
            attempts: 1,
            citations: used.into_iter().map(Citation::from).collect(),
        })
    }

    fn model_name(&self) -> &str {
        EXTRACTIVE_MODEL
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn check_backend(&self) -> BackendStatus {
        BackendStatus {
            status: "local".to_string(),
            latency_ms: None,
            error: None,
        }
    }
}

/// Pick the generator for the configuration: remote when a key is set
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn AnswerGenerator>> {
    match config.effective_api_key() {
        Some(key) => {
            info!(model = %config.model, base_url = %config.base_url, "Using remote generation backend");
            Ok(Arc::new(LlmGenerator::new(key.to_string(), config)?))
        }
        None => {
            warn!("No generation API key configured, answers use the extractive fallback");
            Ok(Arc::new(ExtractiveGenerator::new()))
        }
    }
}

fn citation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("citation pattern is valid"))
}

/// Map `[n]` markers in the answer to prompt sources, ordered by number.
/// Numbers without a matching source are ignored.
pub fn extract_citations(answer: &str, sources: &[ContextSource]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();

    for cap in citation_pattern().captures_iter(answer) {
        let Some(number) = cap.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) else {
            continue;
        };
        if citations.iter().any(|c| c.index == number) {
            continue;
        }
        if let Some(source) = sources.iter().find(|s| s.index == number) {
            citations.push(Citation::from(source));
        }
    }

    citations.sort_by_key(|c| c.index);
    citations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextAssembler, SYSTEM_PROMPT};
    use crate::index::DocumentMetadata;
    use crate::retrieval::RetrievedDocument;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prompt() -> PromptContext {
        let docs = vec![
            RetrievedDocument {
                content: "Chandrayaan-3 is the third Chandrayaan mission to the Moon.".to_string(),
                distance: 0.31,
                record_id: RecordId::from("spacecrafts:123"),
                chunk_index: 0,
                metadata: DocumentMetadata {
                    record_name: Some("Chandrayaan-3".to_string()),
                    source_file: Some("spacecrafts.json".to_string()),
                    ..Default::default()
                },
            },
            RetrievedDocument {
                content: "x".repeat(600),
                distance: 0.7,
                record_id: RecordId::from("spacecrafts:9"),
                chunk_index: 0,
                metadata: DocumentMetadata::default(),
            },
        ];
        ContextAssembler::new(6000).assemble("Tell me about Chandrayaan missions", &docs)
    }

    fn config(base_url: &str) -> GenerationConfig {
        GenerationConfig {
            base_url: base_url.to_string(),
            api_key: Some("sk-test".to_string()),
            model: "test/model".to_string(),
            backoff_base_ms: 50,
            backoff_max_ms: 1_000,
            ..GenerationConfig::default()
        }
    }

    fn completion(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        }))
    }

    #[test]
    fn test_citation_extraction() {
        let prompt = prompt();
        let citations = extract_citations("It reached the Moon [1]. See also [2], [1] and [7].", &prompt.sources);

        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].index, 1);
        assert_eq!(citations[0].record_name, "Chandrayaan-3");
        assert_eq!(citations[1].record_id.as_str(), "spacecrafts:9");
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let generator = LlmGenerator::new("k".into(), &config("http://localhost")).unwrap();
        let first = generator.backoff_delay(1);
        let second = generator.backoff_delay(2);
        let tenth = generator.backoff_delay(10);

        assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(55));
        assert!(second >= Duration::from_millis(100) && second <= Duration::from_millis(105));
        assert!(tenth <= Duration::from_millis(1_005));
    }

    #[tokio::test]
    async fn test_generate_sends_prompt_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header("x-title", "Vedika - ISRO Knowledge Assistant"))
            .respond_with(completion("Chandrayaan-3 went to the Moon [1]."))
            .expect(1)
            .mount(&server)
            .await;

        let generator = LlmGenerator::new("sk-test".into(), &config(&server.uri())).unwrap();
        let answer = generator.generate(&prompt()).await.unwrap();

        assert_eq!(answer.answer, "Chandrayaan-3 went to the Moon [1].");
        assert_eq!(answer.model_used, "test/model");
        assert_eq!(answer.attempts, 1);
        assert_eq!(answer.citations.len(), 1);

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["messages"][0]["content"], SYSTEM_PROMPT);
        assert!(body["messages"][1]["content"].as_str().unwrap().contains("[1] Chandrayaan-3"));
    }

    #[tokio::test]
    async fn test_two_timeouts_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion("late").set_delay(Duration::from_millis(500)))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion("On time [1]."))
            .expect(1)
            .mount(&server)
            .await;

        let generator = LlmGenerator::new("sk-test".into(), &config(&server.uri()))
            .unwrap()
            .with_timeout(Duration::from_millis(100));

        let start = Instant::now();
        let answer = generator.generate(&prompt()).await.unwrap();

        assert_eq!(answer.answer, "On time [1].");
        assert_eq!(answer.attempts, 3);
        // Two timeouts plus backoffs of 50ms and 100ms
        assert!(start.elapsed() >= Duration::from_millis(100 + 100 + 50 + 100));
    }

    #[tokio::test]
    async fn test_exhausted_timeouts_report_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion("late").set_delay(Duration::from_millis(500)))
            .expect(3)
            .mount(&server)
            .await;

        let generator = LlmGenerator::new("sk-test".into(), &config(&server.uri()))
            .unwrap()
            .with_timeout(Duration::from_millis(50));

        match generator.generate(&prompt()).await.unwrap_err() {
            AppError::Generation { attempts, timed_out, .. } => {
                assert_eq!(attempts, 3);
                assert!(timed_out);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion("Recovered."))
            .mount(&server)
            .await;

        let generator = LlmGenerator::new("sk-test".into(), &config(&server.uri())).unwrap();
        let answer = generator.generate(&prompt()).await.unwrap();
        assert_eq!(answer.attempts, 2);
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let generator = LlmGenerator::new("sk-test".into(), &config(&server.uri())).unwrap();
        match generator.generate(&prompt()).await.unwrap_err() {
            AppError::Generation { attempts, timed_out, message } => {
                assert_eq!(attempts, 1);
                assert!(!timed_out);
                assert!(message.contains("401"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_completion_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion("   "))
            .expect(1)
            .mount(&server)
            .await;

        let generator = LlmGenerator::new("sk-test".into(), &config(&server.uri())).unwrap();
        assert!(matches!(
            generator.generate(&prompt()).await,
            Err(AppError::Generation { attempts: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_check_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        let generator = LlmGenerator::new("sk-test".into(), &config(&server.uri())).unwrap();
        assert_eq!(generator.check_backend().await.status, "up");

        let unreachable = LlmGenerator::new("sk-test".into(), &config("http://127.0.0.1:1")).unwrap();
        let status = unreachable.check_backend().await;
        assert_eq!(status.status, "down");
        assert!(!status.is_available());
    }

    #[tokio::test]
    async fn test_extractive_fallback() {
        let generator = ExtractiveGenerator::new();
        let answer = generator.generate(&prompt()).await.unwrap();

        assert_eq!(answer.model_used, "extractive-fallback");
        assert!(answer.answer.contains("[1] Chandrayaan-3:"));
        assert!(answer.answer.contains(&format!("{}…", "x".repeat(400))));
        assert!(!answer.answer.contains(&"x".repeat(401)));
        assert_eq!(answer.citations.len(), 2);
    }

    #[test]
    fn test_create_generator_without_key_is_extractive() {
        let generator = create_generator(&GenerationConfig::default()).unwrap();
        assert!(!generator.is_remote());

        let blank = GenerationConfig {
            api_key: Some("  ".to_string()),
            ..GenerationConfig::default()
        };
        assert!(!create_generator(&blank).unwrap().is_remote());

        let generator = create_generator(&config("http://localhost")).unwrap();
        assert!(generator.is_remote());
        assert_eq!(generator.model_name(), "test/model");
    }
}
