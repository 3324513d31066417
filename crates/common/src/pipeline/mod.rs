//! Query pipeline: validate -> retrieve -> assemble -> generate
//!
//! Every run moves through `Received → Retrieving → Assembling → Generating`
//! and ends in `Completed` or `Failed`. A failing stage ends the run; no
//! partial response is produced.

use crate::config::{AppConfig, MAX_RESULTS_LIMIT};
use crate::context::{AnswerGenerator, BackendStatus, Citation, ContextAssembler, INSUFFICIENT_CONTEXT_ANSWER};
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::index::{CorpusHandle, DocumentMetadata};
use crate::metrics;
use crate::retrieval::{RetrievedDocument, Retriever, VectorRetriever};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use validator::Validate;

/// Longest accepted query, in characters
pub const MAX_QUERY_CHARS: usize = 1000;

fn default_max_results() -> usize {
    5
}

fn default_include_metadata() -> bool {
    true
}

/// A question about the corpus
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChatQuery {
    #[validate(length(min = 1, max = 1000, message = "query must be 1 to 1000 characters"))]
    pub query: String,

    #[serde(default = "default_max_results")]
    #[validate(range(min = 1, max = 20, message = "max_results must be between 1 and 20"))]
    pub max_results: usize,

    #[serde(default = "default_include_metadata")]
    pub include_metadata: bool,
}

impl ChatQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: default_max_results(),
            include_metadata: default_include_metadata(),
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Field checks plus the blank-query rule the derive cannot express
    pub fn check(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(AppError::validation("query", "query must not be blank"));
        }
        self.validate()?;
        Ok(())
    }
}

/// Document as returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseDocument {
    pub content: String,
    pub distance: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,
}

impl ResponseDocument {
    pub fn from_retrieved(doc: RetrievedDocument, include_metadata: bool) -> Self {
        Self {
            content: doc.content,
            distance: doc.distance,
            metadata: include_metadata.then_some(doc.metadata),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub relevant_documents: Vec<ResponseDocument>,
    pub model_used: String,
    pub query: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Received,
    Retrieving,
    Assembling,
    Generating,
    Completed,
    Failed,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryStage::Received => "received",
            QueryStage::Retrieving => "retrieving",
            QueryStage::Assembling => "assembling",
            QueryStage::Generating => "generating",
            QueryStage::Completed => "completed",
            QueryStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks the stage of one run for logging and metrics
struct QueryRun {
    stage: QueryStage,
    start: Instant,
}

impl QueryRun {
    fn start() -> Self {
        Self {
            stage: QueryStage::Received,
            start: Instant::now(),
        }
    }

    fn advance(&mut self, stage: QueryStage) {
        debug!(from = %self.stage, to = %stage, "Query stage");
        self.stage = stage;
    }

    fn complete(mut self, outcome: &str) {
        self.advance(QueryStage::Completed);
        metrics::record_query(self.start.elapsed().as_secs_f64(), outcome);
    }

    fn fail(mut self, error: AppError) -> AppError {
        let failed_in = self.stage;
        self.advance(QueryStage::Failed);
        warn!(stage = %failed_in, error = %error, "Query failed");
        metrics::record_query(self.start.elapsed().as_secs_f64(), &format!("failed_{}", failed_in));
        error
    }
}

pub struct QueryPipeline {
    retriever: Arc<dyn Retriever>,
    assembler: ContextAssembler,
    generator: Arc<dyn AnswerGenerator>,
    relevance_cutoff: f32,
}

impl QueryPipeline {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        assembler: ContextAssembler,
        generator: Arc<dyn AnswerGenerator>,
        relevance_cutoff: f32,
    ) -> Self {
        Self {
            retriever,
            assembler,
            generator,
            relevance_cutoff,
        }
    }

    /// Wire the pipeline over the published corpus
    pub fn from_config(
        config: &AppConfig,
        embedder: Arc<dyn Embedder>,
        corpus: CorpusHandle,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        Self::new(
            Arc::new(VectorRetriever::new(embedder, corpus)),
            ContextAssembler::new(config.context.max_context_chars),
            generator,
            config.retrieval.relevance_cutoff,
        )
    }

    pub fn generator(&self) -> &Arc<dyn AnswerGenerator> {
        &self.generator
    }

    pub async fn check_backend(&self) -> BackendStatus {
        self.generator.check_backend().await
    }

    /// Answer a question from the corpus
    pub async fn answer(&self, query: ChatQuery) -> Result<ChatResponse> {
        let mut run = QueryRun::start();

        if let Err(e) = query.check() {
            return Err(run.fail(e));
        }

        run.advance(QueryStage::Retrieving);
        let documents = match self.retriever.search(&query.query, query.max_results).await {
            Ok(documents) => documents,
            Err(e) => return Err(run.fail(e)),
        };
        let retrieved = documents.len();
        let relevant: Vec<RetrievedDocument> = documents
            .into_iter()
            .filter(|doc| doc.distance < self.relevance_cutoff)
            .collect();

        if relevant.is_empty() {
            info!(retrieved, "No relevant documents, answering without generation");
            run.complete("no_context");
            return Ok(ChatResponse {
                answer: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
                relevant_documents: Vec::new(),
                model_used: self.generator.model_name().to_string(),
                query: query.query,
                timestamp: Utc::now(),
                citations: Vec::new(),
            });
        }

        run.advance(QueryStage::Assembling);
        let prompt = self.assembler.assemble(&query.query, &relevant);

        run.advance(QueryStage::Generating);
        let generated = match self.generator.generate(&prompt).await {
            Ok(generated) => generated,
            Err(e) => return Err(run.fail(e)),
        };

        info!(
            retrieved,
            relevant = relevant.len(),
            sources = prompt.sources.len(),
            citations = generated.citations.len(),
            attempts = generated.attempts,
            model = %generated.model_used,
            "Query answered"
        );
        run.complete("answered");

        Ok(ChatResponse {
            answer: generated.answer,
            relevant_documents: relevant
                .into_iter()
                .map(|doc| ResponseDocument::from_retrieved(doc, query.include_metadata))
                .collect(),
            model_used: generated.model_used,
            query: query.query,
            timestamp: Utc::now(),
            citations: generated.citations,
        })
    }

    /// Raw retrieval without relevance filtering or generation
    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RetrievedDocument>> {
        if query.trim().is_empty() {
            return Err(AppError::validation("query", "query must not be blank"));
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(AppError::validation(
                "query",
                format!("query must be at most {} characters", MAX_QUERY_CHARS),
            ));
        }
        if !(1..=MAX_RESULTS_LIMIT).contains(&max_results) {
            return Err(AppError::validation(
                "max_results",
                format!("max_results must be between 1 and {}", MAX_RESULTS_LIMIT),
            ));
        }
        self.retriever.search(query, max_results).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::context::{ExtractiveGenerator, LlmGenerator};
    use crate::index::test_support::{chandrayaan_corpus, embedder, records};
    use crate::index::{ChunkingConfig, Corpus, IndexBuilder};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pipeline_with(corpus: CorpusHandle, generator: Arc<dyn AnswerGenerator>) -> QueryPipeline {
        QueryPipeline::from_config(&AppConfig::default(), embedder(), corpus, generator)
    }

    async fn empty_corpus() -> CorpusHandle {
        let store = records(&[("spacecrafts.json", "[]")]);
        let builder = IndexBuilder::new(embedder(), ChunkingConfig::default(), 8, 1).unwrap();
        let index = builder.build(&store).await.unwrap();
        CorpusHandle::new(Corpus::new(store, index))
    }

    fn llm(server: &MockServer) -> Arc<dyn AnswerGenerator> {
        let config = GenerationConfig {
            base_url: server.uri(),
            api_key: Some("sk-test".to_string()),
            model: "test/model".to_string(),
            ..GenerationConfig::default()
        };
        Arc::new(LlmGenerator::new("sk-test".into(), &config).unwrap())
    }

    #[test]
    fn test_query_defaults() {
        let query: ChatQuery = serde_json::from_str(r#"{"query": "PSLV"}"#).unwrap();
        assert_eq!(query.max_results, 5);
        assert!(query.include_metadata);
        assert!(query.check().is_ok());
    }

    #[test]
    fn test_query_validation() {
        assert!(ChatQuery::new("   ").check().is_err());
        assert!(ChatQuery::new("x".repeat(1001)).check().is_err());
        assert!(ChatQuery::new("x".repeat(1000)).check().is_ok());
        assert!(ChatQuery::new("PSLV").with_max_results(0).check().is_err());
        assert!(ChatQuery::new("PSLV").with_max_results(21).check().is_err());
        assert!(ChatQuery::new("PSLV").with_max_results(20).check().is_ok());
    }

    #[tokio::test]
    async fn test_blank_query_never_reaches_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let pipeline = pipeline_with(chandrayaan_corpus().await, llm(&server));
        let err = pipeline.answer(ChatQuery::new(" \n\t ")).await.unwrap_err();

        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_corpus_answers_insufficient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let pipeline = pipeline_with(empty_corpus().await, llm(&server));
        let response = pipeline.answer(ChatQuery::new("What is Gaganyaan?")).await.unwrap();

        assert_eq!(response.answer, INSUFFICIENT_CONTEXT_ANSWER);
        assert!(response.relevant_documents.is_empty());
        assert!(response.citations.is_empty());
    }

    #[tokio::test]
    async fn test_irrelevant_documents_are_dropped() {
        let pipeline = pipeline_with(chandrayaan_corpus().await, Arc::new(ExtractiveGenerator::new()));
        // No content token: every document sits at distance 1.0, the default cutoff
        let response = pipeline.answer(ChatQuery::new("tell me about it")).await.unwrap();

        assert_eq!(response.answer, INSUFFICIENT_CONTEXT_ANSWER);
        assert!(response.relevant_documents.is_empty());
    }

    #[tokio::test]
    async fn test_chandrayaan_answer_with_citations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "Chandrayaan-3 is India's third lunar mission [1]."}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let pipeline = pipeline_with(chandrayaan_corpus().await, llm(&server));
        let response = pipeline
            .answer(ChatQuery::new("Tell me about Chandrayaan missions"))
            .await
            .unwrap();

        assert_eq!(response.model_used, "test/model");
        assert_eq!(response.query, "Tell me about Chandrayaan missions");
        let top = &response.relevant_documents[0];
        assert!(top.distance < 0.5);
        assert_eq!(
            top.metadata.as_ref().and_then(|m| m.record_name.as_deref()),
            Some("Chandrayaan-3")
        );
        assert_eq!(response.citations.len(), 1);
        assert_eq!(response.citations[0].record_id.as_str(), "spacecrafts:123");
    }

    #[tokio::test]
    async fn test_metadata_can_be_left_out() {
        let pipeline = pipeline_with(chandrayaan_corpus().await, Arc::new(ExtractiveGenerator::new()));
        let mut query = ChatQuery::new("Chandrayaan");
        query.include_metadata = false;

        let response = pipeline.answer(query).await.unwrap();
        assert!(!response.relevant_documents.is_empty());
        assert!(response.relevant_documents.iter().all(|d| d.metadata.is_none()));
        assert_eq!(response.model_used, "extractive-fallback");
    }

    #[tokio::test]
    async fn test_generation_failure_is_not_a_partial_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let pipeline = pipeline_with(chandrayaan_corpus().await, llm(&server));
        let err = pipeline.answer(ChatQuery::new("Chandrayaan")).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_search_validates_and_returns_raw_results() {
        let pipeline = pipeline_with(chandrayaan_corpus().await, Arc::new(ExtractiveGenerator::new()));

        assert!(pipeline.search("", 5).await.is_err());
        assert!(pipeline.search("Moon", 0).await.is_err());
        assert!(pipeline.search("Moon", 21).await.is_err());

        let results = pipeline.search("tell me about it", 2).await.unwrap();
        assert_eq!(results.len(), 2);
    }
}
