//! Vedika Indexer
//!
//! Offline companion of the gateway:
//! 1. Builds (or reuses) the persisted index for the snapshot
//! 2. Reports whether the persisted index matches the snapshot and config
//! 3. Runs ad hoc searches against the corpus

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vedika_common::{
    config::AppConfig,
    embeddings::create_embedder,
    records::RecordStore,
    retrieval::{Retriever, VectorRetriever},
    IndexMaintainer, VERSION,
};

#[derive(Parser)]
#[command(name = "vedika-indexer")]
#[command(about = "Build and inspect the Vedika record index")]
#[command(version)]
struct Cli {
    /// Configuration file to use instead of the `config/` directory
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index, reusing the persisted one when it is current
    Build {
        /// Rebuild even when the persisted index matches the snapshot
        #[arg(long)]
        force: bool,
    },
    /// Compare the persisted index with the snapshot and configuration
    Status,
    /// Print the nearest chunks for a query
    Search {
        query: String,
        /// Number of results
        #[arg(short, long, default_value_t = 5)]
        k: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so command output stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .context("failed to load configuration")?;
    config.validate()?;
    info!("Vedika Indexer v{}", VERSION);

    let output = match cli.command {
        Commands::Build { force } => build(&config, force).await?,
        Commands::Status => status(&config).await?,
        Commands::Search { query, k } => search(&config, &query, k).await?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn maintainer(config: &AppConfig) -> anyhow::Result<IndexMaintainer> {
    let embedder = create_embedder(&config.embedding)?;
    Ok(IndexMaintainer::new(config, embedder)?)
}

async fn build(config: &AppConfig, force: bool) -> anyhow::Result<Value> {
    let start = Instant::now();
    let maintainer = maintainer(config)?;
    let outcome = maintainer.refresh(force).await.context("index build failed")?;

    let corpus = maintainer.handle().current();
    let manifest = corpus.index.manifest();
    Ok(json!({
        "outcome": outcome,
        "path": maintainer.store().path(),
        "build_id": manifest.build_id,
        "built_at": manifest.built_at,
        "records": corpus.records.len(),
        "entries": corpus.index.len(),
        "model_version": corpus.index.model_version(),
        "corpus_hash": manifest.fingerprint.corpus_hash,
        "duration_ms": start.elapsed().as_millis() as u64,
    }))
}

async fn status(config: &AppConfig) -> anyhow::Result<Value> {
    let maintainer = maintainer(config)?;
    let records = RecordStore::load(&config.snapshot.data_dir).await?;
    let expected = maintainer.builder().fingerprint(records.content_hash());

    let persisted = maintainer.store().load().await?;
    let index = match &persisted {
        Some(index) => json!({
            "build_id": index.manifest().build_id,
            "built_at": index.manifest().built_at,
            "entries": index.len(),
            "record_count": index.manifest().record_count,
            "fingerprint": index.fingerprint(),
        }),
        None => Value::Null,
    };

    Ok(json!({
        "path": maintainer.store().path(),
        "snapshot": {
            "dir": config.snapshot.data_dir,
            "files": records.source_files(),
            "records": records.len(),
            "corpus_hash": records.content_hash(),
        },
        "expected_fingerprint": expected,
        "index": index,
        "current": persisted.as_ref().is_some_and(|index| index.fingerprint() == &expected),
    }))
}

async fn search(config: &AppConfig, query: &str, k: usize) -> anyhow::Result<Value> {
    let embedder = create_embedder(&config.embedding)?;
    let maintainer = IndexMaintainer::new(config, embedder.clone())?;
    maintainer.refresh(false).await.context("index unavailable")?;

    let retriever = VectorRetriever::new(embedder, maintainer.handle().clone());
    let results = retriever.search(query, k).await?;

    Ok(json!({
        "query": query,
        "count": results.len(),
        "results": results,
    }))
}
