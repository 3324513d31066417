//! Vedika API Gateway
//!
//! HTTP entry point of the knowledge assistant.
//! Handles:
//! - Question answering and raw retrieval
//! - Index status and explicit rebuilds
//! - Rate limiting and request admission
//! - Observability (logging, metrics, request ids)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    extract::Request,
    middleware::{from_fn, Next},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Semaphore;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vedika_common::{
    config::{AppConfig, ObservabilityConfig},
    context::create_generator,
    embeddings::create_embedder,
    metrics::{self, GENERATION_BUCKETS, LATENCY_BUCKETS, METRICS_PREFIX},
    IndexMaintainer, QueryPipeline,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<QueryPipeline>,
    pub maintainer: Arc<IndexMaintainer>,
}

impl AppState {
    /// Load or build the index and wire the query pipeline.
    /// Fails when no usable index can be produced.
    pub async fn initialize(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let embedder = create_embedder(&config.embedding)?;
        let maintainer = Arc::new(IndexMaintainer::new(&config, embedder.clone())?);

        let outcome = maintainer
            .refresh(false)
            .await
            .context("initial index build failed")?;
        let corpus = maintainer.handle().current();
        info!(
            outcome = outcome.as_str(),
            records = corpus.records.len(),
            entries = corpus.index.len(),
            model_version = %corpus.index.model_version(),
            "Corpus ready"
        );

        let generator = create_generator(&config.generation)?;
        let pipeline = Arc::new(QueryPipeline::from_config(
            &config,
            embedder,
            maintainer.handle().clone(),
            generator,
        ));

        Ok(Self {
            config,
            pipeline,
            maintainer,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config.observability);
    info!("Starting Vedika API Gateway v{}", vedika_common::VERSION);

    config.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        install_metrics_exporter(&config.observability)?;
    }
    metrics::register_metrics();

    let state = AppState::initialize(config).await?;

    if state.config.index.watch_interval_secs > 0 {
        let interval = Duration::from_secs(state.config.index.watch_interval_secs);
        info!(interval_secs = interval.as_secs(), "Watching snapshot for changes");
        tokio::spawn(state.maintainer.clone().watch(interval));
    }

    let listener = tokio::net::TcpListener::bind((state.config.server.host.as_str(), state.config.server.port))
        .await
        .with_context(|| {
            format!("cannot bind {}:{}", state.config.server.host, state.config.server.port)
        })?;
    info!("Listening on {}", listener.local_addr()?);

    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_metrics_exporter(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_generation_duration_seconds", METRICS_PREFIX)),
            GENERATION_BUCKETS,
        )?
        .set_buckets_for_metric(Matcher::Suffix("_duration_seconds".to_string()), LATENCY_BUCKETS)?
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration, open for the embedded chat widget
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/query", post(handlers::query::query))
        .route("/search", get(handlers::search::search))
        .route("/records/{record_id}", get(handlers::records::get_record))
        .route("/index/rebuild", post(handlers::index::rebuild))
        .route_layer(from_fn(middleware::metrics::track_requests));

    let permits = Arc::new(Semaphore::new(state.config.server.max_concurrent_requests.max(1)));
    router = router.layer(from_fn(move |request: Request, next: Next| {
        let permits = permits.clone();
        async move { middleware::rate_limit::concurrency_limit_middleware(request, next, permits).await }
    }));

    let limits = &state.config.rate_limit;
    if limits.enabled {
        match middleware::rate_limit::create_rate_limiter(limits.requests_per_second, limits.burst) {
            Some(limiter) => {
                let limit = limits.requests_per_second;
                router = router.layer(from_fn(move |request: Request, next: Next| {
                    let limiter = limiter.clone();
                    async move { middleware::rate_limit::rate_limit_middleware(request, next, limiter, limit).await }
                }));
            }
            None => warn!("Rate limiting enabled with a zero quota, leaving it off"),
        }
    }

    router
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
