//! quill ingestion worker.
//!
//! Connects to PostgreSQL, applies migrations, and runs the knowledge
//! pipeline until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quill_core::{EventBus, HiddenMarkerMasker, InferenceBackend, ServerEvent};
use quill_db::{Database, PgPool, PoolConfig};
use quill_inference::OpenAIBackend;
use quill_pipeline::{Pipeline, PipelineConfig, PipelineDeps};

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "quill_worker=debug,quill_pipeline=debug")
///
/// The returned guard must live as long as file logging is needed.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "quill_worker=debug,quill_pipeline=debug".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = match log_file.as_deref() {
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = path.parent().unwrap_or(std::path::Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or("quill-worker.log");
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name));

            if log_format == "json" {
                registry
                    .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                    .init();
            } else {
                registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(writer)
                            .with_ansi(log_ansi.unwrap_or(false)),
                    )
                    .init();
            }
            Some(guard)
        }
        None => {
            if log_format == "json" {
                registry
                    .with(tracing_subscriber::fmt::layer().json())
                    .init();
            } else {
                let mut layer = tracing_subscriber::fmt::layer();
                if let Some(ansi) = log_ansi {
                    layer = layer.with_ansi(ansi);
                }
                registry.with(layer).init();
            }
            None
        }
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

/// Log every envelope published on the bus.
async fn log_events(bus: EventBus) {
    let mut rx = bus.subscribe();
    loop {
        match rx.recv().await {
            Ok(env) => match &env.payload {
                ServerEvent::StageChanged {
                    knowledge_id,
                    stage,
                } => info!(
                    topic = %env.topic,
                    %knowledge_id,
                    %stage,
                    "Stage changed"
                ),
                ServerEvent::KnowledgeParked {
                    knowledge_id,
                    stage,
                    retry_times,
                } => warn!(
                    topic = %env.topic,
                    %knowledge_id,
                    %stage,
                    retry_times,
                    "Knowledge parked"
                ),
            },
            Err(RecvError::Lagged(n)) => {
                warn!(missed = n, "Event log lagged, missed events");
            }
            Err(RecvError::Closed) => {
                info!("Event bus closed, event log stopping");
                break;
            }
        }
    }
}

const POOL_METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically log pool occupancy until the pipeline stops.
async fn watch_pool(pool: PgPool, pipeline: Arc<Pipeline>) {
    let cancel = pipeline.cancel_token();
    let mut ticker = tokio::time::interval(POOL_METRICS_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => quill_db::log_pool_metrics(&pool),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = quill_db::create_pool_with_config(&database_url, PoolConfig::from_env())
        .await
        .context("failed to connect to database")?;
    let db = Database::new(pool);
    db.migrate().await.context("failed to run migrations")?;

    let backend = OpenAIBackend::from_env().context("invalid inference configuration")?;
    match backend.health_check().await {
        Ok(true) => info!(base_url = %backend.config().base_url, "Inference backend reachable"),
        Ok(false) | Err(_) => warn!(
            base_url = %backend.config().base_url,
            "Inference backend not reachable; attempts will fail until it is"
        ),
    }

    let bus = EventBus::default();
    let event_log = tokio::spawn(log_events(bus.clone()));

    let config = PipelineConfig::from_env();
    let deps = PipelineDeps::new(Arc::new(db.clone()), Arc::new(backend), Arc::new(bus.clone()))
        .with_masker(Arc::new(HiddenMarkerMasker))
        .with_events(bus.clone());
    let pipeline = Arc::new(Pipeline::start(deps, config));
    let pool_watch = tokio::spawn(watch_pool(db.pool.clone(), pipeline.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    pipeline.shutdown().await;
    pool_watch.abort();
    event_log.abort();
    db.pool.close().await;

    info!("quill-worker stopped");
    Ok(())
}
