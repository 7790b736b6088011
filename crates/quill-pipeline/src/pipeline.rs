//! Pipeline lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use quill_core::{
    defaults, EventBus, InferenceBackend, KnowledgeItem, KnowledgeStore, Masker, NoopMasker,
    Notifier, Result,
};

use crate::config::PipelineConfig;
use crate::dispatcher::Dispatcher;
use crate::flusher::Flusher;
use crate::guard::InFlightGuard;
use crate::request::{Completion, StageKind};
use crate::stage::StageRunner;
use crate::worker::StageWorker;

/// Collaborators the pipeline is wired to.
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<dyn KnowledgeStore>,
    pub provider: Arc<dyn InferenceBackend>,
    pub notifier: Arc<dyn Notifier>,
    pub masker: Arc<dyn Masker>,
    /// Receives `KnowledgeParked` events when set.
    pub events: Option<EventBus>,
}

impl PipelineDeps {
    /// Wire the required collaborators. Masking defaults to a no-op.
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        provider: Arc<dyn InferenceBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            provider,
            notifier,
            masker: Arc::new(NoopMasker),
            events: None,
        }
    }

    pub fn with_masker(mut self, masker: Arc<dyn Masker>) -> Self {
        self.masker = masker;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }
}

/// A running pipeline: two worker pools, their queues, and the flusher.
///
/// Construct with [`Pipeline::start`] and share by reference (usually in an
/// `Arc`). Stop with [`Pipeline::shutdown`].
pub struct Pipeline {
    dispatcher: Dispatcher,
    guard: InFlightGuard,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Spawn `config.concurrency` workers per stage plus the recovery
    /// flusher. Must be called from within a tokio runtime.
    ///
    /// A disabled pipeline starts nothing and rejects every submission.
    pub fn start(deps: PipelineDeps, config: PipelineConfig) -> Self {
        let cancel = CancellationToken::new();
        let guard = InFlightGuard::new();
        let (dispatcher, summarize_rx, embed_rx) =
            Dispatcher::new(config.queue_capacity, cancel.clone());
        let mut tasks = JoinSet::new();

        if !config.enabled {
            info!(subsystem = "pipeline", "Pipeline is disabled, not starting");
            cancel.cancel();
            return Self {
                dispatcher,
                guard,
                cancel,
                tasks: Mutex::new(tasks),
                config,
            };
        }

        let runner = StageRunner::new(
            deps.store.clone(),
            deps.provider,
            deps.notifier,
            deps.masker,
            deps.events,
            config.clone(),
        );

        for (kind, queue) in [
            (StageKind::Summarize, summarize_rx),
            (StageKind::Embed, embed_rx),
        ] {
            for worker_id in 0..config.concurrency {
                let worker = StageWorker {
                    worker_id,
                    kind,
                    queue: queue.clone(),
                    guard: guard.clone(),
                    runner: runner.clone(),
                    cancel: cancel.clone(),
                };
                tasks.spawn(worker.run());
            }
        }

        let flusher = Flusher::new(deps.store, dispatcher.clone(), config.clone());
        tasks.spawn(flusher.run(cancel.clone()));

        info!(
            subsystem = "pipeline",
            concurrency = config.concurrency,
            queue_capacity = config.queue_capacity,
            flush_interval_secs = config.flush_interval_secs,
            max_retries = config.max_retries,
            "Pipeline started"
        );

        Self {
            dispatcher,
            guard,
            cancel,
            tasks: Mutex::new(tasks),
            config,
        }
    }

    /// Queue a summarize attempt for `item`.
    pub async fn submit_summary(&self, item: KnowledgeItem) -> Result<Completion> {
        self.dispatcher.submit_summary(item).await
    }

    /// Queue an embed attempt for `item`.
    pub async fn submit_embedding(&self, item: KnowledgeItem) -> Result<Completion> {
        self.dispatcher.submit_embedding(item).await
    }

    /// Handle for submitting from places that do not own the pipeline.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Root cancellation token. Cancelling it stops intake.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Number of items currently inside a stage attempt.
    pub fn in_flight(&self) -> usize {
        self.guard.len()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stop accepting work and wait for worker tasks to drain, up to the
    /// default grace period.
    pub async fn shutdown(&self) {
        self.shutdown_with_grace(Duration::from_secs(defaults::SHUTDOWN_GRACE_SECS))
            .await
    }

    /// Cancel, then wait up to `grace` for running attempts to finish.
    /// Tasks still running after that are aborted.
    pub async fn shutdown_with_grace(&self, grace: Duration) {
        self.cancel.cancel();
        let mut tasks = self.tasks.lock().await;
        let pending = tasks.len();

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(subsystem = "pipeline", error = ?e, "Pipeline task panicked");
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                subsystem = "pipeline",
                remaining = tasks.len(),
                grace_secs = grace.as_secs(),
                "Pipeline tasks did not drain in time, aborting"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        info!(subsystem = "pipeline", tasks = pending, "Pipeline stopped");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
