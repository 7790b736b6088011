//! Recovery flusher.
//!
//! Re-discovers items left at an unfinished stage (failed attempts, process
//! restarts, dropped duplicates) and re-submits them. Runs once at start and
//! then on a fixed interval. Items past the retry bound are not scanned.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use quill_core::{defaults, Error, KnowledgeStore, Result};

use crate::config::PipelineConfig;
use crate::dispatcher::Dispatcher;
use crate::request::StageKind;

pub struct Flusher {
    store: Arc<dyn KnowledgeStore>,
    dispatcher: Dispatcher,
    config: PipelineConfig,
}

impl Flusher {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        dispatcher: Dispatcher,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    /// Scan loop. Returns when `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            subsystem = "pipeline",
            component = "flusher",
            interval_secs = self.config.flush_interval_secs,
            page_size = self.config.flush_page_size,
            max_retries = self.config.max_retries,
            "Recovery flusher started"
        );

        let mut ticker = interval(self.config.flush_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.flush_once().await {
                Ok(0) => debug!(subsystem = "pipeline", component = "flusher", "Nothing to flush"),
                Ok(submitted) => info!(
                    subsystem = "pipeline",
                    component = "flusher",
                    submitted,
                    "Re-submitted unfinished items"
                ),
                Err(Error::PipelineUnavailable(_)) => break,
                Err(e) => error!(
                    subsystem = "pipeline",
                    component = "flusher",
                    error = %e,
                    "Flush pass failed"
                ),
            }
        }

        info!(subsystem = "pipeline", component = "flusher", "Recovery flusher stopped");
    }

    /// One scan: fetch a page of unfinished items and re-submit each for its
    /// current stage. Returns how many were submitted.
    pub async fn flush_once(&self) -> Result<usize> {
        let limit = Duration::from_secs(defaults::FLUSH_SCAN_TIMEOUT_SECS);
        let items = timeout(
            limit,
            self.store
                .list_processing(self.config.max_retries, 1, self.config.flush_page_size),
        )
        .await
        .map_err(|_| Error::Timeout(format!("flusher scan exceeded {:?}", limit)))??;

        self.report_parked().await;

        let mut submitted = 0;
        for item in items {
            let Some(kind) = StageKind::for_stage(item.stage) else {
                continue;
            };
            debug!(
                subsystem = "pipeline",
                component = "flusher",
                knowledge_id = %item.id,
                stage = %item.stage,
                retry_times = item.retry_times,
                "Re-submitting item"
            );
            // Completions are dropped; outcomes land in the store and logs.
            self.dispatcher.submit(kind, item).await?;
            submitted += 1;
        }

        Ok(submitted)
    }

    async fn report_parked(&self) {
        let limit = Duration::from_secs(defaults::FLUSH_SCAN_TIMEOUT_SECS);
        match timeout(limit, self.store.count_parked(self.config.max_retries)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(parked)) => warn!(
                subsystem = "pipeline",
                component = "flusher",
                parked,
                max_retries = self.config.max_retries,
                "Items parked after exhausting retries"
            ),
            Ok(Err(e)) => debug!(
                subsystem = "pipeline",
                component = "flusher",
                error = %e,
                "Parked count unavailable"
            ),
            Err(_) => debug!(
                subsystem = "pipeline",
                component = "flusher",
                "Parked count timed out"
            ),
        }
    }
}
