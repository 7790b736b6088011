//! Pipeline configuration.

use std::time::Duration;

use quill_core::defaults;

/// Configuration for the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Whether to start workers at all.
    pub enabled: bool,
    /// Worker tasks per stage.
    pub concurrency: usize,
    /// Capacity of each stage queue.
    pub queue_capacity: usize,
    /// Seconds between recovery flusher scans.
    pub flush_interval_secs: u64,
    /// Items re-submitted per flusher scan.
    pub flush_page_size: i64,
    /// Items whose retry counter exceeds this are parked.
    pub max_retries: i32,
    /// Deadline for the provider chunk call.
    pub summarize_timeout_secs: u64,
    /// Deadline for loading chunks plus the provider embedding call.
    pub embed_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: defaults::PIPELINE_CONCURRENCY,
            queue_capacity: defaults::PIPELINE_QUEUE_CAPACITY,
            flush_interval_secs: defaults::FLUSH_INTERVAL_SECS,
            flush_page_size: defaults::FLUSH_PAGE_SIZE,
            max_retries: defaults::PIPELINE_MAX_RETRIES,
            summarize_timeout_secs: defaults::SUMMARIZE_TIMEOUT_SECS,
            embed_timeout_secs: defaults::EMBED_TIMEOUT_SECS,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl PipelineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PIPELINE_ENABLED` | `true` | Enable/disable stage workers |
    /// | `PIPELINE_CONCURRENCY` | `10` | Workers per stage |
    /// | `PIPELINE_QUEUE_CAPACITY` | `100000` | Bounded queue size per stage |
    /// | `PIPELINE_FLUSH_INTERVAL_SECS` | `60` | Recovery scan interval |
    /// | `PIPELINE_FLUSH_PAGE_SIZE` | `20` | Items per recovery scan |
    /// | `PIPELINE_MAX_RETRIES` | `3` | Retry bound before an item is parked |
    /// | `PIPELINE_SUMMARIZE_TIMEOUT_SECS` | `300` | Provider chunk deadline |
    /// | `PIPELINE_EMBED_TIMEOUT_SECS` | `300` | Provider embed deadline |
    pub fn from_env() -> Self {
        let base = Self::default();

        let enabled = std::env::var("PIPELINE_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            enabled,
            concurrency: env_parse::<usize>("PIPELINE_CONCURRENCY")
                .unwrap_or(base.concurrency)
                .max(1),
            queue_capacity: env_parse::<usize>("PIPELINE_QUEUE_CAPACITY")
                .unwrap_or(base.queue_capacity)
                .max(1),
            flush_interval_secs: env_parse::<u64>("PIPELINE_FLUSH_INTERVAL_SECS")
                .unwrap_or(base.flush_interval_secs)
                .max(1),
            flush_page_size: env_parse::<i64>("PIPELINE_FLUSH_PAGE_SIZE")
                .unwrap_or(base.flush_page_size)
                .max(1),
            max_retries: env_parse::<i32>("PIPELINE_MAX_RETRIES")
                .unwrap_or(base.max_retries)
                .max(0),
            summarize_timeout_secs: env_parse::<u64>("PIPELINE_SUMMARIZE_TIMEOUT_SECS")
                .unwrap_or(base.summarize_timeout_secs),
            embed_timeout_secs: env_parse::<u64>("PIPELINE_EMBED_TIMEOUT_SECS")
                .unwrap_or(base.embed_timeout_secs),
        }
    }

    /// Enable or disable the stage workers.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set workers per stage.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the per-stage queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_flush_interval(mut self, secs: u64) -> Self {
        self.flush_interval_secs = secs.max(1);
        self
    }

    pub fn with_flush_page_size(mut self, size: i64) -> Self {
        self.flush_page_size = size.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries.max(0);
        self
    }

    pub fn with_summarize_timeout(mut self, secs: u64) -> Self {
        self.summarize_timeout_secs = secs;
        self
    }

    pub fn with_embed_timeout(mut self, secs: u64) -> Self {
        self.embed_timeout_secs = secs;
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn summarize_timeout(&self) -> Duration {
        Duration::from_secs(self.summarize_timeout_secs)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }
}
