//! Summarize and embed stage logic.
//!
//! A [`StageRunner`] executes one attempt for one item. It never touches the
//! in-flight guard or the queues; the worker loop owns those. Every external
//! call runs under its own deadline, and a failed attempt only ever bumps
//! the retry counter.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use quill_core::{
    defaults, to_plain_text, Error, EventBus, InferenceBackend, KnowledgeChunk, KnowledgeItem,
    KnowledgeStage, KnowledgeStore, KnowledgeVector, Masker, Notifier, Result, ServerEvent,
    StageChanged, SummarizeOutcome, TokenUsage, UsageRecord, UsageSubType,
};

use crate::config::PipelineConfig;
use crate::request::StageKind;

/// Collaborators every stage attempt needs.
#[derive(Clone)]
pub struct StageRunner {
    store: Arc<dyn KnowledgeStore>,
    provider: Arc<dyn InferenceBackend>,
    notifier: Arc<dyn Notifier>,
    masker: Arc<dyn Masker>,
    events: Option<EventBus>,
    config: PipelineConfig,
}

async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!("{} exceeded {:?}", what, limit))),
    }
}

impl StageRunner {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        provider: Arc<dyn InferenceBackend>,
        notifier: Arc<dyn Notifier>,
        masker: Arc<dyn Masker>,
        events: Option<EventBus>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            provider,
            notifier,
            masker,
            events,
            config,
        }
    }

    /// Run one attempt of `kind` for `item`, with retry bookkeeping on failure.
    ///
    /// The item is reloaded first; a request whose item has already moved
    /// past (or back before) the requested stage is skipped as a no-op. An
    /// item edited while the attempt ran fails with [`Error::StaleItem`]
    /// and keeps the retry counter the edit set.
    pub async fn run(&self, kind: StageKind, item: KnowledgeItem) -> Result<()> {
        let start = Instant::now();
        let current = match self.reload(&item).await {
            Ok(current) => current,
            Err(e) => {
                // Bookkeeping against the snapshot; the stored row may be gone.
                self.record_failure(kind, &item, &e).await;
                return Err(e);
            }
        };

        if current.stage != kind.stage() {
            debug!(
                subsystem = "pipeline",
                component = "stage",
                knowledge_id = %current.id,
                stage = %current.stage,
                requested = %kind,
                "Item no longer at requested stage, skipping"
            );
            return Ok(());
        }

        let result = match kind {
            StageKind::Summarize => self.summarize(&current).await,
            StageKind::Embed => self.embed(&current).await,
        };

        match &result {
            Err(Error::StaleItem(_)) => {
                // The edit already reset stage and retries; the next flush
                // picks the item up with its new content.
                info!(
                    subsystem = "pipeline",
                    component = "stage",
                    op = kind.as_str(),
                    knowledge_id = %current.id,
                    space_id = %current.space_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Item changed during attempt, result discarded"
                );
            }
            Ok(()) => info!(
                subsystem = "pipeline",
                component = "stage",
                op = kind.as_str(),
                knowledge_id = %current.id,
                space_id = %current.space_id,
                duration_ms = start.elapsed().as_millis() as u64,
                "Stage attempt finished"
            ),
            Err(e) => {
                error!(
                    subsystem = "pipeline",
                    component = "stage",
                    op = kind.as_str(),
                    knowledge_id = %current.id,
                    space_id = %current.space_id,
                    retry_times = current.retry_times,
                    transient = e.is_transient(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    error = %e,
                    "Stage attempt failed"
                );
                self.record_failure(kind, &current, e).await;
            }
        }

        result
    }

    async fn reload(&self, item: &KnowledgeItem) -> Result<KnowledgeItem> {
        let limit = Duration::from_secs(defaults::ITEM_LOAD_TIMEOUT_SECS);
        bounded(limit, "item reload", self.store.get(item.space_id, item.id))
            .await?
            .ok_or(Error::KnowledgeNotFound(item.id))
    }

    /// Chunk the item's content with the provider and persist the result.
    #[instrument(skip(self, item), fields(subsystem = "pipeline", component = "stage", op = "summarize", knowledge_id = %item.id))]
    pub async fn summarize(&self, item: &KnowledgeItem) -> Result<()> {
        let text = to_plain_text(&item.content, item.content_type)?;
        let mut session = self.masker.session();
        let masked = session.mask(&text);

        let result = bounded(
            self.config.summarize_timeout(),
            "provider chunk call",
            self.provider.chunk(&masked),
        )
        .await?;
        self.record_usage(item, UsageSubType::Summary, &result.model, result.usage)
            .await;

        debug!(
            model = %result.model,
            title = %result.title,
            tag_count = result.tags.len(),
            chunk_count = result.chunks.len(),
            has_date = !result.date_time.trim().is_empty(),
            "Provider chunk result"
        );

        let fields = item.refresh_fields();
        let mut outcome = SummarizeOutcome::default();

        if fields.title {
            let title = session.unmask(result.title.trim());
            if !title.is_empty() {
                outcome.title = Some(title);
            }
        }
        if fields.tags {
            outcome.tags = Some(result.tags.iter().map(|t| session.unmask(t)).collect());
        }
        if fields.content {
            let texts: Vec<String> = if result.chunks.is_empty() {
                vec![text]
            } else {
                result.chunks.iter().map(|c| session.unmask(c)).collect()
            };
            outcome.chunks = Some(
                texts
                    .into_iter()
                    .map(|chunk| KnowledgeChunk::for_item(item, chunk))
                    .collect(),
            );
        }
        let date = result.date_time.trim();
        if !date.is_empty() {
            outcome.maybe_date = Some(date.to_string());
        }

        let chunk_count = outcome.chunks.as_ref().map(Vec::len);
        bounded(
            Duration::from_secs(defaults::TRANSITION_TIMEOUT_SECS),
            "summarize transition",
            self.store.finish_summarize(item, outcome),
        )
        .await?;

        debug!(?chunk_count, refresh = %fields, "Summarize committed");
        self.notify(item, KnowledgeStage::Embedding).await;
        Ok(())
    }

    /// Embed the item's current chunk set and persist the vectors.
    #[instrument(skip(self, item), fields(subsystem = "pipeline", component = "stage", op = "embed", knowledge_id = %item.id))]
    pub async fn embed(&self, item: &KnowledgeItem) -> Result<()> {
        let (chunks, embeddings) = bounded(self.config.embed_timeout(), "embedding", async {
            let chunks = self.store.list_chunks(item.space_id, item.id).await?;
            let mut session = self.masker.session();
            let title = session.mask(&item.title);
            let texts: Vec<String> = chunks.iter().map(|c| session.mask(&c.chunk)).collect();
            let embeddings = self.provider.embed_document(&title, &texts).await?;
            Ok::<_, Error>((chunks, embeddings))
        })
        .await?;
        self.record_usage(
            item,
            UsageSubType::Embedding,
            &embeddings.model,
            embeddings.usage,
        )
        .await;

        if embeddings.vectors.len() != chunks.len() {
            return Err(Error::DataIntegrity(format!(
                "provider returned {} vectors for {} chunks",
                embeddings.vectors.len(),
                chunks.len()
            )));
        }

        let vectors: Vec<KnowledgeVector> = chunks
            .iter()
            .zip(embeddings.vectors)
            .map(|(chunk, embedding)| KnowledgeVector::for_chunk(item, chunk, embedding))
            .collect();
        let vector_count = vectors.len();

        bounded(
            Duration::from_secs(defaults::TRANSITION_TIMEOUT_SECS),
            "embedding transition",
            self.store.finish_embedding(item, vectors),
        )
        .await?;

        debug!(vector_count, "Embedding committed");
        self.notify(item, KnowledgeStage::Done).await;
        Ok(())
    }

    /// Publish a stage change. Failures are logged; the transition already
    /// committed.
    async fn notify(&self, item: &KnowledgeItem, stage: KnowledgeStage) {
        let limit = Duration::from_secs(defaults::NOTIFY_TIMEOUT_SECS);
        let message = StageChanged::new(item.id, stage);
        if let Err(e) = bounded(limit, "notify", self.notifier.publish(&item.topic(), message)).await
        {
            warn!(
                subsystem = "pipeline",
                component = "notifier",
                knowledge_id = %item.id,
                %stage,
                error = %e,
                "Failed to publish stage change"
            );
        }
    }

    /// Account the tokens of a successful provider call. A provider that
    /// reports no usage records nothing; write failures are logged.
    async fn record_usage(
        &self,
        item: &KnowledgeItem,
        sub_type: UsageSubType,
        model: &str,
        usage: Option<TokenUsage>,
    ) {
        let Some(usage) = usage else {
            return;
        };
        let record = UsageRecord::for_item(item, sub_type, model, usage);
        let limit = Duration::from_secs(defaults::USAGE_RECORD_TIMEOUT_SECS);

        if let Err(e) = bounded(limit, "usage record", self.store.record_usage(&record)).await {
            warn!(
                subsystem = "pipeline",
                component = "usage",
                knowledge_id = %item.id,
                %sub_type,
                model,
                error = %e,
                "Failed to record token usage"
            );
        }
    }

    /// Bump the retry counter after a failed attempt. Best effort: a failure
    /// here is logged and otherwise ignored.
    async fn record_failure(&self, kind: StageKind, item: &KnowledgeItem, cause: &Error) {
        let retry_times = item.retry_times.saturating_add(1);
        let limit = Duration::from_secs(defaults::RETRY_BOOKKEEPING_TIMEOUT_SECS);

        if let Err(e) = bounded(
            limit,
            "retry bookkeeping",
            self.store.set_retry_times(item.space_id, item.id, retry_times),
        )
        .await
        {
            error!(
                subsystem = "pipeline",
                component = "stage",
                op = kind.as_str(),
                knowledge_id = %item.id,
                retry_times,
                error = %e,
                "Failed to record retry"
            );
            return;
        }

        if retry_times > self.config.max_retries {
            warn!(
                subsystem = "pipeline",
                component = "stage",
                op = kind.as_str(),
                knowledge_id = %item.id,
                space_id = %item.space_id,
                stage = %item.stage,
                retry_times,
                max_retries = self.config.max_retries,
                error = %cause,
                "Item exhausted retries and is parked"
            );
            if let Some(events) = &self.events {
                events.emit(
                    item.topic(),
                    ServerEvent::KnowledgeParked {
                        knowledge_id: item.id,
                        stage: item.stage,
                        retry_times,
                    },
                );
            }
        }
    }
}
