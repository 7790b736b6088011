//! Ingestion facade: create and edit items, then drive them through the
//! pipeline.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use uuid::Uuid;

use quill_core::{
    defaults, CreateKnowledgeRequest, Error, KnowledgeItem, KnowledgeStore, PartialUpdate, Result,
    UpdateKnowledgeRequest,
};

use crate::pipeline::Pipeline;

/// How `insert_content` waits for processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IngestMode {
    /// Wait for both stages and return their errors.
    Sync,
    /// Return right after creation; processing continues in the background.
    #[default]
    Async,
}

#[derive(Clone)]
pub struct KnowledgeIngest {
    store: Arc<dyn KnowledgeStore>,
    pipeline: Arc<Pipeline>,
    stage_wait: Duration,
}

impl KnowledgeIngest {
    pub fn new(store: Arc<dyn KnowledgeStore>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            store,
            pipeline,
            stage_wait: Duration::from_secs(defaults::INGEST_STAGE_WAIT_SECS),
        }
    }

    /// How long sync mode waits on each stage.
    pub fn with_stage_wait(mut self, wait: Duration) -> Self {
        self.stage_wait = wait;
        self
    }

    /// Create an item at `Summarize` and process it.
    ///
    /// In sync mode the returned item reflects the final stored state.
    pub async fn insert_content(
        &self,
        req: CreateKnowledgeRequest,
        mode: IngestMode,
    ) -> Result<KnowledgeItem> {
        if req.content.trim().is_empty() {
            return Err(Error::InvalidInput("content must not be empty".to_string()));
        }

        let item = self.store.insert(req).await?;
        info!(
            subsystem = "pipeline",
            component = "ingest",
            knowledge_id = %item.id,
            space_id = %item.space_id,
            ?mode,
            "Knowledge created"
        );

        match mode {
            IngestMode::Sync => {
                self.process(item.clone()).await?;
                self.load(item.space_id, item.id).await
            }
            IngestMode::Async => {
                self.spawn_process(item.clone());
                Ok(item)
            }
        }
    }

    /// Apply a user edit, reset the item to `Summarize`, and reprocess it in
    /// the background.
    ///
    /// Only fields the edit leaves to the AI are regenerated on the next run.
    pub async fn update_content(
        &self,
        space_id: Uuid,
        id: Uuid,
        req: UpdateKnowledgeRequest,
    ) -> Result<KnowledgeItem> {
        let old = self.load(space_id, id).await?;
        let fields = PartialUpdate::for_edit(&old, &req);
        self.store.request_refresh(space_id, id, req, fields).await?;
        let item = self.load(space_id, id).await?;

        info!(
            subsystem = "pipeline",
            component = "ingest",
            knowledge_id = %id,
            %space_id,
            refresh = %fields,
            "Knowledge edited, re-queued"
        );

        self.spawn_process(item.clone());
        Ok(item)
    }

    fn spawn_process(&self, item: KnowledgeItem) {
        let this = self.clone();
        tokio::spawn(async move {
            let knowledge_id = item.id;
            if let Err(e) = this.process(item).await {
                error!(
                    subsystem = "pipeline",
                    component = "ingest",
                    %knowledge_id,
                    error = %e,
                    "Background processing failed; the flusher will retry"
                );
            }
        });
    }

    /// Run both stages for `item`, waiting on each.
    pub async fn process(&self, item: KnowledgeItem) -> Result<()> {
        self.pipeline
            .submit_summary(item.clone())
            .await?
            .wait(self.stage_wait)
            .await?;

        let item = self.load(item.space_id, item.id).await?;
        self.pipeline
            .submit_embedding(item)
            .await?
            .wait(self.stage_wait)
            .await
    }

    async fn load(&self, space_id: Uuid, id: Uuid) -> Result<KnowledgeItem> {
        self.store
            .get(space_id, id)
            .await?
            .ok_or(Error::KnowledgeNotFound(id))
    }
}
