//! Shared fixtures for pipeline integration tests: an in-memory store with
//! transactional semantics and a notifier that records every publish.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use quill_core::{
    defaults, ChunkRepository, CreateKnowledgeRequest, Error, KnowledgeChunk, KnowledgeItem,
    KnowledgeRepository, KnowledgeStage, KnowledgeVector, Notifier, PartialUpdate, Result,
    StageChanged, StageTransitions, SummarizeOutcome, UpdateKnowledgeRequest, UsageRecord,
    UsageRepository, VectorRepository,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Default)]
struct Tables {
    items: HashMap<Uuid, KnowledgeItem>,
    chunks: Vec<KnowledgeChunk>,
    vectors: Vec<KnowledgeVector>,
    usage: Vec<UsageRecord>,
}

/// In-memory `KnowledgeStore`. Transitions apply all writes under one lock
/// or none.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_transitions: Arc<AtomicBool>,
    fail_usage: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every stage transition fail with a database-style error.
    pub fn set_fail_transitions(&self, fail: bool) {
        self.fail_transitions.store(fail, Ordering::SeqCst);
    }

    /// Make every usage write fail.
    pub fn set_fail_usage(&self, fail: bool) {
        self.fail_usage.store(fail, Ordering::SeqCst);
    }

    pub fn usage_of(&self, id: Uuid) -> Vec<UsageRecord> {
        lock(&self.tables)
            .usage
            .iter()
            .filter(|u| u.object_id == id)
            .cloned()
            .collect()
    }

    pub fn item(&self, id: Uuid) -> KnowledgeItem {
        lock(&self.tables).items[&id].clone()
    }

    pub fn chunks_of(&self, id: Uuid) -> Vec<KnowledgeChunk> {
        lock(&self.tables)
            .chunks
            .iter()
            .filter(|c| c.knowledge_id == id)
            .cloned()
            .collect()
    }

    pub fn vectors_of(&self, id: Uuid) -> Vec<KnowledgeVector> {
        lock(&self.tables)
            .vectors
            .iter()
            .filter(|v| v.knowledge_id == id)
            .cloned()
            .collect()
    }

    /// Insert directly at an arbitrary stage, bypassing the repository.
    pub fn seed(&self, content: &str, stage: KnowledgeStage, retry_times: i32) -> KnowledgeItem {
        let now = Utc::now();
        let item = KnowledgeItem {
            id: quill_core::new_v7(),
            space_id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            resource: defaults::DEFAULT_RESOURCE.to_string(),
            content: content.to_string(),
            content_type: Default::default(),
            stage,
            retry_times,
            partial_update: None,
            title: String::new(),
            tags: Vec::new(),
            maybe_date: "2026-01-01 09:00".to_string(),
            created_at: now,
            updated_at: now,
        };
        lock(&self.tables).items.insert(item.id, item.clone());
        item
    }

    /// Store chunks for an item directly.
    pub fn seed_chunks(&self, item: &KnowledgeItem, texts: &[&str]) -> Vec<KnowledgeChunk> {
        let chunks: Vec<_> = texts
            .iter()
            .map(|t| KnowledgeChunk::for_item(item, t.to_string()))
            .collect();
        lock(&self.tables).chunks.extend(chunks.iter().cloned());
        chunks
    }

    /// A transition only applies to the row it was computed from.
    fn check_snapshot(
        tables: &Tables,
        item: &KnowledgeItem,
        expected: KnowledgeStage,
    ) -> Result<()> {
        let row = tables
            .items
            .get(&item.id)
            .ok_or(Error::KnowledgeNotFound(item.id))?;
        if row.stage != expected || row.updated_at != item.updated_at {
            return Err(Error::StaleItem(item.id));
        }
        Ok(())
    }

    fn check_transition(&self) -> Result<()> {
        if self.fail_transitions.load(Ordering::SeqCst) {
            Err(Error::Internal("simulated transaction failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KnowledgeRepository for InMemoryStore {
    async fn insert(&self, req: CreateKnowledgeRequest) -> Result<KnowledgeItem> {
        let now = Utc::now();
        let item = KnowledgeItem {
            id: quill_core::new_v7(),
            space_id: req.space_id,
            user_id: req.user_id,
            resource: req
                .resource
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| defaults::DEFAULT_RESOURCE.to_string()),
            content: req.content,
            content_type: req.content_type,
            stage: KnowledgeStage::Summarize,
            retry_times: 0,
            partial_update: None,
            title: String::new(),
            tags: Vec::new(),
            maybe_date: req.maybe_date.unwrap_or_else(|| {
                chrono::Local::now()
                    .format(defaults::MAYBE_DATE_FORMAT)
                    .to_string()
            }),
            created_at: now,
            updated_at: now,
        };
        lock(&self.tables).items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn get(&self, space_id: Uuid, id: Uuid) -> Result<Option<KnowledgeItem>> {
        Ok(lock(&self.tables)
            .items
            .get(&id)
            .filter(|i| i.space_id == space_id)
            .cloned())
    }

    async fn list_processing(
        &self,
        max_retries: i32,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<KnowledgeItem>> {
        let mut items: Vec<_> = lock(&self.tables)
            .items
            .values()
            .filter(|i| !i.stage.is_done() && i.retry_times <= max_retries)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.updated_at);
        let offset = ((page.max(1) - 1) * page_size) as usize;
        Ok(items
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect())
    }

    async fn count_parked(&self, max_retries: i32) -> Result<i64> {
        Ok(lock(&self.tables)
            .items
            .values()
            .filter(|i| !i.stage.is_done() && i.retry_times > max_retries)
            .count() as i64)
    }

    async fn set_retry_times(&self, _space_id: Uuid, id: Uuid, retry_times: i32) -> Result<()> {
        let mut tables = lock(&self.tables);
        let item = tables
            .items
            .get_mut(&id)
            .ok_or(Error::KnowledgeNotFound(id))?;
        item.retry_times = retry_times;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn request_refresh(
        &self,
        _space_id: Uuid,
        id: Uuid,
        req: UpdateKnowledgeRequest,
        fields: PartialUpdate,
    ) -> Result<()> {
        let mut tables = lock(&self.tables);
        let item = tables
            .items
            .get_mut(&id)
            .ok_or(Error::KnowledgeNotFound(id))?;
        if let Some(resource) = req.resource {
            item.resource = resource;
        }
        if let Some(title) = req.title {
            item.title = title;
        }
        if let Some(tags) = req.tags {
            item.tags = tags;
        }
        if let Some(content) = req.content {
            item.content = content;
        }
        if let Some(content_type) = req.content_type {
            item.content_type = content_type;
        }
        item.stage = KnowledgeStage::Summarize;
        item.retry_times = 0;
        item.partial_update = if fields.is_all() { None } else { Some(fields) };
        item.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ChunkRepository for InMemoryStore {
    async fn list_chunks(&self, _space_id: Uuid, knowledge_id: Uuid) -> Result<Vec<KnowledgeChunk>> {
        Ok(self.chunks_of(knowledge_id))
    }

    async fn delete_chunks(&self, _space_id: Uuid, knowledge_id: Uuid) -> Result<u64> {
        let mut tables = lock(&self.tables);
        let before = tables.chunks.len();
        tables.chunks.retain(|c| c.knowledge_id != knowledge_id);
        Ok((before - tables.chunks.len()) as u64)
    }

    async fn insert_chunks(&self, chunks: &[KnowledgeChunk]) -> Result<()> {
        lock(&self.tables).chunks.extend(chunks.iter().cloned());
        Ok(())
    }
}

#[async_trait]
impl VectorRepository for InMemoryStore {
    async fn list_vectors(
        &self,
        _space_id: Uuid,
        knowledge_id: Uuid,
    ) -> Result<Vec<KnowledgeVector>> {
        Ok(self.vectors_of(knowledge_id))
    }

    async fn delete_vectors(&self, _space_id: Uuid, knowledge_id: Uuid) -> Result<u64> {
        let mut tables = lock(&self.tables);
        let before = tables.vectors.len();
        tables.vectors.retain(|v| v.knowledge_id != knowledge_id);
        Ok((before - tables.vectors.len()) as u64)
    }

    async fn insert_vectors(&self, vectors: &[KnowledgeVector]) -> Result<()> {
        lock(&self.tables).vectors.extend(vectors.iter().cloned());
        Ok(())
    }
}

#[async_trait]
impl UsageRepository for InMemoryStore {
    async fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        if self.fail_usage.load(Ordering::SeqCst) {
            return Err(Error::Internal("simulated usage write failure".to_string()));
        }
        lock(&self.tables).usage.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl StageTransitions for InMemoryStore {
    async fn finish_summarize(
        &self,
        item: &KnowledgeItem,
        outcome: SummarizeOutcome,
    ) -> Result<()> {
        self.check_transition()?;
        let mut tables = lock(&self.tables);
        Self::check_snapshot(&tables, item, KnowledgeStage::Summarize)?;
        if let Some(chunks) = outcome.chunks {
            tables.chunks.retain(|c| c.knowledge_id != item.id);
            tables.chunks.extend(chunks);
        }
        let row = tables
            .items
            .get_mut(&item.id)
            .ok_or(Error::KnowledgeNotFound(item.id))?;
        if let Some(title) = outcome.title {
            row.title = title;
        }
        if let Some(tags) = outcome.tags {
            row.tags = tags;
        }
        if let Some(date) = outcome.maybe_date {
            row.maybe_date = date;
        }
        row.stage = KnowledgeStage::Embedding;
        row.retry_times = 0;
        row.partial_update = None;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn finish_embedding(
        &self,
        item: &KnowledgeItem,
        vectors: Vec<KnowledgeVector>,
    ) -> Result<()> {
        self.check_transition()?;
        let mut tables = lock(&self.tables);
        Self::check_snapshot(&tables, item, KnowledgeStage::Embedding)?;
        tables.vectors.retain(|v| v.knowledge_id != item.id);
        tables.vectors.extend(vectors);
        let row = tables
            .items
            .get_mut(&item.id)
            .ok_or(Error::KnowledgeNotFound(item.id))?;
        row.stage = KnowledgeStage::Done;
        row.retry_times = 0;
        row.updated_at = Utc::now();
        Ok(())
    }
}

/// Records every publish in order.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    published: Arc<Mutex<Vec<(String, StageChanged)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, StageChanged)> {
        lock(&self.published).clone()
    }

    pub fn for_item(&self, id: Uuid) -> Vec<StageChanged> {
        lock(&self.published)
            .iter()
            .filter(|(_, m)| m.knowledge_id == id)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, topic: &str, message: StageChanged) -> Result<()> {
        lock(&self.published).push((topic.to_string(), message));
        Ok(())
    }
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn eventually<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
