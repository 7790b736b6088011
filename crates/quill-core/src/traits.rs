//! Core traits for quill's collaborators.
//!
//! The pipeline only talks to stores, the AI provider, the notifier, and the
//! masking collaborator through these interfaces, so each can be swapped for
//! an in-memory double in tests.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::events::StageChanged;
use crate::models::*;

// =============================================================================
// STORE TRAITS
// =============================================================================

/// Repository for knowledge item rows.
#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    /// Create an item at `Summarize` with zero retries.
    async fn insert(&self, req: CreateKnowledgeRequest) -> Result<KnowledgeItem>;

    /// Fetch an item by id within a space.
    async fn get(&self, space_id: Uuid, id: Uuid) -> Result<Option<KnowledgeItem>>;

    /// Items not yet `Done` with `retry_times <= max_retries`, oldest update
    /// first. `page` is 1-based.
    async fn list_processing(
        &self,
        max_retries: i32,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<KnowledgeItem>>;

    /// Number of unfinished items that exhausted their retries.
    async fn count_parked(&self, max_retries: i32) -> Result<i64>;

    /// Overwrite the retry counter.
    async fn set_retry_times(&self, space_id: Uuid, id: Uuid, retry_times: i32) -> Result<()>;

    /// Apply a user edit and send the item back to `Summarize` with zero
    /// retries and the given refresh marker.
    async fn request_refresh(
        &self,
        space_id: Uuid,
        id: Uuid,
        req: UpdateKnowledgeRequest,
        fields: PartialUpdate,
    ) -> Result<()>;
}

/// Repository for knowledge chunks.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Current chunk set of an item, in creation order.
    async fn list_chunks(&self, space_id: Uuid, knowledge_id: Uuid) -> Result<Vec<KnowledgeChunk>>;

    /// Delete every chunk of an item. Returns the number of rows removed.
    async fn delete_chunks(&self, space_id: Uuid, knowledge_id: Uuid) -> Result<u64>;

    /// Insert a batch of chunks.
    async fn insert_chunks(&self, chunks: &[KnowledgeChunk]) -> Result<()>;
}

/// Repository for chunk embeddings.
#[async_trait]
pub trait VectorRepository: Send + Sync {
    /// Current vector set of an item.
    async fn list_vectors(&self, space_id: Uuid, knowledge_id: Uuid)
        -> Result<Vec<KnowledgeVector>>;

    /// Delete every vector of an item. Returns the number of rows removed.
    async fn delete_vectors(&self, space_id: Uuid, knowledge_id: Uuid) -> Result<u64>;

    /// Insert a batch of vectors.
    async fn insert_vectors(&self, vectors: &[KnowledgeVector]) -> Result<()>;
}

/// Transactional stage transitions.
///
/// Each method either applies every write or none of them; on error the item
/// stays exactly at its pre-attempt stage. Writes apply only while the
/// stored row still matches `item` (same stage and `updated_at`); a row
/// edited mid-attempt yields [`crate::Error::StaleItem`].
#[async_trait]
pub trait StageTransitions: Send + Sync {
    /// Replace the chunk set (when `outcome.chunks` is set), store
    /// title/tags/date, clear the refresh marker, and move the item to
    /// `Embedding` with zero retries.
    async fn finish_summarize(&self, item: &KnowledgeItem, outcome: SummarizeOutcome)
        -> Result<()>;

    /// Replace the vector set and move the item to `Done` with zero retries.
    async fn finish_embedding(
        &self,
        item: &KnowledgeItem,
        vectors: Vec<KnowledgeVector>,
    ) -> Result<()>;
}

/// Append-only token accounting.
#[async_trait]
pub trait UsageRepository: Send + Sync {
    async fn record_usage(&self, record: &UsageRecord) -> Result<()>;
}

/// Everything the pipeline needs from persistence.
pub trait KnowledgeStore:
    KnowledgeRepository + ChunkRepository + VectorRepository + StageTransitions + UsageRepository
{
}

impl<T> KnowledgeStore for T where
    T: KnowledgeRepository
        + ChunkRepository
        + VectorRepository
        + StageTransitions
        + UsageRepository
{
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend that splits content into chunks and extracts title/tags/date.
#[async_trait]
pub trait ChunkingBackend: Send + Sync {
    async fn chunk(&self, text: &str) -> Result<ChunkResult>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Backend for generating document embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a batch of document chunks.
    ///
    /// On success `vectors` holds exactly one vector per input text.
    async fn embed_document(&self, title: &str, texts: &[String]) -> Result<DocumentEmbeddings>;

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Combined AI provider.
#[async_trait]
pub trait InferenceBackend: ChunkingBackend + EmbeddingBackend {
    /// Check if the backend is available and responding.
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// NOTIFICATION
// =============================================================================

/// Pub/sub channel for stage-change events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &str, message: StageChanged) -> Result<()>;
}

// =============================================================================
// MASKING
// =============================================================================

/// One masking round trip. Tokens produced by `mask` are reversed by
/// `unmask` on the same session only.
pub trait MaskSession: Send {
    fn mask(&mut self, text: &str) -> String;

    fn unmask(&self, text: &str) -> String;
}

/// Factory for masking sessions; one session per stage attempt.
pub trait Masker: Send + Sync {
    fn session(&self) -> Box<dyn MaskSession>;
}
