//! # quill-db
//!
//! PostgreSQL + pgvector storage for the quill knowledge pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - Repositories for knowledge items, chunks, and chunk vectors
//! - Append-only token usage records
//! - Transactional stage transitions (chunk/vector replacement plus the
//!   stage update commit or roll back together)
//!
//! ## Example
//!
//! ```rust,ignore
//! use quill_db::{Database, KnowledgeRepository, CreateKnowledgeRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/quill").await?;
//!     db.migrate().await?;
//!
//!     let item = db.knowledge.insert(CreateKnowledgeRequest {
//!         space_id: uuid::Uuid::new_v4(),
//!         user_id: "u1".to_string(),
//!         content: "docker deployment notes".to_string(),
//!         ..Default::default()
//!     }).await?;
//!
//!     println!("Created knowledge: {} at {}", item.id, item.stage);
//!     Ok(())
//! }
//! ```
pub mod chunks;
pub mod knowledge;
pub mod pool;
pub mod usage;
pub mod vectors;

// Compiled unconditionally; tests/ needs TestDatabase.
pub mod test_fixtures;

use async_trait::async_trait;
use uuid::Uuid;

pub use quill_core::*;
pub use sqlx::PgPool;

pub use chunks::PgChunkRepository;
pub use knowledge::PgKnowledgeRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use usage::PgUsageRepository;
pub use vectors::PgVectorRepository;

/// Every repository over one pool. Implements [`KnowledgeStore`], so
/// it plugs straight into the pipeline.
#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
    pub knowledge: PgKnowledgeRepository,
    pub chunks: PgChunkRepository,
    pub vectors: PgVectorRepository,
    pub usage: PgUsageRepository,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self {
            knowledge: PgKnowledgeRepository::new(pool.clone()),
            chunks: PgChunkRepository::new(pool.clone()),
            vectors: PgVectorRepository::new(pool.clone()),
            usage: PgUsageRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect with [`PoolConfig::default`].
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl KnowledgeRepository for Database {
    async fn insert(&self, req: CreateKnowledgeRequest) -> Result<KnowledgeItem> {
        self.knowledge.insert(req).await
    }

    async fn get(&self, space_id: Uuid, id: Uuid) -> Result<Option<KnowledgeItem>> {
        self.knowledge.get(space_id, id).await
    }

    async fn list_processing(
        &self,
        max_retries: i32,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<KnowledgeItem>> {
        self.knowledge
            .list_processing(max_retries, page, page_size)
            .await
    }

    async fn count_parked(&self, max_retries: i32) -> Result<i64> {
        self.knowledge.count_parked(max_retries).await
    }

    async fn set_retry_times(&self, space_id: Uuid, id: Uuid, retry_times: i32) -> Result<()> {
        self.knowledge
            .set_retry_times(space_id, id, retry_times)
            .await
    }

    async fn request_refresh(
        &self,
        space_id: Uuid,
        id: Uuid,
        req: UpdateKnowledgeRequest,
        fields: PartialUpdate,
    ) -> Result<()> {
        self.knowledge
            .request_refresh(space_id, id, req, fields)
            .await
    }
}

#[async_trait]
impl ChunkRepository for Database {
    async fn list_chunks(&self, space_id: Uuid, knowledge_id: Uuid) -> Result<Vec<KnowledgeChunk>> {
        self.chunks.list_chunks(space_id, knowledge_id).await
    }

    async fn delete_chunks(&self, space_id: Uuid, knowledge_id: Uuid) -> Result<u64> {
        self.chunks.delete_chunks(space_id, knowledge_id).await
    }

    async fn insert_chunks(&self, chunks: &[KnowledgeChunk]) -> Result<()> {
        self.chunks.insert_chunks(chunks).await
    }
}

#[async_trait]
impl VectorRepository for Database {
    async fn list_vectors(
        &self,
        space_id: Uuid,
        knowledge_id: Uuid,
    ) -> Result<Vec<KnowledgeVector>> {
        self.vectors.list_vectors(space_id, knowledge_id).await
    }

    async fn delete_vectors(&self, space_id: Uuid, knowledge_id: Uuid) -> Result<u64> {
        self.vectors.delete_vectors(space_id, knowledge_id).await
    }

    async fn insert_vectors(&self, vectors: &[KnowledgeVector]) -> Result<()> {
        self.vectors.insert_vectors(vectors).await
    }
}

#[async_trait]
impl UsageRepository for Database {
    async fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        self.usage.record_usage(record).await
    }
}

#[async_trait]
impl StageTransitions for Database {
    async fn finish_summarize(
        &self,
        item: &KnowledgeItem,
        outcome: SummarizeOutcome,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        if let Some(chunks) = &outcome.chunks {
            self.chunks
                .replace_tx(&mut tx, item.space_id, item.id, chunks)
                .await?;
        }
        self.knowledge
            .finish_summarize_tx(&mut tx, item, &outcome)
            .await?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn finish_embedding(
        &self,
        item: &KnowledgeItem,
        vectors: Vec<KnowledgeVector>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        self.vectors
            .replace_tx(&mut tx, item.space_id, item.id, &vectors)
            .await?;
        self.knowledge.finish_embedding_tx(&mut tx, item).await?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}
