//! Knowledge chunk repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use quill_core::{ChunkRepository, Error, KnowledgeChunk, Result};

/// PostgreSQL implementation of ChunkRepository.
#[derive(Clone)]
pub struct PgChunkRepository {
    pool: Pool<Postgres>,
}

impl PgChunkRepository {
    /// Create a new PgChunkRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Delete every chunk of an item within a transaction.
    pub async fn delete_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        space_id: Uuid,
        knowledge_id: Uuid,
    ) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM knowledge_chunk WHERE space_id = $1 AND knowledge_id = $2")
                .bind(space_id)
                .bind(knowledge_id)
                .execute(&mut **tx)
                .await
                .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    /// Insert a batch of chunks within a transaction.
    pub async fn insert_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        chunks: &[KnowledgeChunk],
    ) -> Result<()> {
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO knowledge_chunk
                     (id, knowledge_id, space_id, user_id, chunk, original_length, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(chunk.id)
            .bind(chunk.knowledge_id)
            .bind(chunk.space_id)
            .bind(&chunk.user_id)
            .bind(&chunk.chunk)
            .bind(chunk.original_length)
            .bind(chunk.created_at)
            .bind(chunk.updated_at)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        }
        Ok(())
    }

    /// Replace an item's chunk set wholesale within a transaction.
    pub async fn replace_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        space_id: Uuid,
        knowledge_id: Uuid,
        chunks: &[KnowledgeChunk],
    ) -> Result<()> {
        self.delete_tx(tx, space_id, knowledge_id).await?;
        self.insert_tx(tx, chunks).await
    }
}

#[async_trait]
impl ChunkRepository for PgChunkRepository {
    async fn list_chunks(&self, space_id: Uuid, knowledge_id: Uuid) -> Result<Vec<KnowledgeChunk>> {
        let rows = sqlx::query(
            "SELECT id, knowledge_id, space_id, user_id, chunk, original_length, created_at, updated_at
             FROM knowledge_chunk
             WHERE space_id = $1 AND knowledge_id = $2
             ORDER BY id",
        )
        .bind(space_id)
        .bind(knowledge_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let chunks = rows
            .into_iter()
            .map(|row| KnowledgeChunk {
                id: row.get("id"),
                knowledge_id: row.get("knowledge_id"),
                space_id: row.get("space_id"),
                user_id: row.get("user_id"),
                chunk: row.get("chunk"),
                original_length: row.get("original_length"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect();

        Ok(chunks)
    }

    async fn delete_chunks(&self, space_id: Uuid, knowledge_id: Uuid) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let removed = self.delete_tx(&mut tx, space_id, knowledge_id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(removed)
    }

    async fn insert_chunks(&self, chunks: &[KnowledgeChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        self.insert_tx(&mut tx, chunks).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}
