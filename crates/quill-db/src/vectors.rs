//! Chunk embedding repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use quill_core::{Error, KnowledgeVector, Result, VectorRepository};

/// PostgreSQL implementation of VectorRepository.
#[derive(Clone)]
pub struct PgVectorRepository {
    pool: Pool<Postgres>,
}

impl PgVectorRepository {
    /// Create a new PgVectorRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn delete_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        space_id: Uuid,
        knowledge_id: Uuid,
    ) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM knowledge_vector WHERE space_id = $1 AND knowledge_id = $2")
                .bind(space_id)
                .bind(knowledge_id)
                .execute(&mut **tx)
                .await
                .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    pub async fn insert_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        vectors: &[KnowledgeVector],
    ) -> Result<()> {
        for v in vectors {
            sqlx::query(
                "INSERT INTO knowledge_vector
                     (id, knowledge_id, space_id, user_id, resource, embedding, original_length,
                      created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(v.id)
            .bind(v.knowledge_id)
            .bind(v.space_id)
            .bind(&v.user_id)
            .bind(&v.resource)
            .bind(&v.embedding)
            .bind(v.original_length)
            .bind(v.created_at)
            .bind(v.updated_at)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        }
        Ok(())
    }

    /// Replace an item's vector set wholesale within a transaction.
    pub async fn replace_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        space_id: Uuid,
        knowledge_id: Uuid,
        vectors: &[KnowledgeVector],
    ) -> Result<()> {
        self.delete_tx(tx, space_id, knowledge_id).await?;
        self.insert_tx(tx, vectors).await
    }
}

#[async_trait]
impl VectorRepository for PgVectorRepository {
    async fn list_vectors(
        &self,
        space_id: Uuid,
        knowledge_id: Uuid,
    ) -> Result<Vec<KnowledgeVector>> {
        let rows = sqlx::query(
            "SELECT id, knowledge_id, space_id, user_id, resource, embedding, original_length,
                    created_at, updated_at
             FROM knowledge_vector
             WHERE space_id = $1 AND knowledge_id = $2
             ORDER BY id",
        )
        .bind(space_id)
        .bind(knowledge_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let vectors = rows
            .into_iter()
            .map(|row| KnowledgeVector {
                id: row.get("id"),
                knowledge_id: row.get("knowledge_id"),
                space_id: row.get("space_id"),
                user_id: row.get("user_id"),
                resource: row.get("resource"),
                embedding: row.get("embedding"),
                original_length: row.get("original_length"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect();

        Ok(vectors)
    }

    async fn delete_vectors(&self, space_id: Uuid, knowledge_id: Uuid) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let removed = self.delete_tx(&mut tx, space_id, knowledge_id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(removed)
    }

    async fn insert_vectors(&self, vectors: &[KnowledgeVector]) -> Result<()> {
        if vectors.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        self.insert_tx(&mut tx, vectors).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}
