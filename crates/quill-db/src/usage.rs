//! Token usage repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use quill_core::{Error, Result, UsageRecord, UsageRepository, UsageSubType};

/// PostgreSQL implementation of UsageRepository.
#[derive(Clone)]
pub struct PgUsageRepository {
    pool: Pool<Postgres>,
}

impl PgUsageRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Usage rows recorded for one object, oldest first.
    pub async fn list_for_object(&self, object_id: Uuid) -> Result<Vec<UsageRecord>> {
        let rows = sqlx::query(
            "SELECT space_id, user_id, type, sub_type, object_id, model, usage_prompt,
                    usage_output, created_at
             FROM ai_token_usage
             WHERE object_id = $1
             ORDER BY id",
        )
        .bind(object_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter()
            .map(|row| {
                let sub_type: String = row.get("sub_type");
                let sub_type = match sub_type.as_str() {
                    "summary" => UsageSubType::Summary,
                    "embedding" => UsageSubType::Embedding,
                    other => {
                        return Err(Error::Serialization(format!(
                            "unknown usage sub_type: {}",
                            other
                        )))
                    }
                };
                Ok(UsageRecord {
                    space_id: row.get("space_id"),
                    user_id: row.get("user_id"),
                    usage_type: row.get("type"),
                    sub_type,
                    object_id: row.get("object_id"),
                    model: row.get("model"),
                    usage_prompt: row.get("usage_prompt"),
                    usage_output: row.get("usage_output"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl UsageRepository for PgUsageRepository {
    async fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO ai_token_usage
                 (space_id, user_id, type, sub_type, object_id, model, usage_prompt,
                  usage_output, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(record.space_id)
        .bind(&record.user_id)
        .bind(&record.usage_type)
        .bind(record.sub_type.as_str())
        .bind(record.object_id)
        .bind(&record.model)
        .bind(record.usage_prompt)
        .bind(record.usage_output)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
