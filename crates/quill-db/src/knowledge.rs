//! Knowledge item repository implementation.

use async_trait::async_trait;
use chrono::{Local, Utc};
use sqlx::{postgres::PgRow, Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use quill_core::{
    defaults, new_v7, ContentType, CreateKnowledgeRequest, Error, KnowledgeItem,
    KnowledgeRepository, KnowledgeStage, PartialUpdate, Result, SummarizeOutcome,
    UpdateKnowledgeRequest,
};

const KNOWLEDGE_COLUMNS: &str = "id, space_id, user_id, resource, content, content_type, title, \
     tags, stage, retry_times, refresh_fields, maybe_date, created_at, updated_at";

/// PostgreSQL implementation of KnowledgeRepository.
#[derive(Clone)]
pub struct PgKnowledgeRepository {
    pool: Pool<Postgres>,
}

impl PgKnowledgeRepository {
    /// Create a new PgKnowledgeRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_knowledge_row(row: PgRow) -> Result<KnowledgeItem> {
        let stage: String = row.get("stage");
        let stage = stage
            .parse::<KnowledgeStage>()
            .map_err(Error::DataIntegrity)?;
        let content_type: String = row.get("content_type");
        let refresh_fields: Option<String> = row.get("refresh_fields");

        Ok(KnowledgeItem {
            id: row.get("id"),
            space_id: row.get("space_id"),
            user_id: row.get("user_id"),
            resource: row.get("resource"),
            content: row.get("content"),
            content_type: content_type.parse::<ContentType>().unwrap_or_default(),
            stage,
            retry_times: row.get("retry_times"),
            partial_update: refresh_fields.as_deref().map(PartialUpdate::from_marker),
            title: row.get("title"),
            tags: row.get("tags"),
            maybe_date: row.get("maybe_date"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Persist Summarize results and advance to `Embedding` within a
    /// transaction. Fields left `None` in `outcome` keep their stored value.
    ///
    /// Only applies while the row still matches `item` (same stage and
    /// `updated_at`); otherwise fails with [`Error::StaleItem`].
    pub async fn finish_summarize_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        item: &KnowledgeItem,
        outcome: &SummarizeOutcome,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE knowledge
             SET title = COALESCE($3, title),
                 tags = COALESCE($4::text[], tags),
                 maybe_date = COALESCE($5, maybe_date),
                 stage = $6,
                 retry_times = 0,
                 refresh_fields = NULL,
                 updated_at = NOW()
             WHERE space_id = $1 AND id = $2 AND stage = $7 AND updated_at = $8",
        )
        .bind(item.space_id)
        .bind(item.id)
        .bind(outcome.title.as_deref())
        .bind(outcome.tags.as_ref())
        .bind(outcome.maybe_date.as_deref())
        .bind(KnowledgeStage::Embedding.as_str())
        .bind(KnowledgeStage::Summarize.as_str())
        .bind(item.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Self::missing_or_stale(tx, item).await);
        }
        Ok(())
    }

    /// Advance an item to `Done` within a transaction.
    pub async fn finish_embedding_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        item: &KnowledgeItem,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE knowledge
             SET stage = $3, retry_times = 0, updated_at = NOW()
             WHERE space_id = $1 AND id = $2 AND stage = $4 AND updated_at = $5",
        )
        .bind(item.space_id)
        .bind(item.id)
        .bind(KnowledgeStage::Done.as_str())
        .bind(KnowledgeStage::Embedding.as_str())
        .bind(item.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Self::missing_or_stale(tx, item).await);
        }
        Ok(())
    }

    /// Classify a transition that matched no row: the item is either gone or
    /// no longer the snapshot the attempt started from.
    async fn missing_or_stale(tx: &mut Transaction<'_, Postgres>, item: &KnowledgeItem) -> Error {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM knowledge WHERE space_id = $1 AND id = $2)",
        )
        .bind(item.space_id)
        .bind(item.id)
        .fetch_one(&mut **tx)
        .await;

        match exists {
            Ok(true) => Error::StaleItem(item.id),
            Ok(false) => Error::KnowledgeNotFound(item.id),
            Err(e) => Error::Database(e),
        }
    }
}

#[async_trait]
impl KnowledgeRepository for PgKnowledgeRepository {
    async fn insert(&self, req: CreateKnowledgeRequest) -> Result<KnowledgeItem> {
        let id = new_v7();
        let now = Utc::now();
        let resource = req
            .resource
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| defaults::DEFAULT_RESOURCE.to_string());
        let maybe_date = req
            .maybe_date
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| Local::now().format(defaults::MAYBE_DATE_FORMAT).to_string());

        let row = sqlx::query(&format!(
            "INSERT INTO knowledge
                 (id, space_id, user_id, resource, content, content_type, stage, retry_times,
                  maybe_date, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $9)
             RETURNING {}",
            KNOWLEDGE_COLUMNS
        ))
        .bind(id)
        .bind(req.space_id)
        .bind(&req.user_id)
        .bind(&resource)
        .bind(&req.content)
        .bind(req.content_type.as_str())
        .bind(KnowledgeStage::Summarize.as_str())
        .bind(&maybe_date)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_knowledge_row(row)
    }

    async fn get(&self, space_id: Uuid, id: Uuid) -> Result<Option<KnowledgeItem>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM knowledge WHERE space_id = $1 AND id = $2",
            KNOWLEDGE_COLUMNS
        ))
        .bind(space_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_knowledge_row).transpose()
    }

    async fn list_processing(
        &self,
        max_retries: i32,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<KnowledgeItem>> {
        let page = page.max(1);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM knowledge
             WHERE stage <> $1 AND retry_times <= $2
             ORDER BY updated_at ASC
             LIMIT $3 OFFSET $4",
            KNOWLEDGE_COLUMNS
        ))
        .bind(KnowledgeStage::Done.as_str())
        .bind(max_retries)
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_knowledge_row).collect()
    }

    async fn count_parked(&self, max_retries: i32) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM knowledge WHERE stage <> $1 AND retry_times > $2",
        )
        .bind(KnowledgeStage::Done.as_str())
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }

    async fn set_retry_times(&self, space_id: Uuid, id: Uuid, retry_times: i32) -> Result<()> {
        sqlx::query(
            "UPDATE knowledge SET retry_times = $3, updated_at = NOW()
             WHERE space_id = $1 AND id = $2",
        )
        .bind(space_id)
        .bind(id)
        .bind(retry_times)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn request_refresh(
        &self,
        space_id: Uuid,
        id: Uuid,
        req: UpdateKnowledgeRequest,
        fields: PartialUpdate,
    ) -> Result<()> {
        let marker = if fields.is_all() {
            None
        } else {
            Some(fields.to_marker())
        };

        let result = sqlx::query(
            "UPDATE knowledge
             SET resource = COALESCE($3, resource),
                 title = COALESCE($4, title),
                 tags = COALESCE($5::text[], tags),
                 content = COALESCE($6, content),
                 content_type = COALESCE($7, content_type),
                 stage = $8,
                 retry_times = 0,
                 refresh_fields = $9,
                 updated_at = NOW()
             WHERE space_id = $1 AND id = $2",
        )
        .bind(space_id)
        .bind(id)
        .bind(req.resource.as_deref())
        .bind(req.title.as_deref())
        .bind(req.tags.as_ref())
        .bind(req.content.as_deref())
        .bind(req.content_type.map(|c| c.as_str()))
        .bind(KnowledgeStage::Summarize.as_str())
        .bind(marker)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::KnowledgeNotFound(id));
        }
        Ok(())
    }
}
