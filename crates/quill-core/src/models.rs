//! Core data models for the knowledge ingestion pipeline.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;

/// Embedding vector type (re-exported from pgvector).
pub use pgvector::Vector;

// =============================================================================
// STAGE
// =============================================================================

/// Processing phase of a knowledge item.
///
/// Stages only advance forward (`Summarize` → `Embedding` → `Done`). The edit
/// action is the only path back to `Summarize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeStage {
    /// Waiting for chunking/summarization (initial stage).
    #[default]
    Summarize,
    /// Chunks persisted, waiting for vectors.
    Embedding,
    /// Vectors persisted. Terminal.
    Done,
}

impl KnowledgeStage {
    /// Database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::Embedding => "embedding",
            Self::Done => "done",
        }
    }

    /// The stage a successful attempt advances to. `Done` stays `Done`.
    pub fn next(&self) -> Self {
        match self {
            Self::Summarize => Self::Embedding,
            Self::Embedding | Self::Done => Self::Done,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for KnowledgeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnowledgeStage {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summarize" => Ok(Self::Summarize),
            "embedding" => Ok(Self::Embedding),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid knowledge stage: {}", s)),
        }
    }
}

// =============================================================================
// CONTENT TYPE
// =============================================================================

/// Format of an item's raw content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Markdown,
    Text,
    /// Editor block document (JSON).
    Blocks,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Text => "text",
            Self::Blocks => "blocks",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "text" | "plain" => Ok(Self::Text),
            "blocks" => Ok(Self::Blocks),
            _ => Err(format!("Invalid content type: {}", s)),
        }
    }
}

// =============================================================================
// PARTIAL UPDATE MARKER
// =============================================================================

/// Fields a Summarize run is allowed to overwrite.
///
/// Persisted as a comma-separated marker (`"title,content"`). An item without
/// a marker refreshes every field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialUpdate {
    pub title: bool,
    pub tags: bool,
    pub content: bool,
}

impl Default for PartialUpdate {
    fn default() -> Self {
        Self::all()
    }
}

impl PartialUpdate {
    /// Refresh every field.
    pub fn all() -> Self {
        Self {
            title: true,
            tags: true,
            content: true,
        }
    }

    pub fn none() -> Self {
        Self {
            title: false,
            tags: false,
            content: false,
        }
    }

    /// Parse a stored marker. Unknown names are ignored; an empty marker means
    /// "refresh everything".
    pub fn from_marker(marker: &str) -> Self {
        let fields: HashSet<&str> = marker
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if fields.is_empty() {
            return Self::all();
        }
        Self {
            title: fields.contains("title"),
            tags: fields.contains("tags"),
            content: fields.contains("content"),
        }
    }

    /// Serialize to the stored marker form. An empty set is written as
    /// `"none"` so it is not read back as "refresh everything".
    pub fn to_marker(&self) -> String {
        if !(self.title || self.tags || self.content) {
            return "none".to_string();
        }
        let mut parts = Vec::with_capacity(3);
        if self.title {
            parts.push("title");
        }
        if self.tags {
            parts.push("tags");
        }
        if self.content {
            parts.push("content");
        }
        parts.join(",")
    }

    pub fn is_all(&self) -> bool {
        self.title && self.tags && self.content
    }

    /// Compute which fields the AI should regenerate after a user edit.
    ///
    /// Tags are regenerated when the user left them untouched, chunks when the
    /// content changed, the title when the user cleared it.
    pub fn for_edit(old: &KnowledgeItem, edit: &UpdateKnowledgeRequest) -> Self {
        let tags_changed = match &edit.tags {
            Some(tags) if !tags.is_empty() => {
                let old_tags: HashSet<&String> = old.tags.iter().collect();
                tags.len() != old.tags.len() || tags.iter().any(|t| !old_tags.contains(t))
            }
            _ => false,
        };
        let content_changed = edit
            .content
            .as_ref()
            .is_some_and(|content| content != &old.content);
        let title_empty = edit.title.as_deref().map_or(true, |t| t.trim().is_empty());

        Self {
            title: title_empty,
            tags: !tags_changed,
            content: content_changed,
        }
    }
}

impl fmt::Display for PartialUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_marker())
    }
}

// =============================================================================
// KNOWLEDGE
// =============================================================================

/// The unit of ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: Uuid,
    pub space_id: Uuid,
    pub user_id: String,
    pub resource: String,
    pub content: String,
    pub content_type: ContentType,
    pub stage: KnowledgeStage,
    pub retry_times: i32,
    /// Fields requested for refresh on the next Summarize run.
    #[serde(skip)]
    pub partial_update: Option<PartialUpdate>,
    pub title: String,
    pub tags: Vec<String>,
    /// Approximate event date, `YYYY-MM-DD HH:MM`.
    pub maybe_date: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeItem {
    /// Character count of the raw content, recorded on every chunk and vector.
    pub fn original_length(&self) -> i32 {
        i32::try_from(self.content.chars().count()).unwrap_or(i32::MAX)
    }

    /// Effective refresh set for the next Summarize run.
    pub fn refresh_fields(&self) -> PartialUpdate {
        self.partial_update.unwrap_or_default()
    }

    /// Notification topic for this item's space.
    pub fn topic(&self) -> String {
        stage_topic(self.space_id)
    }
}

/// Notification topic for a space.
pub fn stage_topic(space_id: Uuid) -> String {
    format!("{}{}", defaults::STAGE_TOPIC_PREFIX, space_id)
}

/// Request for creating a knowledge item.
#[derive(Debug, Clone, Default)]
pub struct CreateKnowledgeRequest {
    pub space_id: Uuid,
    pub user_id: String,
    /// Defaults to [`defaults::DEFAULT_RESOURCE`] when empty.
    pub resource: Option<String>,
    pub content: String,
    pub content_type: ContentType,
    /// Defaults to the current local time.
    pub maybe_date: Option<String>,
}

/// Edit action on an existing item. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateKnowledgeRequest {
    pub resource: Option<String>,
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
    pub content: Option<String>,
    pub content_type: Option<ContentType>,
}

/// A slice of an item's content; the unit of embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: Uuid,
    pub knowledge_id: Uuid,
    pub space_id: Uuid,
    pub user_id: String,
    pub chunk: String,
    pub original_length: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeChunk {
    /// Build a fresh chunk row for `item`.
    pub fn for_item(item: &KnowledgeItem, chunk: String) -> Self {
        let now = Utc::now();
        Self {
            id: crate::uuid_utils::new_v7(),
            knowledge_id: item.id,
            space_id: item.space_id,
            user_id: item.user_id.clone(),
            chunk,
            original_length: item.original_length(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Embedding of a single chunk. Shares the chunk's id.
#[derive(Debug, Clone)]
pub struct KnowledgeVector {
    pub id: Uuid,
    pub knowledge_id: Uuid,
    pub space_id: Uuid,
    pub user_id: String,
    pub resource: String,
    pub embedding: Vector,
    pub original_length: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeVector {
    /// Pair a chunk with its embedding.
    pub fn for_chunk(item: &KnowledgeItem, chunk: &KnowledgeChunk, embedding: Vector) -> Self {
        let now = Utc::now();
        Self {
            id: chunk.id,
            knowledge_id: chunk.knowledge_id,
            space_id: chunk.space_id,
            user_id: chunk.user_id.clone(),
            resource: item.resource.clone(),
            embedding,
            original_length: chunk.original_length,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// PROVIDER RESULTS
// =============================================================================

/// Output of the provider's chunk/summarize operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub chunks: Vec<String>,
    /// Time mentioned in the content, `YYYY-MM-DD HH:MM`. Empty when absent.
    #[serde(default)]
    pub date_time: String,
    #[serde(default, skip_serializing)]
    pub model: String,
    #[serde(skip)]
    pub usage: Option<TokenUsage>,
}

/// Output of the provider's document embedding call: one vector per input
/// text, plus the model and token counts for usage accounting.
#[derive(Debug, Clone, Default)]
pub struct DocumentEmbeddings {
    pub vectors: Vec<Vector>,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Token counts reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}

impl TokenUsage {
    /// Sum of two reports, e.g. across embedding batches.
    pub fn combined(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.saturating_add(other.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_add(other.completion_tokens),
        }
    }
}

// =============================================================================
// TOKEN USAGE
// =============================================================================

/// Category of a usage record. Knowledge processing is the only producer.
pub const USAGE_TYPE_KNOWLEDGE: &str = "knowledge";

/// Which provider call a usage record accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageSubType {
    Summary,
    Embedding,
}

impl UsageSubType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Embedding => "embedding",
        }
    }
}

impl fmt::Display for UsageSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of per-call token accounting, attributed to the item's space and
/// owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub space_id: Uuid,
    pub user_id: String,
    pub usage_type: String,
    pub sub_type: UsageSubType,
    /// The knowledge item the call processed.
    pub object_id: Uuid,
    pub model: String,
    pub usage_prompt: i32,
    pub usage_output: i32,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn for_item(
        item: &KnowledgeItem,
        sub_type: UsageSubType,
        model: &str,
        usage: TokenUsage,
    ) -> Self {
        Self {
            space_id: item.space_id,
            user_id: item.user_id.clone(),
            usage_type: USAGE_TYPE_KNOWLEDGE.to_string(),
            sub_type,
            object_id: item.id,
            model: model.to_string(),
            usage_prompt: usage.prompt_tokens,
            usage_output: usage.completion_tokens,
            created_at: Utc::now(),
        }
    }
}

/// Fields persisted by a successful Summarize attempt.
///
/// `None` leaves the stored value untouched; `chunks: None` keeps the current
/// chunk set.
#[derive(Debug, Clone, Default)]
pub struct SummarizeOutcome {
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
    pub maybe_date: Option<String>,
    pub chunks: Option<Vec<KnowledgeChunk>>,
}
