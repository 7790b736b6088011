//! Pipeline event types and the in-process event bus.
//!
//! Stage workers publish through the [`Notifier`] trait. [`EventBus`] is the
//! in-process implementation: it wraps each message in an [`EventEnvelope`]
//! and broadcasts it; downstream consumers (websocket fan-out, logging)
//! subscribe independently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;
use crate::models::KnowledgeStage;
use crate::traits::Notifier;

/// Envelope version for every emitted event.
pub const EVENT_VERSION: &str = "v1";

/// Payload published when an item advances a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageChanged {
    pub knowledge_id: Uuid,
    pub stage: KnowledgeStage,
}

impl StageChanged {
    pub fn new(knowledge_id: Uuid, stage: KnowledgeStage) -> Self {
        Self {
            knowledge_id,
            stage,
        }
    }
}

/// Domain payload of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// An item moved to a new stage.
    StageChanged {
        knowledge_id: Uuid,
        stage: KnowledgeStage,
    },
    /// An item exhausted its retries and will not be retried automatically.
    KnowledgeParked {
        knowledge_id: Uuid,
        stage: KnowledgeStage,
        retry_times: i32,
    },
}

impl ServerEvent {
    /// Subject name carried on the envelope.
    pub fn subject(&self) -> &'static str {
        match self {
            ServerEvent::StageChanged { .. } => "stage_changed",
            ServerEvent::KnowledgeParked { .. } => "knowledge_parked",
        }
    }

    pub fn knowledge_id(&self) -> Uuid {
        match self {
            ServerEvent::StageChanged { knowledge_id, .. }
            | ServerEvent::KnowledgeParked { knowledge_id, .. } => *knowledge_id,
        }
    }
}

impl From<StageChanged> for ServerEvent {
    fn from(msg: StageChanged) -> Self {
        ServerEvent::StageChanged {
            knowledge_id: msg.knowledge_id,
            stage: msg.stage,
        }
    }
}

/// Versioned wrapper around a [`ServerEvent`].
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// UUIDv7 for temporal ordering.
    pub event_id: Uuid,
    /// Pub/sub topic, e.g. `/knowledge/list/{space_id}`.
    pub topic: String,
    pub subject: String,
    pub version: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: ServerEvent,
}

impl EventEnvelope {
    pub fn new(topic: impl Into<String>, event: ServerEvent) -> Self {
        Self {
            event_id: crate::uuid_utils::new_v7(),
            topic: topic.into(),
            subject: event.subject().to_string(),
            version: EVENT_VERSION.to_string(),
            occurred_at: Utc::now(),
            payload: event,
        }
    }
}

/// Broadcast-based event bus.
///
/// Slow receivers that fall behind get a `Lagged` error and miss events;
/// stage notifications are advisory, the store remains the source of truth.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, topic: impl Into<String>, event: ServerEvent) {
        let envelope = EventEnvelope::new(topic, event);
        let subscriber_count = self.tx.receiver_count();
        tracing::debug!(
            topic = %envelope.topic,
            subject = %envelope.subject,
            event_id = %envelope.event_id,
            subscriber_count,
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to receive enveloped events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl Notifier for EventBus {
    async fn publish(&self, topic: &str, message: StageChanged) -> Result<()> {
        self.emit(topic, message.into());
        Ok(())
    }
}
