//! Processing requests and their completion signals.

use std::fmt;
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use quill_core::{Error, KnowledgeItem, KnowledgeStage, Result};

/// Which stage a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Summarize,
    Embed,
}

impl StageKind {
    /// Stage an item must be at for this request to apply.
    pub fn stage(&self) -> KnowledgeStage {
        match self {
            StageKind::Summarize => KnowledgeStage::Summarize,
            StageKind::Embed => KnowledgeStage::Embedding,
        }
    }

    /// Request kind for an item at `stage`; `None` once the item is done.
    pub fn for_stage(stage: KnowledgeStage) -> Option<Self> {
        match stage {
            KnowledgeStage::Summarize => Some(StageKind::Summarize),
            KnowledgeStage::Embedding => Some(StageKind::Embed),
            KnowledgeStage::Done => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Summarize => "summarize",
            StageKind::Embed => "embed",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued unit of work.
#[derive(Debug)]
pub struct ProcessingRequest {
    pub kind: StageKind,
    pub item: KnowledgeItem,
    pub(crate) completion: oneshot::Sender<Result<()>>,
}

impl ProcessingRequest {
    pub(crate) fn new(kind: StageKind, item: KnowledgeItem) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let completion = Completion {
            knowledge_id: item.id,
            kind,
            rx,
        };
        (
            Self {
                kind,
                item,
                completion: tx,
            },
            completion,
        )
    }

    /// Report the attempt's outcome. The caller may have stopped listening.
    pub(crate) fn complete(self, result: Result<()>) {
        let _ = self.completion.send(result);
    }
}

/// Single-use signal for the outcome of one submitted request.
///
/// Dropping it is fine; the request still runs.
#[derive(Debug)]
pub struct Completion {
    knowledge_id: Uuid,
    kind: StageKind,
    rx: oneshot::Receiver<Result<()>>,
}

impl Completion {
    pub fn knowledge_id(&self) -> Uuid {
        self.knowledge_id
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Wait for the attempt to finish.
    ///
    /// Returns the attempt's own error, `Error::Timeout` if `timeout` elapses
    /// first, `Error::InFlight` if the request was dropped as a duplicate, or
    /// `Error::PipelineUnavailable` if the pipeline stopped before running it.
    pub async fn wait(self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::PipelineUnavailable(format!(
                "{} request for {} was discarded at shutdown",
                self.kind, self.knowledge_id
            ))),
            Err(_) => Err(Error::Timeout(format!(
                "{} of {} did not finish within {:?}",
                self.kind, self.knowledge_id, timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> KnowledgeItem {
        let now = chrono::Utc::now();
        KnowledgeItem {
            id: Uuid::new_v4(),
            space_id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            resource: "knowledge".to_string(),
            content: "body".to_string(),
            content_type: Default::default(),
            stage: KnowledgeStage::Summarize,
            retry_times: 0,
            partial_update: None,
            title: String::new(),
            tags: Vec::new(),
            maybe_date: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_stage_kind_mapping() {
        assert_eq!(StageKind::Summarize.stage(), KnowledgeStage::Summarize);
        assert_eq!(StageKind::Embed.stage(), KnowledgeStage::Embedding);
        assert_eq!(
            StageKind::for_stage(KnowledgeStage::Embedding),
            Some(StageKind::Embed)
        );
        assert_eq!(StageKind::for_stage(KnowledgeStage::Done), None);
    }

    #[tokio::test]
    async fn test_completion_receives_result() {
        let (req, completion) = ProcessingRequest::new(StageKind::Summarize, item());
        req.complete(Err(Error::Inference("boom".into())));

        let err = completion.wait(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
    }

    #[tokio::test]
    async fn test_dropped_request_is_unavailable() {
        let (req, completion) = ProcessingRequest::new(StageKind::Embed, item());
        drop(req);

        let err = completion.wait(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::PipelineUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let (_req, completion) = ProcessingRequest::new(StageKind::Embed, item());

        let err = completion.wait(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
