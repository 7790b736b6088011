//! Submission side of the stage queues.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use quill_core::{Error, KnowledgeItem, Result};

use crate::request::{Completion, ProcessingRequest, StageKind};

/// Receiving end of a stage queue, shared by that stage's workers.
pub(crate) type SharedReceiver = Arc<Mutex<mpsc::Receiver<ProcessingRequest>>>;

/// Places requests on the bounded per-stage queues.
#[derive(Clone)]
pub struct Dispatcher {
    summarize_tx: mpsc::Sender<ProcessingRequest>,
    embed_tx: mpsc::Sender<ProcessingRequest>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher and the two queue receivers it feeds.
    pub(crate) fn new(
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, SharedReceiver, SharedReceiver) {
        let (summarize_tx, summarize_rx) = mpsc::channel(capacity.max(1));
        let (embed_tx, embed_rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                summarize_tx,
                embed_tx,
                cancel,
            },
            Arc::new(Mutex::new(summarize_rx)),
            Arc::new(Mutex::new(embed_rx)),
        )
    }

    fn sender(&self, kind: StageKind) -> &mpsc::Sender<ProcessingRequest> {
        match kind {
            StageKind::Summarize => &self.summarize_tx,
            StageKind::Embed => &self.embed_tx,
        }
    }

    /// Enqueue `item` for `kind`.
    ///
    /// Waits while the queue is full. Fails with `PipelineUnavailable`
    /// without enqueueing once the pipeline is cancelled, including while
    /// waiting for queue space.
    pub async fn submit(&self, kind: StageKind, item: KnowledgeItem) -> Result<Completion> {
        if self.cancel.is_cancelled() {
            return Err(unavailable(kind, &item));
        }

        let knowledge_id = item.id;
        let (request, completion) = ProcessingRequest::new(kind, item);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(Error::PipelineUnavailable(format!(
                    "pipeline stopped before {} of {} was queued",
                    kind, knowledge_id
                )))
            }
            sent = self.sender(kind).send(request) => match sent {
                Ok(()) => {
                    debug!(
                        subsystem = "pipeline",
                        component = "dispatcher",
                        op = kind.as_str(),
                        %knowledge_id,
                        "Request queued"
                    );
                    Ok(completion)
                }
                Err(mpsc::error::SendError(request)) => Err(unavailable(kind, &request.item)),
            },
        }
    }

    pub async fn submit_summary(&self, item: KnowledgeItem) -> Result<Completion> {
        self.submit(StageKind::Summarize, item).await
    }

    pub async fn submit_embedding(&self, item: KnowledgeItem) -> Result<Completion> {
        self.submit(StageKind::Embed, item).await
    }

    /// Free slots left in a stage queue.
    pub fn remaining_capacity(&self, kind: StageKind) -> usize {
        self.sender(kind).capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn unavailable(kind: StageKind, item: &KnowledgeItem) -> Error {
    Error::PipelineUnavailable(format!("cannot submit {} of {}", kind, item.id))
}
