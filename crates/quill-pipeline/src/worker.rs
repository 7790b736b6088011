//! Stage worker loop.
//!
//! One generic loop serves both stages: it pulls a request from its stage
//! queue, claims the in-flight guard, and hands the item to the
//! [`StageRunner`]. A request whose item is already claimed is dropped.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quill_core::Error;

use crate::dispatcher::SharedReceiver;
use crate::guard::InFlightGuard;
use crate::request::{ProcessingRequest, StageKind};
use crate::stage::StageRunner;

pub(crate) struct StageWorker {
    pub worker_id: usize,
    pub kind: StageKind,
    pub queue: SharedReceiver,
    pub guard: InFlightGuard,
    pub runner: StageRunner,
    pub cancel: CancellationToken,
}

impl StageWorker {
    /// Run until cancelled or the queue closes. An attempt already underway
    /// when cancellation fires runs to completion.
    pub async fn run(self) {
        debug!(
            subsystem = "pipeline",
            component = "worker",
            stage = %self.kind,
            worker_id = self.worker_id,
            "Stage worker started"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                req = async { self.queue.lock().await.recv().await } => req,
            };

            match next {
                Some(request) => self.handle(request).await,
                None => break,
            }
        }

        debug!(
            subsystem = "pipeline",
            component = "worker",
            stage = %self.kind,
            worker_id = self.worker_id,
            "Stage worker stopped"
        );
    }

    async fn handle(&self, request: ProcessingRequest) {
        let knowledge_id = request.item.id;

        let Some(_claim) = self.guard.try_claim(knowledge_id) else {
            warn!(
                subsystem = "pipeline",
                component = "worker",
                stage = %self.kind,
                %knowledge_id,
                "Item already in flight, dropping request"
            );
            request.complete(Err(Error::InFlight(knowledge_id)));
            return;
        };

        info!(
            subsystem = "pipeline",
            component = "worker",
            stage = %self.kind,
            worker_id = self.worker_id,
            %knowledge_id,
            retry_times = request.item.retry_times,
            "Processing request"
        );

        let ProcessingRequest {
            kind,
            item,
            completion,
        } = request;
        let result = self.runner.run(kind, item).await;
        let _ = completion.send(result);
    }
}
