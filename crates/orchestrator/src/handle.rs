//! RunHandle: the caller's side of a running orchestration.

use conductor_core::error::Error;
use conductor_core::plan::RunId;
use conductor_core::run::{RunReport, RunUpdate};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Progress stream, cooperative cancellation and the final report of one run.
pub struct RunHandle {
    run_id: RunId,
    updates: Option<mpsc::UnboundedReceiver<RunUpdate>>,
    cancel: watch::Sender<bool>,
    outcome: oneshot::Receiver<RunReport>,
}

/// The run task's side of a [`RunHandle`].
pub(crate) struct RunChannels {
    pub updates: mpsc::UnboundedSender<RunUpdate>,
    pub cancel: watch::Receiver<bool>,
    pub outcome: oneshot::Sender<RunReport>,
}

impl RunChannels {
    pub fn emit(&self, update: RunUpdate) {
        // Nobody listening is fine
        let _ = self.updates.send(update);
    }

    pub fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

impl RunHandle {
    pub(crate) fn new(run_id: RunId) -> (Self, RunChannels) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let handle = Self {
            run_id,
            updates: Some(updates_rx),
            cancel: cancel_tx,
            outcome: outcome_rx,
        };
        let channels = RunChannels {
            updates: updates_tx,
            cancel: cancel_rx,
            outcome: outcome_tx,
        };
        (handle, channels)
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Progress updates in order. Only the first call gets them; later
    /// calls return an already-finished stream.
    pub fn stream(&mut self) -> UnboundedReceiverStream<RunUpdate> {
        let rx = self.updates.take().unwrap_or_else(|| {
            let (_, rx) = mpsc::unbounded_channel();
            rx
        });
        UnboundedReceiverStream::new(rx)
    }

    /// Ask the run to stop at the next phase boundary. In-flight subtasks
    /// finish or time out.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Wait for the final report.
    pub async fn outcome(self) -> Result<RunReport, Error> {
        self.outcome
            .await
            .map_err(|_| Error::Internal(format!("run {} ended without a report", self.run_id)))
    }
}
