use crate::JobId;
use tokio::sync::oneshot;

/// A handle to a submitted job. Cancellation is cooperative: it signals
/// the worker, which is expected to notice at its next suspension point;
/// already-running worker code is never forcefully terminated.
pub struct Handle {
    pub(crate) id: JobId,
    pub(crate) cancel: Option<oneshot::Sender<()>>,
}

impl Handle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}
