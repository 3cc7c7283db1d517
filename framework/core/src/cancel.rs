use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::{Receiver, Sender};

/// Cancellation signal for work in flight.
///
/// Any number of listeners can be derived from a handle, and the handle may outlive many
/// pieces of work. Cancelling is idempotent and reaches every listener that exists at the
/// time of the call.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Sender<()>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::broadcast::channel(1).0,
        }
    }

    pub fn cancel(&self) {
        if self.sender.send(()).is_err() {
            // Nobody is listening, which is fine for a run that already completed.
            log::debug!("Cancellation requested but no listener is active");
        }
    }

    pub fn new_listener(&self) -> CancelListener {
        CancelListener::new(self.sender.subscribe())
    }
}

#[derive(Debug)]
pub struct CancelListener {
    receiver: Receiver<()>,
}

impl CancelListener {
    pub(crate) fn new(receiver: Receiver<()>) -> Self {
        Self { receiver }
    }

    /// Point in time check whether cancellation has been requested.
    pub fn is_cancelled(&mut self) -> bool {
        match self.receiver.try_recv() {
            Ok(_) => true,
            Err(TryRecvError::Closed) => true,
            Err(_) => false,
        }
    }

    /// Wait until cancellation is requested. Safe to race against other futures in a
    /// `tokio::select!` so that in-progress work can be abandoned.
    pub async fn cancelled(&mut self) {
        // A closed channel means the handle is gone, so nothing will be cancelled anymore.
        // Stay pending in that case rather than firing spuriously.
        if self.receiver.recv().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Clone for CancelListener {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
        }
    }
}

/// Returned by operations that were abandoned because their run was cancelled.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct CancelledError {
    msg: String,
}

impl Default for CancelledError {
    fn default() -> Self {
        Self {
            msg: "Operation abandoned because the run was cancelled".to_string(),
        }
    }
}
