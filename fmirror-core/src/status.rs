use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Coarse state reported to whoever displays it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Listening,
    Synchronizing,
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStatus::Listening => "listening",
            SyncStatus::Synchronizing => "synchronizing",
            SyncStatus::Error => "error",
        })
    }
}

/// Receives status transitions from the event processor.
///
/// Calls are made on the consumer and must return promptly; an
/// implementation that drives a UI marshals the update to its own thread.
pub trait StatusListener: Send + Sync + 'static {
    fn on_listening(&self);
    fn on_synchronizing(&self);
    fn on_error(&self);
}

impl StatusListener for watch::Sender<SyncStatus> {
    fn on_listening(&self) {
        publish(self, SyncStatus::Listening);
    }

    fn on_synchronizing(&self) {
        publish(self, SyncStatus::Synchronizing);
    }

    fn on_error(&self) {
        publish(self, SyncStatus::Error);
    }
}

fn publish(tx: &watch::Sender<SyncStatus>, status: SyncStatus) {
    tx.send_if_modified(|current| {
        if *current == status {
            return false;
        }
        *current = status;
        true
    });
}

impl<L: StatusListener + ?Sized> StatusListener for Arc<L> {
    fn on_listening(&self) {
        (**self).on_listening()
    }

    fn on_synchronizing(&self) {
        (**self).on_synchronizing()
    }

    fn on_error(&self) {
        (**self).on_error()
    }
}
