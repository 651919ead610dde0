//! Unbounded multi-producer / single-consumer FIFO of change events.

use crate::event::ChangeEvent;
use tokio::sync::mpsc;

/// Create the shared queue. Senders are cloned into every watcher, the
/// receiver goes to the single event processor.
pub fn event_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl EventSender {
    /// Enqueue without blocking. Returns `false` once the consumer is gone.
    pub fn push(&self, event: ChangeEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl EventReceiver {
    /// Next event if one is already queued.
    pub fn try_pop(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next event. `None` when every sender has been dropped.
    pub async fn pop(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}
