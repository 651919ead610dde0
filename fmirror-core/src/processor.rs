use crate::config::ProcessorConfig;
use crate::event::ChangeEvent;
use crate::mirror::Mirror;
use crate::queue::{EventReceiver, EventSender};
use crate::status::StatusListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

/// Handle to the single consumer of the event queue.
///
/// The consumer is the only writer to destination trees: it takes one
/// event at a time, waits until the event is old enough for the source to
/// have settled, then applies it with bounded retries.
#[derive(Debug)]
pub struct EventProcessor {
    stop: Arc<AtomicBool>,
    queue: EventSender,
    worker: Option<JoinHandle<()>>,
}

impl EventProcessor {
    /// Start consuming `rx` on the current tokio runtime. `queue` must feed
    /// `rx`; it is used to deliver the shutdown sentinel.
    pub fn spawn<M, L>(
        rx: EventReceiver,
        queue: EventSender,
        mirror: M,
        listener: L,
        cfg: ProcessorConfig,
    ) -> Self
    where
        M: Mirror,
        L: StatusListener,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let consumer = Consumer {
            rx,
            mirror,
            listener,
            cfg,
            stop: stop.clone(),
        };
        let worker = tokio::spawn(consumer.run());
        Self {
            stop,
            queue,
            worker: Some(worker),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Ask the consumer to exit and wait for it. Events queued before the
    /// call are still applied. Calling it again does nothing.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        self.queue.push(ChangeEvent::poison());
        if let Err(e) = worker.await {
            error!("Event processor terminated abnormally: {e}");
        }
    }
}

struct Consumer<M, L> {
    rx: EventReceiver,
    mirror: M,
    listener: L,
    cfg: ProcessorConfig,
    stop: Arc<AtomicBool>,
}

impl<M: Mirror, L: StatusListener> Consumer<M, L> {
    async fn run(mut self) {
        let mut in_error = false;
        let mut busy = false;
        loop {
            let event = match self.rx.try_pop() {
                Some(event) => event,
                None => {
                    // Nothing queued, so exiting here cannot drop events
                    if self.stop.load(Ordering::Acquire) {
                        break;
                    }
                    busy = false;
                    // Let the previous status stay visible for a moment
                    sleep(self.cfg.status_hold()).await;
                    if !in_error {
                        self.listener.on_listening();
                    }
                    match self.rx.pop().await {
                        Some(event) => event,
                        None => break,
                    }
                }
            };

            if !busy {
                busy = true;
                if !in_error {
                    self.listener.on_synchronizing();
                }
            }

            if event.is_poison() {
                break;
            }

            let debounce = self.cfg.debounce();
            let age = event.age();
            if age < debounce {
                sleep(debounce - age).await;
            }

            let retry = self.cfg.retry_policy();
            let mirror = &self.mirror;
            let current = &event;
            let res = retry.run(move || mirror.apply(current)).await;
            if let Err(e) = res {
                error!(
                    "Process event ({}) in error after {} attempts: {e:#}",
                    event.kind(),
                    retry.attempts
                );
                if !in_error {
                    in_error = true;
                    self.listener.on_error();
                }
            }
        }
        info!("Stopped processing file system events");
    }
}
