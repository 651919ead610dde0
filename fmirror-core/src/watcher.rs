use crate::binding::RootBinding;
use crate::event::{ChangeEvent, ChangeKind, ChangeNormalizer, RENAME_PAIR_WINDOW};
use crate::queue::EventSender;
use anyhow::{anyhow, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, info};

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// OS change subscription for one watched root.
///
/// Every notification is forwarded to the queue, filtering happens when
/// the event is processed. Rename halves that never find a partner are
/// flushed by a background task. Dropping the watcher ends the
/// subscription.
pub struct RootWatcher {
    binding: Arc<RootBinding>,
    watcher: RecommendedWatcher,
    flusher: JoinHandle<()>,
}

impl RootWatcher {
    /// Subscribe to `binding`'s source tree. Must be called within a tokio
    /// runtime.
    pub fn arm(binding: Arc<RootBinding>, queue: EventSender) -> Result<Self> {
        let normalizer = Arc::new(Mutex::new(ChangeNormalizer::default()));

        let origin = binding.clone();
        let state = normalizer.clone();
        let tx = queue.clone();
        let mut watcher: RecommendedWatcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let now = Instant::now();
                    let changes = state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .normalize(&event, now, exists);
                    for kind in changes {
                        tx.push(ChangeEvent::detected(origin.clone(), kind, now));
                    }
                }
                Err(e) => {
                    tx.push(ChangeEvent::new(
                        origin.clone(),
                        ChangeKind::WatchError(e.to_string()),
                    ));
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| anyhow!(e))?;
        watcher
            .watch(binding.source_root(), RecursiveMode::Recursive)
            .map_err(|e| anyhow!("watch {} failed: {e}", binding.source_root().display()))?;

        let flusher = tokio::spawn(flush_expired(binding.clone(), normalizer, queue));
        info!("Listening for changes in {}...", binding.source_root().display());
        Ok(Self {
            binding,
            watcher,
            flusher,
        })
    }

    pub fn binding(&self) -> &Arc<RootBinding> {
        &self.binding
    }

    /// Stop watching. Notifications already queued are unaffected.
    pub fn disarm(mut self) {
        if let Err(e) = self.watcher.unwatch(self.binding.source_root()) {
            debug!("unwatch {}: {e}", self.binding.source_root().display());
        }
    }
}

impl Drop for RootWatcher {
    fn drop(&mut self) {
        self.flusher.abort();
    }
}

impl std::fmt::Debug for RootWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootWatcher")
            .field("source_root", &self.binding.source_root())
            .finish_non_exhaustive()
    }
}

// Moves out of the tree only produce a "from" half, so nothing else would
// ever release them.
async fn flush_expired(
    binding: Arc<RootBinding>,
    normalizer: Arc<Mutex<ChangeNormalizer>>,
    queue: EventSender,
) {
    let mut ticks = interval(RENAME_PAIR_WINDOW / 2);
    loop {
        ticks.tick().await;
        let now = Instant::now();
        let changes = normalizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .expire(now, exists);
        for kind in changes {
            if !queue.push(ChangeEvent::detected(binding.clone(), kind, now)) {
                return;
            }
        }
    }
}
