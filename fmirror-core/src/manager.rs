use crate::{
    binding::RootBinding,
    config::{Configuration, ProcessorConfig},
    processor::EventProcessor,
    queue::event_queue,
    status::StatusListener,
    sync::TreeSynchronizer,
    watcher::RootWatcher,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Runs every configured mirror: initial full synchronization, then live
/// propagation until [`SyncManager::shutdown`].
#[derive(Debug)]
pub struct SyncManager {
    bindings: Vec<Arc<RootBinding>>,
    watchers: Vec<RootWatcher>,
    processor: EventProcessor,
}

impl SyncManager {
    pub async fn start<L: StatusListener>(config: &Configuration, listener: L) -> Result<Self> {
        let bindings = config.bindings()?;
        Self::start_with(bindings, config.processor, listener).await
    }

    /// Synchronize each binding fully, in order, before any watcher is
    /// armed; a failure there aborts startup.
    pub async fn start_with<L: StatusListener>(
        bindings: Vec<RootBinding>,
        cfg: ProcessorConfig,
        listener: L,
    ) -> Result<Self> {
        let bindings: Vec<Arc<RootBinding>> = bindings.into_iter().map(Arc::new).collect();
        let synchronizer = TreeSynchronizer::new(cfg.retry_policy());

        listener.on_synchronizing();
        for binding in &bindings {
            let b = binding.clone();
            tokio::task::spawn_blocking(move || synchronizer.full_sync(&b, true))
                .await
                .context("initial synchronization panicked")?
                .with_context(|| {
                    format!(
                        "initial synchronization of {} failed",
                        binding.source_root().display()
                    )
                })?;
        }

        let (tx, rx) = event_queue();
        let mut watchers = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            watchers.push(RootWatcher::arm(binding.clone(), tx.clone())?);
        }
        let processor = EventProcessor::spawn(rx, tx, synchronizer, listener, cfg);

        Ok(Self {
            bindings,
            watchers,
            processor,
        })
    }

    pub fn bindings(&self) -> &[Arc<RootBinding>] {
        &self.bindings
    }

    /// Stop the processor, then the watchers.
    pub async fn shutdown(mut self) {
        self.processor.stop().await;
        for watcher in self.watchers.drain(..) {
            watcher.disarm();
        }
        info!("All synchronizations stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::SyncStatus;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::watch;

    async fn wait_for(path: &Path, content: &str) -> bool {
        for _ in 0..200 {
            if fs::read_to_string(path).is_ok_and(|c| c == content) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn mirrors_initial_tree_then_live_changes() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/initial.txt"), "v1").unwrap();
        fs::write(src.join("skip.tmp"), "no").unwrap();

        let cfg = ProcessorConfig {
            debounce_ms: 50,
            retry_backoff_ms: 50,
            status_hold_ms: 0,
            ..ProcessorConfig::default()
        };
        let (status_tx, status_rx) = watch::channel(SyncStatus::Listening);
        let binding = RootBinding::new(&src, &dst, &["*.tmp"]).unwrap();
        let manager = SyncManager::start_with(vec![binding], cfg, status_tx)
            .await
            .unwrap();
        assert_eq!(manager.bindings().len(), 1);

        // Startup sync has completed before start_with returns
        assert_eq!(fs::read_to_string(dst.join("nested/initial.txt")).unwrap(), "v1");
        assert!(!dst.join("skip.tmp").exists());

        fs::write(src.join("live.txt"), "v2").unwrap();
        assert!(wait_for(&dst.join("live.txt"), "v2").await);

        manager.shutdown().await;
        assert_ne!(*status_rx.borrow(), SyncStatus::Error);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn renamed_directory_keeps_its_contents() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("d/sub")).unwrap();
        fs::write(src.join("d/a.txt"), "a").unwrap();
        fs::write(src.join("d/sub/b.txt"), "b").unwrap();

        let cfg = ProcessorConfig {
            debounce_ms: 50,
            retry_backoff_ms: 50,
            status_hold_ms: 0,
            ..ProcessorConfig::default()
        };
        let (status_tx, status_rx) = watch::channel(SyncStatus::Listening);
        let binding = RootBinding::new::<&str>(&src, &dst, &[]).unwrap();
        let manager = SyncManager::start_with(vec![binding], cfg, status_tx)
            .await
            .unwrap();
        assert!(dst.join("d/sub/b.txt").exists());

        fs::rename(src.join("d"), src.join("e")).unwrap();
        assert!(wait_for(&dst.join("e/a.txt"), "a").await);
        assert!(wait_for(&dst.join("e/sub/b.txt"), "b").await);

        // Give a stray deletion time to arrive before checking again
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dst.join("d").exists());
        assert_eq!(fs::read_to_string(dst.join("e/sub/b.txt")).unwrap(), "b");

        manager.shutdown().await;
        assert_ne!(*status_rx.borrow(), SyncStatus::Error);
    }

    #[tokio::test]
    async fn unreadable_source_aborts_startup() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("missing");
        let binding = RootBinding::new::<&str>(&src, dir.path().join("dst"), &[]).unwrap();
        let cfg = ProcessorConfig {
            retry_max: 1,
            ..ProcessorConfig::default()
        };
        let (status_tx, _status_rx) = watch::channel(SyncStatus::Listening);
        assert!(SyncManager::start_with(vec![binding], cfg, status_tx).await.is_err());
    }
}
