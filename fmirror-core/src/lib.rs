//! Core library for fmirror – live one-way directory mirroring engine.

mod binding;
mod config;
mod event;
mod file_op;
mod filter;
mod manager;
mod mirror;
mod processor;
mod queue;
mod retry;
mod status;
mod sync;
mod watcher;

pub use binding::RootBinding;
pub use config::{Configuration, LogLevel, ProcessorConfig, Synchronization};
pub use event::{ChangeEvent, ChangeKind, ChangeNormalizer, RENAME_PAIR_WINDOW};
pub use file_op::Outcome;
pub use filter::Filter;
pub use manager::SyncManager;
pub use mirror::Mirror;
pub use processor::EventProcessor;
pub use queue::{event_queue, EventReceiver, EventSender};
pub use retry::RetryPolicy;
pub use status::{StatusListener, SyncStatus};
pub use sync::{SyncStats, TreeSynchronizer};
pub use watcher::RootWatcher;
