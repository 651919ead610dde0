use crate::event::ChangeEvent;
use anyhow::Result;
use async_trait::async_trait;

/// Destination side of the pipeline: applies one change event.
///
/// Errors are treated as transient by the caller and retried.
#[async_trait]
pub trait Mirror: Send + Sync + 'static {
    async fn apply(&self, event: &ChangeEvent) -> Result<()>;
}
