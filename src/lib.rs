//! Additive folder sync.
//!
//! Copies the contents of a source folder into a target folder without ever
//! deleting anything from the target. The external mirror tool (`rsync` by
//! default) is tried first; if it cannot be launched or fails, a built-in
//! recursive copy with timestamp comparison takes over.

pub mod config;
pub mod errors;
pub mod file_ops;
pub mod logging;
pub mod manual_copy;
pub mod mirror;
pub mod mirror_output;
pub mod progress;
pub mod sync_engine;
pub mod transfer_state;

use std::path::Path;

pub use config::SyncOptions;
pub use errors::{SyncError, SyncResult};
pub use progress::ProgressUpdate;
pub use sync_engine::{SyncEngine, SyncOutcome, SyncRequest, TransferControl};
pub use transfer_state::TransferStatus;

/// One-shot sync with options taken from the environment.
pub async fn perform_sync<F>(
    source: impl AsRef<Path>,
    target: impl AsRef<Path>,
    on_progress: F,
    control: &TransferControl,
) -> SyncOutcome
where
    F: Fn(ProgressUpdate) + Send + Sync + 'static,
{
    let engine = SyncEngine::new(SyncOptions::from_env());
    let request = SyncRequest::new(source.as_ref(), target.as_ref());
    engine.perform_sync(&request, on_progress, control).await
}
