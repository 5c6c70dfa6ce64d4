//! Core sync engine: strategy selection, run status and cancellation.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::SyncOptions;
use crate::errors::{SyncError, SyncResult};
use crate::progress::{ProgressCallback, ProgressUpdate};
use crate::transfer_state::TransferStatus;
use crate::{manual_copy, mirror};

/// Cooperative cancellation handle shared between the caller and a run.
///
/// Clones share the same underlying token.
#[derive(Debug, Clone, Default)]
pub struct TransferControl {
    token: CancellationToken,
}

impl TransferControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl SyncRequest {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Terminal result of one sync run. Exactly one reaches the caller per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SyncOutcome {
    Completed { summary: String },
    Cancelled,
    Failed { message: String },
}

impl SyncOutcome {
    pub fn status(&self) -> TransferStatus {
        match self {
            SyncOutcome::Completed { .. } => TransferStatus::Completed,
            SyncOutcome::Cancelled => TransferStatus::Cancelled,
            SyncOutcome::Failed { .. } => TransferStatus::Failed,
        }
    }

    fn from_result(result: SyncResult<String>) -> Self {
        match result {
            Ok(summary) => SyncOutcome::Completed { summary },
            Err(e) if e.is_cancelled() => SyncOutcome::Cancelled,
            Err(e) => SyncOutcome::Failed {
                message: e.to_string(),
            },
        }
    }
}

/// Resolves `path` against the current directory and, where it exists,
/// through symlinks.
fn resolve_path(path: &Path) -> SyncResult<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => Ok(resolve_path(parent)?.join(name)),
        _ => Ok(absolute),
    }
}

/// Checks a request before any strategy touches the filesystem.
pub fn validate_request(request: &SyncRequest) -> SyncResult<()> {
    let source = &request.source;
    if !source.exists() {
        return Err(SyncError::SourceNotFound(source.display().to_string()));
    }
    if !source.is_dir() {
        return Err(SyncError::InvalidPath(format!(
            "{} is not a directory",
            source.display()
        )));
    }

    let target = &request.target;
    if target.exists() && !target.is_dir() {
        return Err(SyncError::InvalidPath(format!(
            "Target {} exists and is not a directory",
            target.display()
        )));
    }

    let source = resolve_path(source)?;
    let target = resolve_path(target)?;
    if target.starts_with(&source) {
        return Err(SyncError::InvalidPath(format!(
            "Target {} lies inside source {}",
            target.display(),
            source.display()
        )));
    }

    Ok(())
}

/// Coordinates one sync at a time: mirror tool first, built-in copy as fallback.
pub struct SyncEngine {
    options: SyncOptions,
    status: RwLock<TransferStatus>,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new(SyncOptions::default())
    }
}

impl SyncEngine {
    pub fn new(options: SyncOptions) -> Self {
        Self {
            options,
            status: RwLock::new(TransferStatus::Idle),
        }
    }

    pub fn status(&self) -> TransferStatus {
        *self.status.read()
    }

    fn set_status(&self, status: TransferStatus) {
        *self.status.write() = status;
    }

    /// Synchronizes `request.source` into `request.target`.
    ///
    /// `on_progress` is called from whichever task or thread is doing the
    /// work; callers that drive a UI should forward updates to their own
    /// context. Overlapping calls on one engine are the caller's to prevent.
    pub async fn perform_sync<F>(
        &self,
        request: &SyncRequest,
        on_progress: F,
        control: &TransferControl,
    ) -> SyncOutcome
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        let progress: ProgressCallback = Arc::new(on_progress);
        let span = info_span!(
            "sync",
            run = %Uuid::new_v4(),
            source = %request.source.display(),
            target = %request.target.display()
        );

        self.set_status(TransferStatus::Running);
        progress(ProgressUpdate::reset());

        let outcome = self.run(request, progress, control).instrument(span).await;

        self.set_status(outcome.status());
        outcome
    }

    async fn run(
        &self,
        request: &SyncRequest,
        progress: ProgressCallback,
        control: &TransferControl,
    ) -> SyncOutcome {
        if let Err(e) = self.options.validate().and_then(|_| validate_request(request)) {
            warn!("Refusing to sync: {}", e);
            return SyncOutcome::Failed {
                message: e.to_string(),
            };
        }

        if self.options.use_mirror {
            match mirror::run(
                &request.source,
                &request.target,
                &self.options,
                progress.clone(),
                control,
            )
            .await
            {
                Ok(summary) => return SyncOutcome::Completed { summary },
                Err(e) if e.is_cancelled() => {
                    info!("Sync cancelled during mirror run");
                    return SyncOutcome::Cancelled;
                }
                // A nonzero exit after a partial transfer also lands here and
                // the built-in copy redoes the comparison for every file.
                Err(e) => warn!(
                    "{} failed ({}), falling back to manual copy",
                    self.options.mirror_name(),
                    e
                ),
            }
        } else {
            info!("Mirror tool disabled, using manual copy");
        }

        if control.is_cancelled() {
            return SyncOutcome::Cancelled;
        }

        let result = manual_copy::run(
            &request.source,
            &request.target,
            &self.options,
            progress,
            control,
        )
        .await;

        let outcome = SyncOutcome::from_result(result);
        if let SyncOutcome::Failed { message } = &outcome {
            warn!("Manual copy failed: {}", message);
        }
        outcome
    }
}
