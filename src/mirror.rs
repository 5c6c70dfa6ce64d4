//! External mirror strategy: delegates the copy to `rsync` (or a compatible
//! tool) and turns its output stream into progress updates.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncOptions;
use crate::errors::{SyncError, SyncResult};
use crate::file_ops::count_files_blocking;
use crate::mirror_output::{split_segment, TransferCounter};
use crate::progress::{ProgressCallback, ProgressReporter, ProgressUpdate};
use crate::sync_engine::TransferControl;

/// Marker carried by every summary produced by this strategy.
pub const MIRROR_SUMMARY_MARKER: &str = "additive mode - no files deleted";

/// Fixed arguments: archive mode, verbose, explicit timestamp preservation
/// and per-file progress. No `--delete*` flag, so extraneous target files
/// survive.
const MIRROR_ARGS: &[&str] = &["-a", "-v", "--times", "--progress"];

/// Builds the full argument list for a mirror run.
///
/// Paths are passed through as OS strings. The trailing separator on the
/// source copies its contents rather than the directory itself.
pub fn mirror_arguments(source: &Path, target: &Path, options: &SyncOptions) -> Vec<OsString> {
    let mut source_arg = source.as_os_str().to_os_string();
    let has_separator = source_arg
        .as_encoded_bytes()
        .last()
        .is_some_and(|b| std::path::is_separator(*b as char));
    if !has_separator {
        source_arg.push("/");
    }

    options
        .mirror_args
        .iter()
        .map(OsString::from)
        .chain(MIRROR_ARGS.iter().map(OsString::from))
        .chain([source_arg, target.as_os_str().to_os_string()])
        .collect()
}

fn build_command(source: &Path, target: &Path, options: &SyncOptions) -> Command {
    let mut command = Command::new(&options.mirror_program);
    command
        .args(mirror_arguments(source, target, options))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

/// Runs the mirror tool from `source` into `target`.
///
/// Returns the summary on success. Launch failures come back as
/// [`SyncError::ToolUnavailable`], unsuccessful exits as
/// [`SyncError::SubprocessFailure`], and a cancelled run as
/// [`SyncError::Cancelled`] after the child has been killed.
pub async fn run(
    source: &Path,
    target: &Path,
    options: &SyncOptions,
    progress: ProgressCallback,
    control: &TransferControl,
) -> SyncResult<String> {
    let total_files = count_files_blocking(source).await?;
    let mut reporter = ProgressReporter::new(progress);
    reporter.report(ProgressUpdate::files(0, total_files));

    if control.is_cancelled() {
        return Err(SyncError::Cancelled);
    }

    info!(
        "Attempting to use {} for {} files",
        options.mirror_name(),
        total_files
    );

    let mut child = build_command(source, target, options)
        .spawn()
        .map_err(|e| SyncError::ToolUnavailable {
            program: options.mirror_program.clone(),
            source: e,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SyncError::Internal("mirror stdout not captured".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| SyncError::Internal("mirror stderr not captured".into()))?;

    // Drained independently so a chatty stderr never stalls stdout.
    let stderr_task = tokio::spawn(collect_stderr(stderr));

    let mut counter = TransferCounter::new(total_files);
    let mut captured = String::new();
    let mut stdout = BufReader::new(stdout);
    let mut segment = Vec::new();

    loop {
        segment.clear();
        let read = tokio::select! {
            biased;
            _ = control.cancelled() => {
                return Err(abort(&mut child, stderr_task).await);
            }
            read = stdout.read_until(b'\n', &mut segment) => read,
        };

        let bytes = match read {
            Ok(bytes) => bytes,
            Err(e) => {
                terminate(&mut child).await;
                stderr_task.abort();
                return Err(e.into());
            }
        };
        if bytes == 0 {
            break;
        }

        for line in split_segment(&segment) {
            if control.is_cancelled() {
                return Err(abort(&mut child, stderr_task).await);
            }
            if let Some(update) = counter.observe(&line) {
                reporter.report(update);
            }
            captured.push_str(&line);
            captured.push('\n');
        }
    }

    let status = tokio::select! {
        biased;
        _ = control.cancelled() => {
            return Err(abort(&mut child, stderr_task).await);
        }
        status = child.wait() => status?,
    };

    let stderr_text = stderr_task.await.unwrap_or_default();

    if !status.success() {
        warn!("{} exited with {:?}", options.mirror_name(), status.code());
        return Err(SyncError::SubprocessFailure {
            code: status.code(),
            stderr: stderr_text.trim_end().to_string(),
        });
    }

    reporter.report(ProgressUpdate::complete(total_files));
    info!(
        "{} completed successfully ({} file lines seen)",
        options.mirror_name(),
        counter.processed_files()
    );

    Ok(format!(
        "Files synchronized using {} ({})\n{}",
        options.mirror_name(),
        MIRROR_SUMMARY_MARKER,
        captured
    ))
}

async fn collect_stderr<R>(stderr: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut text = String::new();
    let mut segment = Vec::new();

    loop {
        segment.clear();
        match reader.read_until(b'\n', &mut segment).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                for line in split_segment(&segment) {
                    debug!("mirror stderr: {}", line);
                    text.push_str(&line);
                    text.push('\n');
                }
            }
        }
    }

    text
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("Mirror process already gone: {}", e);
    }
    let _ = child.wait().await;
}

async fn abort(child: &mut Child, stderr_task: JoinHandle<String>) -> SyncError {
    info!("Cancellation requested, terminating mirror process");
    terminate(child).await;
    stderr_task.abort();
    SyncError::Cancelled
}
