//! Built-in recursive copy, used when the mirror tool is absent or fails.

use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::config::SyncOptions;
use crate::errors::{SyncError, SyncResult};
use crate::file_ops::{count_files, link_directory, sync_file, walk, EntryKind};
use crate::progress::{ProgressCallback, ProgressReporter, ProgressUpdate};
use crate::sync_engine::TransferControl;
use crate::transfer_state::FileTally;

/// Runs [`run_blocking`] on the blocking pool and returns the summary text.
pub async fn run(
    source: &Path,
    target: &Path,
    options: &SyncOptions,
    progress: ProgressCallback,
    control: &TransferControl,
) -> SyncResult<String> {
    let source = source.to_path_buf();
    let target = target.to_path_buf();
    let buffer_size = options.buffer_size;
    let control = control.clone();

    let tally = tokio::task::spawn_blocking(move || {
        let mut reporter = ProgressReporter::new(progress);
        run_blocking(&source, &target, buffer_size, &mut reporter, &control)
    })
    .await
    .map_err(|e| SyncError::Internal(e.to_string()))??;

    Ok(tally.summary())
}

/// Depth-first copy of `source` into `target` using freshness comparison.
///
/// Cancellation is checked before every entry; whatever was copied up to
/// that point stays in place.
pub fn run_blocking(
    source: &Path,
    target: &Path,
    buffer_size: usize,
    reporter: &mut ProgressReporter,
    control: &TransferControl,
) -> SyncResult<FileTally> {
    fs::create_dir_all(target)?;

    let total_files = count_files(source)?;
    reporter.report(ProgressUpdate::files(0, total_files));
    info!(
        "Starting manual file copy of {} files: {} -> {}",
        total_files,
        source.display(),
        target.display()
    );

    let mut tally = FileTally::default();
    let mut processed_files = 0;

    for entry in walk(source)? {
        if control.is_cancelled() {
            info!("Manual copy cancelled after {} files", processed_files);
            return Err(SyncError::Cancelled);
        }

        let entry = entry?;
        let relative = entry.path.strip_prefix(source).map_err(|_| {
            SyncError::InvalidPath(format!("Cannot strip prefix from {:?}", entry.path))
        })?;
        let dest = target.join(relative);

        match entry.kind {
            EntryKind::Directory => {
                fs::create_dir_all(&dest)?;
            }
            EntryKind::LinkedDirectory => {
                if !link_directory(&entry.path, &dest)? {
                    debug!("Left existing entry in place: {}", dest.display());
                }
            }
            EntryKind::File => {
                let action = sync_file(&entry.path, &dest, buffer_size)?;
                tally.record(action);
                processed_files += 1;
                reporter.report(ProgressUpdate::files(processed_files, total_files));
            }
            EntryKind::Other => {
                debug!("Skipping special entry: {}", entry.path.display());
            }
        }
    }

    info!(
        "Manual sync completed - {} files. New: {}, Updated: {}, Skipped: {}",
        tally.total(),
        tally.new_files,
        tally.updated_files,
        tally.skipped_files
    );
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &str, mtime: i64) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
        filetime::set_file_mtime(path, FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    fn collecting() -> (ProgressReporter, Arc<Mutex<Vec<ProgressUpdate>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |u| sink.lock().push(u));
        (ProgressReporter::new(callback), seen)
    }

    fn copy(source: &Path, target: &Path) -> (FileTally, Vec<ProgressUpdate>) {
        let (mut reporter, seen) = collecting();
        let tally = run_blocking(source, target, 4096, &mut reporter, &TransferControl::new()).unwrap();
        let updates = seen.lock().clone();
        (tally, updates)
    }

    #[test]
    fn test_new_updated_skipped_scenario() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();

        write(&source.path().join("a.txt"), "alpha", 5_000);
        write(&source.path().join("b.txt"), "bravo", 4_000);
        write(&target.path().join("b.txt"), "bravo", 4_000);
        write(&source.path().join("c.txt"), "charlie v2", 6_000);
        write(&target.path().join("c.txt"), "charlie v1", 3_000);

        let (tally, updates) = copy(source.path(), target.path());

        assert_eq!(
            tally,
            FileTally {
                new_files: 1,
                updated_files: 1,
                skipped_files: 1
            }
        );
        assert!(tally
            .summary()
            .ends_with("New files: 1, Updated files: 1, Skipped files: 1"));
        assert_eq!(fs::read_to_string(target.path().join("c.txt")).unwrap(), "charlie v2");

        let labels: Vec<&str> = updates.iter().map(|u| u.label.as_str()).collect();
        assert_eq!(labels, vec!["0 / 3 files", "1 / 3 files", "2 / 3 files", "3 / 3 files"]);
        assert!(updates.windows(2).all(|w| w[0].fraction < w[1].fraction));
    }

    #[test]
    fn test_mirrors_tree_with_content_and_mtime() {
        let source = TempDir::new().unwrap();
        let target_root = TempDir::new().unwrap();
        let target = target_root.path().join("does/not/exist/yet");

        write(&source.path().join("top.txt"), "top", 1_000);
        write(&source.path().join("docs/readme.md"), "# readme", 2_000);
        write(&source.path().join("docs/deep/data.bin"), "0101", 3_000);
        fs::create_dir_all(source.path().join("empty_dir")).unwrap();

        let (tally, _) = copy(source.path(), &target);
        assert_eq!(tally.new_files, 3);

        for entry in walk(source.path()).unwrap().map(|e| e.unwrap()) {
            let relative = entry.path.strip_prefix(source.path()).unwrap();
            let mirrored = target.join(relative);
            if entry.is_dir() {
                assert!(mirrored.is_dir(), "{}", mirrored.display());
            } else {
                assert_eq!(fs::read(&entry.path).unwrap(), fs::read(&mirrored).unwrap());
                assert_eq!(
                    crate::file_ops::modification_time(&entry.path).unwrap(),
                    crate::file_ops::modification_time(&mirrored).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_second_run_skips_everything() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write(&source.path().join("one.txt"), "1", 1_000);
        write(&source.path().join("sub/two.txt"), "2", 1_000);

        copy(source.path(), target.path());
        let (tally, _) = copy(source.path(), target.path());

        assert_eq!(
            tally,
            FileTally {
                new_files: 0,
                updated_files: 0,
                skipped_files: 2
            }
        );
    }

    #[test]
    fn test_equal_timestamps_are_skipped() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write(&source.path().join("same.txt"), "source contents", 7_000);
        write(&target.path().join("same.txt"), "target contents", 7_000);

        let (tally, _) = copy(source.path(), target.path());

        assert_eq!(tally.skipped_files, 1);
        assert_eq!(tally.updated_files, 0);
        assert_eq!(
            fs::read_to_string(target.path().join("same.txt")).unwrap(),
            "target contents"
        );
    }

    #[test]
    fn test_extra_target_files_survive() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write(&source.path().join("keep.txt"), "keep", 1_000);
        write(&target.path().join("only_in_target.txt"), "mine", 1_000);
        write(&target.path().join("old/stale.txt"), "stale", 1_000);

        copy(source.path(), target.path());

        assert!(target.path().join("keep.txt").exists());
        assert!(target.path().join("only_in_target.txt").exists());
        assert!(target.path().join("old/stale.txt").exists());
    }

    #[test]
    fn test_cancellation_leaves_copied_files() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        for name in ["a.txt", "b.txt", "c.txt", "d.txt", "e.txt"] {
            write(&source.path().join(name), name, 1_000);
        }

        let control = TransferControl::new();
        let trigger = control.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |update: ProgressUpdate| {
            if update.label == "2 / 5 files" {
                trigger.cancel();
            }
            sink.lock().push(update);
        });
        let mut reporter = ProgressReporter::new(callback);

        let err = run_blocking(source.path(), target.path(), 4096, &mut reporter, &control).unwrap_err();

        assert!(err.is_cancelled());
        assert!(target.path().join("a.txt").exists());
        assert!(target.path().join("b.txt").exists());
        assert!(!target.path().join("c.txt").exists());
        assert_eq!(seen.lock().last().unwrap().label, "2 / 5 files");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_is_recreated_as_link() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        write(&outside.path().join("shared.txt"), "shared", 1_000);
        write(&source.path().join("real.txt"), "real", 1_000);
        std::os::unix::fs::symlink(outside.path(), source.path().join("linked")).unwrap();

        let (tally, _) = copy(source.path(), target.path());

        let mirrored = target.path().join("linked");
        assert!(fs::symlink_metadata(&mirrored).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&mirrored).unwrap(), outside.path());
        assert_eq!(tally.new_files, 1);

        // A second run leaves the link alone.
        let (tally, _) = copy(source.path(), target.path());
        assert_eq!(tally.skipped_files, 1);
        assert_eq!(fs::read_link(&mirrored).unwrap(), outside.path());
    }

    #[test]
    fn test_missing_source_fails() {
        let root = TempDir::new().unwrap();
        let (mut reporter, _) = collecting();
        let err = run_blocking(
            &root.path().join("missing"),
            &root.path().join("target"),
            4096,
            &mut reporter,
            &TransferControl::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::SourceNotFound(_)));
    }

    #[test]
    fn test_io_error_aborts_walk() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write(&source.path().join("a.txt"), "a", 1_000);
        write(&source.path().join("blocked/file.txt"), "x", 1_000);
        write(&source.path().join("z.txt"), "z", 1_000);
        // A plain file where a directory must be created.
        write(&target.path().join("blocked"), "in the way", 1_000);

        let (mut reporter, _) = collecting();
        let err = run_blocking(source.path(), target.path(), 4096, &mut reporter, &TransferControl::new())
            .unwrap_err();

        assert!(matches!(err, SyncError::Io(_)));
        assert!(target.path().join("a.txt").exists());
        assert!(!target.path().join("z.txt").exists());
    }

    #[tokio::test]
    async fn test_async_run_returns_summary() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write(&source.path().join("a.txt"), "a", 1_000);
        let callback: ProgressCallback = Arc::new(|_| {});

        let summary = run(
            source.path(),
            target.path(),
            &SyncOptions::default(),
            callback,
            &TransferControl::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            summary,
            "Files synchronized manually (additive mode)\nNew files: 1, Updated files: 0, Skipped files: 0"
        );
    }
}
