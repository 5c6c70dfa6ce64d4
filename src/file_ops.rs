//! File operations for the sync engine: tree enumeration, freshness
//! comparison and timestamp-preserving copies.

use filetime::FileTime;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::COPY_BUFFER_SIZE;
use crate::errors::{SyncError, SyncResult};
use crate::transfer_state::FileAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    /// A symlink pointing at a directory. Not descended into.
    LinkedDirectory,
    /// A regular file, or a symlink pointing at one.
    File,
    /// Anything else: broken symlinks, sockets, devices.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub depth: usize,
}

impl WalkEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Depth-first, parent-before-children walk below a root directory.
///
/// Children are visited in file-name order, so two walks over an unchanged
/// tree yield the same sequence. The root itself is not yielded.
pub struct DirectoryWalker {
    inner: walkdir::IntoIter,
}

impl DirectoryWalker {
    pub fn new(root: &Path) -> SyncResult<Self> {
        let metadata = fs::metadata(root).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SyncError::SourceNotFound(root.display().to_string()),
            _ => SyncError::Io(e),
        })?;
        if !metadata.is_dir() {
            return Err(SyncError::InvalidPath(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        // Surface an unreadable root up front instead of as the first item.
        fs::read_dir(root)?;

        let inner = walkdir::WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        Ok(Self { inner })
    }
}

impl Iterator for DirectoryWalker {
    type Item = SyncResult<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.inner.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(SyncError::Walk(e))),
        };

        let file_type = entry.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else if file_type.is_symlink() {
            classify_symlink(entry.path())
        } else {
            EntryKind::Other
        };

        Some(Ok(WalkEntry {
            path: entry.path().to_path_buf(),
            kind,
            depth: entry.depth(),
        }))
    }
}

fn classify_symlink(path: &Path) -> EntryKind {
    match fs::metadata(path) {
        Ok(target) if target.is_dir() => EntryKind::LinkedDirectory,
        Ok(target) if target.is_file() => EntryKind::File,
        _ => EntryKind::Other,
    }
}

/// Lazily walks `root`. Each call starts an independent traversal.
pub fn walk(root: &Path) -> SyncResult<DirectoryWalker> {
    DirectoryWalker::new(root)
}

/// Counts regular files below `root`, following symlinks to files but not
/// counting directories or symlinks to directories.
///
/// Fails if the root itself cannot be read; unreadable subtrees are logged
/// and left out of the count.
pub fn count_files(root: &Path) -> SyncResult<usize> {
    let mut count = 0;
    for entry in walk(root)? {
        match entry {
            Ok(entry) if entry.is_file() => count += 1,
            Ok(_) => {}
            Err(e) => warn!("Skipping unreadable entry while counting: {}", e),
        }
    }
    Ok(count)
}

/// Async wrapper running [`count_files`] on the blocking pool.
pub async fn count_files_blocking(root: &Path) -> SyncResult<usize> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || count_files(&root))
        .await
        .map_err(|e| SyncError::Internal(e.to_string()))?
}

pub fn modification_time(path: &Path) -> SyncResult<FileTime> {
    let metadata = fs::metadata(path)?;
    Ok(FileTime::from_last_modification_time(&metadata))
}

/// Freshness comparison: a missing target is new, a strictly newer source is
/// an update, anything else (including equal timestamps) is skipped.
pub fn compare_freshness(source_mtime: FileTime, target_mtime: Option<FileTime>) -> FileAction {
    match target_mtime {
        None => FileAction::New,
        Some(target_mtime) if source_mtime > target_mtime => FileAction::Updated,
        Some(_) => FileAction::Skipped,
    }
}

#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub buffer_size: usize,
    /// Replace an existing target. When false the copy fails if the target exists.
    pub overwrite: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            buffer_size: COPY_BUFFER_SIZE,
            overwrite: false,
        }
    }
}

/// Copies `source` to `dest` byte for byte and stamps `dest` with the
/// source's modification time. Returns the number of bytes written.
///
/// With `overwrite` the data goes to a sibling temp file that is renamed over
/// `dest`, so a read-only target is replaced rather than opened for writing.
pub fn copy_file_preserving(source: &Path, dest: &Path, options: &CopyOptions) -> SyncResult<u64> {
    let src_file = File::open(source)?;
    let src_metadata = src_file.metadata()?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    if !options.overwrite {
        let dest_file = OpenOptions::new().write(true).create_new(true).open(dest)?;
        let bytes_copied = write_contents(src_file, dest_file, options.buffer_size)?;
        apply_metadata(dest, &src_metadata)?;
        return Ok(bytes_copied);
    }

    let temp_path = temp_path_for(dest);
    // Leftover from an interrupted run; may itself be read-only.
    let _ = fs::remove_file(&temp_path);

    let result = replace_via_temp(src_file, &src_metadata, &temp_path, dest, options.buffer_size);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn replace_via_temp(
    src_file: File,
    src_metadata: &fs::Metadata,
    temp_path: &Path,
    dest: &Path,
    buffer_size: usize,
) -> SyncResult<u64> {
    let temp_file = OpenOptions::new().write(true).create_new(true).open(temp_path)?;
    let bytes_copied = write_contents(src_file, temp_file, buffer_size)?;
    apply_metadata(temp_path, src_metadata)?;
    fs::rename(temp_path, dest)?;
    Ok(bytes_copied)
}

/// `.name.synctool.tmp` next to `dest`.
fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(dest.file_name().unwrap_or_default());
    name.push(".synctool.tmp");
    dest.with_file_name(name)
}

fn write_contents(src_file: File, mut dest_file: File, buffer_size: usize) -> SyncResult<u64> {
    let mut reader = BufReader::with_capacity(buffer_size, src_file);
    let mut writer = BufWriter::with_capacity(buffer_size, &mut dest_file);

    let mut buffer = vec![0u8; buffer_size];
    let mut bytes_copied: u64 = 0;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }

        writer.write_all(&buffer[..bytes_read])?;
        bytes_copied += bytes_read as u64;
    }

    writer.flush()?;
    drop(writer);

    dest_file.sync_all()?;
    Ok(bytes_copied)
}

fn apply_metadata(path: &Path, src_metadata: &fs::Metadata) -> SyncResult<()> {
    let _ = fs::set_permissions(path, src_metadata.permissions());
    filetime::set_file_mtime(path, FileTime::from_last_modification_time(src_metadata))?;
    Ok(())
}

/// Recreates the directory symlink `source` at `dest` with the same link
/// text. An existing entry at `dest` is left alone. Returns whether a link
/// was created.
#[cfg(unix)]
pub fn link_directory(source: &Path, dest: &Path) -> SyncResult<bool> {
    match fs::symlink_metadata(dest) {
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let link_target = fs::read_link(source)?;
    std::os::unix::fs::symlink(&link_target, dest)?;
    debug!("Linked {} -> {}", dest.display(), link_target.display());
    Ok(true)
}

#[cfg(not(unix))]
pub fn link_directory(source: &Path, _dest: &Path) -> SyncResult<bool> {
    debug!("Skipping directory symlink: {}", source.display());
    Ok(false)
}

/// Brings one file up to date in the target and reports what was done.
pub fn sync_file(source: &Path, dest: &Path, buffer_size: usize) -> SyncResult<FileAction> {
    let source_mtime = modification_time(source)?;
    let target_mtime = match fs::metadata(dest) {
        Ok(metadata) => Some(FileTime::from_last_modification_time(&metadata)),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    let action = compare_freshness(source_mtime, target_mtime);
    match action {
        FileAction::New | FileAction::Updated => {
            let options = CopyOptions {
                buffer_size,
                overwrite: action == FileAction::Updated,
            };
            let bytes = copy_file_preserving(source, dest, &options)?;
            debug!("{:?}: {} ({} bytes)", action, dest.display(), bytes);
        }
        FileAction::Skipped => {
            debug!("Up to date: {}", dest.display());
        }
    }

    Ok(action)
}
