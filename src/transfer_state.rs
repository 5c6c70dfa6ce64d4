//! Run status and per-run file counters.

use serde::{Deserialize, Serialize};

/// Header of the summary produced by the built-in copy.
pub const MANUAL_SUMMARY_HEADER: &str = "Files synchronized manually (additive mode)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// What the freshness comparison decided for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// Target missing; copied.
    New,
    /// Source strictly newer; overwritten.
    Updated,
    /// Target same age or newer; left alone.
    Skipped,
}

/// Counters for one built-in copy pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileTally {
    pub new_files: usize,
    pub updated_files: usize,
    pub skipped_files: usize,
}

impl FileTally {
    pub fn record(&mut self, action: FileAction) {
        match action {
            FileAction::New => self.new_files += 1,
            FileAction::Updated => self.updated_files += 1,
            FileAction::Skipped => self.skipped_files += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.new_files + self.updated_files + self.skipped_files
    }

    pub fn summary(&self) -> String {
        format!(
            "{}\nNew files: {}, Updated files: {}, Skipped files: {}",
            MANUAL_SUMMARY_HEADER, self.new_files, self.updated_files, self.skipped_files
        )
    }
}
