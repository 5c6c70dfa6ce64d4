//! Parsing rules for the mirror tool's `-v --progress` output.
//!
//! The rules are kept apart from the subprocess plumbing so that they can be
//! checked against literal sample lines. They are tool-version dependent:
//!
//! ```text
//! sending incremental file list
//! photos/img_001.jpg
//!      32,768   8%   31.25MB/s    0:00:00
//!     409,600 100%   30.12MB/s    0:00:00 (xfr#1, to-chk=12/40)     <- rule 1 (rsync >= 3.1)
//!     409,600 100%   30.12MB/s    0:00:00 (xfer#1, to-check=12/40)  <- rule 2 (older rsync)
//! sent 1,234 bytes  received 56 bytes  2,580.00 bytes/sec
//! total size is 409,600  speedup is 317.52
//! ```

use regex::Regex;
use std::sync::LazyLock;

use crate::progress::ProgressUpdate;

/// Rule 1: aggregate counter, `to-chk=<remaining>/<total>`.
static OVERALL_COUNTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"to-chk=(\d+)/(\d+)").expect("valid overall counter regex"));

/// Rule 2: transfer index plus counter, `xfer#<n>, to-check=<remaining>/<total>`.
static TRANSFER_COUNTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"xf(?:e)?r#(\d+),\s*to-ch(?:ec)?k=(\d+)/(\d+)")
        .expect("valid transfer counter regex")
});

/// Per-file progress lines: `     32,768   8%   31.25MB/s    0:00:00`.
static PERCENT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[\d,]+\s+\d+%").expect("valid percent line regex"));

/// Any line with a free-standing percentage column.
static PERCENT_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s\d+%\s").expect("valid percent column regex"));

/// Lines shorter than this are never treated as file names.
const MIN_FILE_LINE_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLine {
    /// An aggregate counter: `total - remaining` of `total` entries checked.
    Counter { remaining: u64, total: u64 },
    /// A file name announced by the tool.
    FileTransferred,
    /// Anything that carries no progress information.
    Informational,
}

/// Applies the parsing rules in priority order.
pub fn classify_line(line: &str) -> OutputLine {
    if let Some(caps) = OVERALL_COUNTER.captures(line) {
        if let (Ok(remaining), Ok(total)) = (caps[1].parse(), caps[2].parse()) {
            return OutputLine::Counter { remaining, total };
        }
    }

    if let Some(caps) = TRANSFER_COUNTER.captures(line) {
        if let (Ok(remaining), Ok(total)) = (caps[2].parse(), caps[3].parse()) {
            return OutputLine::Counter { remaining, total };
        }
    }

    if is_file_line(line) {
        OutputLine::FileTransferred
    } else {
        OutputLine::Informational
    }
}

fn is_file_line(line: &str) -> bool {
    if line.trim().is_empty() || line.chars().count() < MIN_FILE_LINE_LEN {
        return false;
    }

    let is_summary =
        line.contains("file list") || line.contains("sent ") || line.contains("total size");
    let is_error = line.starts_with("rsync:") || line.starts_with("rsync error");
    let is_deletion = line.contains("deleting ");
    let is_percent = PERCENT_LINE.is_match(line) || PERCENT_COLUMN.is_match(line);

    !(is_summary || is_error || is_deletion || is_percent)
}

/// Splits one `\n`-terminated chunk of raw output into lines.
///
/// In-place progress redraws are separated by `\r`, so each redraw becomes
/// its own line. Invalid UTF-8 is replaced rather than rejected.
pub fn split_segment(segment: &[u8]) -> Vec<String> {
    segment
        .split(|b| *b == b'\r' || *b == b'\n')
        .filter(|piece| !piece.is_empty())
        .map(|piece| String::from_utf8_lossy(piece).into_owned())
        .collect()
}

/// Turns classified lines into progress updates for one mirror run.
#[derive(Debug)]
pub struct TransferCounter {
    total_files: usize,
    processed_files: usize,
}

impl TransferCounter {
    pub fn new(total_files: usize) -> Self {
        Self {
            total_files,
            processed_files: 0,
        }
    }

    pub fn processed_files(&self) -> usize {
        self.processed_files
    }

    pub fn observe(&mut self, line: &str) -> Option<ProgressUpdate> {
        match classify_line(line) {
            OutputLine::Counter { remaining, total } => {
                if total == 0 {
                    return None;
                }
                let completed = total.saturating_sub(remaining);
                Some(ProgressUpdate::new(
                    completed as f64 / total as f64,
                    format!("{} / {} files", completed, total),
                ))
            }
            OutputLine::FileTransferred => {
                self.processed_files += 1;
                Some(ProgressUpdate::files(self.processed_files, self.total_files))
            }
            OutputLine::Informational => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_counter_rule() {
        assert_eq!(
            classify_line("    409,600 100%   30.12MB/s    0:00:00 (xfr#1, to-chk=12/40)"),
            OutputLine::Counter { remaining: 12, total: 40 }
        );
        assert_eq!(
            classify_line("to-chk=0/3)"),
            OutputLine::Counter { remaining: 0, total: 3 }
        );
    }

    #[test]
    fn test_transfer_counter_rule_for_older_versions() {
        assert_eq!(
            classify_line("     1,024 100%    0.98MB/s    0:00:00 (xfer#3, to-check=5/10)"),
            OutputLine::Counter { remaining: 5, total: 10 }
        );
    }

    #[test]
    fn test_file_lines() {
        assert_eq!(classify_line("photos/img_001.jpg"), OutputLine::FileTransferred);
        assert_eq!(classify_line("notes.md"), OutputLine::FileTransferred);
        assert_eq!(classify_line("docs/"), OutputLine::Informational);
    }

    #[test]
    fn test_informational_lines() {
        for line in [
            "",
            "     ",
            "a.txt",
            "./",
            "sending incremental file list",
            "building file list ... done",
            "sent 1,234 bytes  received 56 bytes  2,580.00 bytes/sec",
            "total size is 409,600  speedup is 317.52",
            "rsync: [sender] link_stat \"/nope\" failed: No such file or directory (2)",
            "rsync error: some files/attrs were not transferred (code 23)",
            "deleting old/file.txt",
            "     32,768   8%   31.25MB/s    0:00:00",
            "big.iso  45%  10.00MB/s",
        ] {
            assert_eq!(classify_line(line), OutputLine::Informational, "{line:?}");
        }
    }

    #[test]
    fn test_split_segment_handles_carriage_returns() {
        let segment = b"big.iso\r     32,768   8%\r    409,600 100% (xfr#1, to-chk=0/1)\n";
        assert_eq!(
            split_segment(segment),
            vec![
                "big.iso".to_string(),
                "     32,768   8%".to_string(),
                "    409,600 100% (xfr#1, to-chk=0/1)".to_string(),
            ]
        );
    }

    #[test]
    fn test_split_segment_tolerates_invalid_utf8() {
        let lines = split_segment(b"caf\xe9-menu.txt\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("caf"));
        assert_eq!(classify_line(&lines[0]), OutputLine::FileTransferred);
    }

    #[test]
    fn test_transfer_counter_updates() {
        let mut counter = TransferCounter::new(4);

        assert_eq!(counter.observe("sending incremental file list"), None);

        let update = counter.observe("first.txt").unwrap();
        assert_eq!(update.label, "1 / 4 files");
        assert!((update.fraction - 0.25).abs() < 1e-9);

        let update = counter.observe("      10 100%  0.00kB/s 0:00:00 (xfr#1, to-chk=1/4)").unwrap();
        assert_eq!(update.label, "3 / 4 files");
        assert!((update.fraction - 0.75).abs() < 1e-9);

        assert_eq!(counter.observe("to-chk=0/0"), None);
        assert_eq!(counter.processed_files(), 1);
    }

    #[test]
    fn test_transfer_counter_without_known_total() {
        let mut counter = TransferCounter::new(0);
        let update = counter.observe("first.txt").unwrap();
        assert_eq!(update.fraction, 0.0);
        assert_eq!(update.label, "1 / 0 files");
    }
}
