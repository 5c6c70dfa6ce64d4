//! Progress reporting contract shared by both strategies.

use serde::Serialize;
use std::sync::Arc;

/// A single progress notification. Each update supersedes the previous one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// Completion in `[0, 1]`.
    pub fraction: f64,
    /// Short counter text, e.g. `"12 / 40 files"`.
    pub label: String,
}

impl ProgressUpdate {
    pub fn new(fraction: f64, label: impl Into<String>) -> Self {
        Self {
            fraction: clamp_fraction(fraction),
            label: label.into(),
        }
    }

    /// `done / total files`, with a zero fraction when there is nothing to count.
    pub fn files(done: usize, total: usize) -> Self {
        let fraction = if total > 0 {
            done as f64 / total as f64
        } else {
            0.0
        };
        Self::new(fraction, format!("{} / {} files", done, total))
    }

    /// Terminal update for a finished transfer, always at 100%.
    pub fn complete(total: usize) -> Self {
        Self::new(1.0, format!("{} / {} files", total, total))
    }

    /// Start-of-run notification: progress back to zero, text cleared.
    pub fn reset() -> Self {
        Self::new(0.0, String::new())
    }
}

fn clamp_fraction(fraction: f64) -> f64 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

/// Caller-supplied progress sink.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Forwards updates for one strategy run, never letting the fraction go backwards.
pub struct ProgressReporter {
    callback: ProgressCallback,
    last_fraction: f64,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback,
            last_fraction: 0.0,
        }
    }

    pub fn report(&mut self, mut update: ProgressUpdate) {
        if update.fraction < self.last_fraction {
            update.fraction = self.last_fraction;
        }
        self.last_fraction = update.fraction;
        (self.callback)(update);
    }
}
