//! Engine options.
//!
//! There is no configuration file: options come from code, the CLI, or the
//! environment via [`SyncOptions::from_env`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{SyncError, SyncResult};

pub const COPY_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Environment variable overriding [`SyncOptions::mirror_program`].
pub const ENV_MIRROR_PROGRAM: &str = "SYNCTOOL_MIRROR_PROGRAM";
/// Environment variable that, when set to a truthy value, disables the mirror tool.
pub const ENV_NO_MIRROR: &str = "SYNCTOOL_NO_MIRROR";

/// Arguments that would let the mirror tool remove files from the target.
const DELETING_ARGS: &[&str] = &["--del", "--delete", "--remove-source-files"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    /// Program launched by the external strategy.
    #[serde(default = "default_mirror_program")]
    pub mirror_program: PathBuf,
    /// Extra arguments placed before the fixed mirror arguments.
    #[serde(default)]
    pub mirror_args: Vec<String>,
    /// Try the mirror tool before falling back to the built-in copy.
    #[serde(default = "default_use_mirror")]
    pub use_mirror: bool,
    /// Copy buffer size for the built-in copy.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_mirror_program() -> PathBuf {
    PathBuf::from("rsync")
}

fn default_use_mirror() -> bool {
    true
}

fn default_buffer_size() -> usize {
    COPY_BUFFER_SIZE
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mirror_program: default_mirror_program(),
            mirror_args: Vec::new(),
            use_mirror: default_use_mirror(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl SyncOptions {
    /// Defaults overlaid with `SYNCTOOL_MIRROR_PROGRAM` and `SYNCTOOL_NO_MIRROR`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.apply_env(|key| std::env::var(key).ok());
        options
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(program) = lookup(ENV_MIRROR_PROGRAM).filter(|p| !p.trim().is_empty()) {
            self.mirror_program = PathBuf::from(program);
        }
        if let Some(flag) = lookup(ENV_NO_MIRROR) {
            if matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on") {
                self.use_mirror = false;
            }
        }
    }

    /// Rejects options that would break the additive guarantee or cannot work.
    pub fn validate(&self) -> SyncResult<()> {
        if self.buffer_size == 0 {
            return Err(SyncError::InvalidOption(
                "buffer size must be greater than zero".to_string(),
            ));
        }

        if self.mirror_program.as_os_str().is_empty() {
            return Err(SyncError::InvalidOption(
                "mirror program must not be empty".to_string(),
            ));
        }

        for arg in &self.mirror_args {
            let flag = arg.split('=').next().unwrap_or(arg.as_str());
            if DELETING_ARGS.iter().any(|d| flag == *d) || flag.starts_with("--delete-") {
                return Err(SyncError::InvalidOption(format!(
                    "'{}' would delete files from the target; only additive sync is supported",
                    arg
                )));
            }
        }

        Ok(())
    }

    /// Short tool name used in summaries and logs.
    pub fn mirror_name(&self) -> String {
        self.mirror_program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.mirror_program.display().to_string())
    }
}
