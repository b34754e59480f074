//! Session configuration with environment overrides.

use std::path::{Path, PathBuf};

use crate::errors::{SyncError, SyncResult};
use crate::guards::{
    clamp_hops, clamp_snapshot_bytes, clamp_workers, DEFAULT_COMMIT_WALK_HOPS,
    DEFAULT_RESOLVE_WORKERS, MAX_SNAPSHOT_BYTES,
};

const DEFAULT_DATA_DIR: &str = "~/.marksync";

/// Knobs for one sync session.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Root under which per-repository uncommitted-location stores live.
    pub data_dir: PathBuf,
    pub max_commit_walk_hops: usize,
    pub max_snapshot_bytes: usize,
    pub resolve_workers: usize,
    /// Forward per-element resolution failures to the error reporter.
    pub report_resolution_errors: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: expand_tilde(DEFAULT_DATA_DIR),
            max_commit_walk_hops: DEFAULT_COMMIT_WALK_HOPS as usize,
            max_snapshot_bytes: MAX_SNAPSHOT_BYTES as usize,
            resolve_workers: DEFAULT_RESOLVE_WORKERS as usize,
            report_resolution_errors: true,
        }
    }
}

impl SyncConfig {
    /// Build a config from defaults overridden by `MARKSYNC_*` variables.
    pub fn from_env() -> SyncResult<Self> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("MARKSYNC_DATA_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                config.data_dir = expand_tilde(dir);
            }
        }
        if let Some(hops) = env_int("MARKSYNC_MAX_WALK_HOPS")? {
            config.max_commit_walk_hops = clamp_hops(hops) as usize;
        }
        if let Some(bytes) = env_int("MARKSYNC_MAX_SNAPSHOT_BYTES")? {
            config.max_snapshot_bytes = clamp_snapshot_bytes(bytes) as usize;
        }
        if let Some(workers) = env_int("MARKSYNC_RESOLVE_WORKERS")? {
            config.resolve_workers = clamp_workers(workers) as usize;
        }
        config.report_resolution_errors = env_flag("MARKSYNC_REPORT_ERRORS", true);
        Ok(config)
    }

    pub fn with_data_dir(mut self, data_dir: impl AsRef<Path>) -> Self {
        self.data_dir = data_dir.as_ref().to_path_buf();
        self
    }

    pub fn with_max_commit_walk_hops(mut self, hops: usize) -> Self {
        self.max_commit_walk_hops = clamp_hops(hops as i64) as usize;
        self
    }
}

fn env_int(name: &str) -> SyncResult<Option<i64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|e| SyncError::Config(format!("{name}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(val) => {
            let v = val.trim().to_lowercase();
            if default {
                !matches!(v.as_str(), "0" | "false" | "no" | "off")
            } else {
                matches!(v.as_str(), "1" | "true" | "yes" | "on")
            }
        }
        Err(_) => default,
    }
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}
