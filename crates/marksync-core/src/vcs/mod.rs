//! Version-control collaborator.

pub mod git;

use std::path::{Path, PathBuf};

use crate::errors::SyncResult;
use crate::location::{diff_text, Hunk};

pub use git::GitVersionControl;

/// Read-only view of the repository history a file lives in.
///
/// Absent data (untracked file, unknown commit, path missing at a revision)
/// is `Ok(None)`; errors are reserved for a repository that cannot be read.
pub trait VersionControl: Send + Sync {
    /// Working-tree root of the repository containing `path`.
    fn repo_root(&self, path: &Path) -> SyncResult<Option<PathBuf>>;

    /// Last commit reachable from `HEAD` that changed `path`.
    fn current_commit_hash(&self, path: &Path) -> SyncResult<Option<String>>;

    fn file_content_at_revision(&self, path: &Path, commit_hash: &str) -> SyncResult<Option<String>>;

    /// Line diff of `path` from `from_commit` to `to_commit`. `None` when
    /// either side cannot be read.
    fn diff_between_commits(
        &self,
        from_commit: &str,
        to_commit: &str,
        path: &Path,
    ) -> SyncResult<Option<Vec<Hunk>>> {
        let Some(old) = self.file_content_at_revision(path, from_commit)? else {
            return Ok(None);
        };
        let Some(new) = self.file_content_at_revision(path, to_commit)? else {
            return Ok(None);
        };
        Ok(Some(diff_text(&old, &new)))
    }
}
