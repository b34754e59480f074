//! `git2`-backed version control.
//!
//! The repository is discovered and opened per call, so one instance serves
//! any number of repositories and never holds a handle across threads.

use std::path::{Path, PathBuf};

use git2::{ErrorCode, Oid, Repository};
use tracing::debug;

use crate::errors::SyncResult;
use crate::vcs::VersionControl;

#[derive(Debug, Default, Clone, Copy)]
pub struct GitVersionControl;

impl GitVersionControl {
    pub fn new() -> Self {
        Self
    }

    fn discover(path: &Path) -> SyncResult<Option<Repository>> {
        let start = if path.is_dir() {
            path
        } else {
            path.parent().unwrap_or(path)
        };
        match Repository::discover(start) {
            Ok(repo) => Ok(Some(repo)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// `path` relative to the repository's working tree.
    fn relative_path(repo: &Repository, path: &Path) -> Option<PathBuf> {
        let workdir = canonical(repo.workdir()?);
        let absolute = canonical(path);
        absolute.strip_prefix(&workdir).ok().map(Path::to_path_buf)
    }

    /// Blob id of `rel` in the tree of `commit`, if present.
    fn blob_id(commit: &git2::Commit<'_>, rel: &Path) -> SyncResult<Option<Oid>> {
        match commit.tree()?.get_path(rel) {
            Ok(entry) => Ok(Some(entry.id())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Canonicalize, falling back to canonicalizing the parent for paths that
/// no longer exist on disk.
fn canonical(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

impl VersionControl for GitVersionControl {
    fn repo_root(&self, path: &Path) -> SyncResult<Option<PathBuf>> {
        let Some(repo) = Self::discover(path)? else {
            return Ok(None);
        };
        Ok(repo.workdir().map(canonical))
    }

    fn current_commit_hash(&self, path: &Path) -> SyncResult<Option<String>> {
        let Some(repo) = Self::discover(path)? else {
            return Ok(None);
        };
        let Some(rel) = Self::relative_path(&repo, path) else {
            return Ok(None);
        };
        let head = match repo.head() {
            Ok(head) => head.peel_to_commit()?,
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        let Some(blob) = Self::blob_id(&head, &rel)? else {
            debug!(path = %rel.display(), "file not tracked at HEAD");
            return Ok(None);
        };

        // Follow first parents while the file's blob stays the same.
        let mut commit = head;
        loop {
            let parent = match commit.parent(0) {
                Ok(parent) => parent,
                Err(e) if e.code() == ErrorCode::NotFound => break,
                Err(e) => return Err(e.into()),
            };
            match Self::blob_id(&parent, &rel)? {
                Some(id) if id == blob => commit = parent,
                _ => break,
            }
        }
        Ok(Some(commit.id().to_string()))
    }

    fn file_content_at_revision(&self, path: &Path, commit_hash: &str) -> SyncResult<Option<String>> {
        let Some(repo) = Self::discover(path)? else {
            return Ok(None);
        };
        let Some(rel) = Self::relative_path(&repo, path) else {
            return Ok(None);
        };
        let Ok(oid) = Oid::from_str(commit_hash) else {
            return Ok(None);
        };
        let commit = match repo.find_commit(oid) {
            Ok(commit) => commit,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(blob_id) = Self::blob_id(&commit, &rel)? else {
            return Ok(None);
        };
        let blob = repo.find_blob(blob_id)?;
        Ok(Some(String::from_utf8_lossy(blob.content()).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;

    fn commit_file(repo: &Repository, rel: &str, content: &str) -> String {
        let root = repo.workdir().unwrap().to_path_buf();
        std::fs::write(root.join(rel), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(rel)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("marksync", "marksync@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, "update", &tree, &parents)
            .unwrap()
            .to_string()
    }

    #[test]
    fn tracks_last_commit_touching_each_file() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        let c1 = commit_file(&repo, "a.txt", "one\ntwo\n");
        let c2 = commit_file(&repo, "b.txt", "bee\n");
        let c3 = commit_file(&repo, "a.txt", "zero\none\ntwo\n");

        let vcs = GitVersionControl::new();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        assert_eq!(vcs.current_commit_hash(&a).unwrap(), Some(c3.clone()));
        assert_eq!(vcs.current_commit_hash(&b).unwrap(), Some(c2.clone()));

        assert_eq!(
            vcs.file_content_at_revision(&a, &c1).unwrap().as_deref(),
            Some("one\ntwo\n")
        );
        assert_eq!(vcs.file_content_at_revision(&b, &c1).unwrap(), None);

        let hunks = vcs.diff_between_commits(&c1, &c3, &a).unwrap().unwrap();
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].added, vec!["zero".to_string()]);
        assert_eq!(vcs.diff_between_commits(&c1, &c3, &b).unwrap(), None);
    }

    #[test]
    fn untracked_and_unknown_inputs_are_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        let vcs = GitVersionControl::new();
        let a = tmp.path().join("a.txt");
        std::fs::write(&a, "x\n").unwrap();
        // Unborn HEAD.
        assert_eq!(vcs.current_commit_hash(&a).unwrap(), None);

        commit_file(&repo, "a.txt", "x\n");
        let untracked = tmp.path().join("new.txt");
        std::fs::write(&untracked, "y\n").unwrap();
        assert_eq!(vcs.current_commit_hash(&untracked).unwrap(), None);
        assert_eq!(vcs.file_content_at_revision(&a, "not-a-hash").unwrap(), None);
        assert_eq!(
            vcs.file_content_at_revision(&a, &"0".repeat(40)).unwrap(),
            None
        );
    }

    #[test]
    fn repo_root_is_the_working_tree() {
        let tmp = tempfile::tempdir().unwrap();
        Repository::init(tmp.path()).unwrap();
        let nested = tmp.path().join("src").join("lib");
        std::fs::create_dir_all(&nested).unwrap();
        let file = nested.join("mod.rs");
        std::fs::write(&file, "").unwrap();

        let root = GitVersionControl::new().repo_root(&file).unwrap().unwrap();
        assert_eq!(root, std::fs::canonicalize(tmp.path()).unwrap());
    }
}
