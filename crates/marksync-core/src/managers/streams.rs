//! File streams: resolve a local file to its server-side stream.

use std::path::{Component, Path};

use tracing::debug;

use crate::errors::SyncResult;
use crate::managers::ManagerBase;
use crate::models::{Criteria, FileStream};

pub type StreamsManager = ManagerBase<FileStream>;

impl ManagerBase<FileStream> {
    /// Read-through lookup by `(repoId, file)`.
    pub fn get_by_repo_file(&self, repo_id: &str, file: &str) -> SyncResult<Option<FileStream>> {
        self.get(&Criteria::new([("repoId", repo_id), ("file", file)]))
    }

    /// Stream for a local file. `None` when the file is outside any
    /// registered repository or the server knows no stream for it.
    pub fn get_by_path(&self, path: &Path) -> SyncResult<Option<FileStream>> {
        let context = self.context();
        let Some(root) = context.vcs().repo_root(path)? else {
            debug!(path = %path.display(), "no repository root");
            return Ok(None);
        };
        let Some(repo_id) = context.repo_id_for_root(&root) else {
            debug!(root = %root.display(), "repository not registered");
            return Ok(None);
        };
        let Some(file) = repo_relative_file(&root, path) else {
            debug!(path = %path.display(), root = %root.display(), "path outside repository");
            return Ok(None);
        };
        self.get_by_repo_file(&repo_id, &file)
    }
}

/// `path` relative to `root`, `/`-separated. Tries the path as given first,
/// then canonicalized.
pub fn repo_relative_file(root: &Path, path: &Path) -> Option<String> {
    let relative = match path.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            let resolved = std::fs::canonicalize(path).ok()?;
            resolved.strip_prefix(root).ok()?.to_path_buf()
        }
    };
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::SyncConfig;
    use crate::documents::OpenDocuments;
    use crate::managers::{Managers, SessionContext, Sources};
    use crate::telemetry::LogErrorReporter;
    use crate::test_support::{stream, FakeSources, TestSession, REPO_ID, REPO_ROOT};
    use crate::vcs::GitVersionControl;

    #[test]
    fn relative_file_uses_forward_slashes() {
        let root = Path::new("/repo");
        assert_eq!(
            repo_relative_file(root, Path::new("/repo/src/lib/mod.rs")).as_deref(),
            Some("src/lib/mod.rs")
        );
        assert_eq!(repo_relative_file(root, Path::new("/repo")), None);
        assert_eq!(repo_relative_file(root, Path::new("/other/file.rs")), None);
    }

    #[test]
    fn path_lookup_reads_through_once() {
        let session = TestSession::new();
        session.sources.streams.insert(stream("s1", "src/a.rs"));
        let path = Path::new(REPO_ROOT).join("src/a.rs");

        let first = session.managers.streams.get_by_path(&path).unwrap().unwrap();
        assert_eq!(first.id, "s1");
        let again = session.managers.streams.get_by_path(&path).unwrap().unwrap();
        assert_eq!(again.id, "s1");
        assert_eq!(
            session.sources.streams.fetched(),
            vec![Criteria::new([("repoId", REPO_ID), ("file", "src/a.rs")])]
        );
    }

    #[test]
    fn unknown_repo_or_file_is_absent() {
        let session = TestSession::new();
        let outside = Path::new("/elsewhere/a.rs");
        assert!(session.managers.streams.get_by_path(outside).unwrap().is_none());

        let untracked = Path::new(REPO_ROOT).join("src/new.rs");
        assert!(session.managers.streams.get_by_path(&untracked).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_checkout_resolves_through_git() {
        let tmp = tempfile::tempdir().unwrap();
        let real = tmp.path().join("real");
        let link = tmp.path().join("link");
        std::fs::create_dir_all(real.join("src")).unwrap();
        git2::Repository::init(&real).unwrap();
        std::fs::write(real.join("src/a.rs"), "fn a() {}\n").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let fakes = FakeSources::default();
        fakes.streams.insert(stream("s1", "src/a.rs"));
        let sources = Sources {
            codemarks: fakes.codemarks.clone(),
            users: fakes.users.clone(),
            streams: fakes.streams.clone(),
            markers: fakes.markers.clone(),
            marker_locations: fakes.marker_locations.clone(),
        };
        let context = Arc::new(SessionContext::new(
            SyncConfig::default().with_data_dir(tmp.path().join("data")),
            sources,
            Arc::new(GitVersionControl::new()),
            Arc::new(OpenDocuments::new()),
            Arc::new(LogErrorReporter),
        ));
        context.register_repo(&link, REPO_ID);
        let managers = Managers::new(context);

        let found = managers.streams.get_by_path(&link.join("src/a.rs")).unwrap();
        assert_eq!(found.map(|s| s.id), Some("s1".to_string()));
        let found = managers.streams.get_by_path(&real.join("src/a.rs")).unwrap();
        assert_eq!(found.map(|s| s.id), Some("s1".to_string()));
    }
}
