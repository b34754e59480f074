//! Session-scoped collaborators and the manager set built on top of them.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::api::{EntitySource, MarkerLocationSource, MarkerSource};
use crate::config::SyncConfig;
use crate::documents::DocumentSource;
use crate::managers::{
    CodemarksManager, MarkerLocationManager, MarkersManager, StreamsManager, UsersManager,
};
use crate::models::{Codemark, FileStream, User};
use crate::telemetry::ErrorReporter;
use crate::vcs::VersionControl;

/// Anything holding session-lifetime cached state.
pub trait Resettable: Send + Sync {
    fn reset(&self);
}

/// Server fetch surfaces, one per entity kind.
#[derive(Clone)]
pub struct Sources {
    pub codemarks: Arc<dyn EntitySource<Codemark>>,
    pub users: Arc<dyn EntitySource<User>>,
    pub streams: Arc<dyn EntitySource<FileStream>>,
    pub markers: Arc<dyn MarkerSource>,
    pub marker_locations: Arc<dyn MarkerLocationSource>,
}

/// Everything a manager needs that is not its own cache. Built once at
/// session start and shared by handle.
pub struct SessionContext {
    config: SyncConfig,
    sources: Sources,
    vcs: Arc<dyn VersionControl>,
    documents: Arc<dyn DocumentSource>,
    reporter: Arc<dyn ErrorReporter>,
    pool: Option<rayon::ThreadPool>,
    /// Local working-tree root -> server repository id.
    repos: RwLock<IndexMap<PathBuf, String>>,
    resettables: RwLock<Vec<Weak<dyn Resettable>>>,
}

impl SessionContext {
    pub fn new(
        config: SyncConfig,
        sources: Sources,
        vcs: Arc<dyn VersionControl>,
        documents: Arc<dyn DocumentSource>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(config.resolve_workers.max(1))
            .thread_name(|i| format!("marksync-resolve-{i}"))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(error = %e, "resolve pool unavailable - using the global pool");
                None
            }
        };
        Self {
            config,
            sources,
            vcs,
            documents,
            reporter,
            pool,
            repos: RwLock::new(IndexMap::new()),
            resettables: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub fn vcs(&self) -> &dyn VersionControl {
        self.vcs.as_ref()
    }

    pub fn documents(&self) -> &dyn DocumentSource {
        self.documents.as_ref()
    }

    pub fn reporter(&self) -> &dyn ErrorReporter {
        self.reporter.as_ref()
    }

    /// Run `op` on the session's worker pool.
    pub fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    // -----------------------------------------------------------------------
    // Repository registry
    // -----------------------------------------------------------------------

    /// Roots are keyed canonically, matching what
    /// [`VersionControl::repo_root`] reports for symlinked checkouts.
    pub fn register_repo(&self, root: impl AsRef<Path>, repo_id: impl Into<String>) {
        let root = canonical_root(root.as_ref());
        let repo_id = repo_id.into();
        debug!(root = %root.display(), repo_id = %repo_id, "repository registered");
        self.repos.write().insert(root, repo_id);
    }

    pub fn repo_id_for_root(&self, root: &Path) -> Option<String> {
        let repos = self.repos.read();
        repos
            .get(root)
            .or_else(|| repos.get(&canonical_root(root)))
            .cloned()
    }

    // -----------------------------------------------------------------------
    // Reset
    // -----------------------------------------------------------------------

    /// Register state to be dropped on [`SessionContext::request_reset`].
    pub fn register_resettable(&self, target: Weak<dyn Resettable>) {
        self.resettables.write().push(target);
    }

    /// Invalidate every registered cache. Entries whose owner is gone are
    /// pruned.
    pub fn request_reset(&self) {
        let mut targets = self.resettables.write();
        targets.retain(|weak| weak.strong_count() > 0);
        for target in targets.iter().filter_map(Weak::upgrade) {
            target.reset();
        }
        info!(caches = targets.len(), "session caches reset");
    }
}

fn register<R: Resettable + 'static>(context: &SessionContext, target: &Arc<R>) {
    let weak = Arc::downgrade(target);
    let weak: Weak<dyn Resettable> = weak;
    context.register_resettable(weak);
}

/// One manager per entity kind, all sharing one [`SessionContext`].
pub struct Managers {
    context: Arc<SessionContext>,
    pub codemarks: Arc<CodemarksManager>,
    pub users: Arc<UsersManager>,
    pub streams: Arc<StreamsManager>,
    pub markers: Arc<MarkersManager>,
    pub marker_locations: Arc<MarkerLocationManager>,
}

impl Managers {
    pub fn new(context: Arc<SessionContext>) -> Self {
        let sources = context.sources().clone();
        let codemarks = Arc::new(CodemarksManager::new(sources.codemarks, Arc::clone(&context)));
        let users = Arc::new(UsersManager::new(sources.users, Arc::clone(&context)));
        let streams = Arc::new(StreamsManager::new(sources.streams, Arc::clone(&context)));
        let markers = Arc::new(MarkersManager::new(sources.markers, Arc::clone(&context)));
        let marker_locations = Arc::new(MarkerLocationManager::new(
            sources.marker_locations,
            Arc::clone(&context),
            Arc::clone(&streams),
            Arc::clone(&markers),
        ));

        register(&context, &codemarks);
        register(&context, &users);
        register(&context, &streams);
        register(&context, &markers);
        register(&context, &marker_locations);

        Self {
            context,
            codemarks,
            users,
            streams,
            markers,
            marker_locations,
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    pub fn request_reset(&self) {
        self.context.request_reset();
    }
}

fn canonical_root(root: &Path) -> PathBuf {
    std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf())
}
