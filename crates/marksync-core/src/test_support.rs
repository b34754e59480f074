//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Map;
use tempfile::TempDir;

use crate::api::{EntitySource, MarkerLocationSource, MarkerSource};
use crate::config::SyncConfig;
use crate::documents::OpenDocuments;
use crate::errors::{SyncError, SyncResult};
use crate::managers::{Managers, SessionContext, Sources};
use crate::models::{
    key_component, Codemark, Criteria, Entity, FileStream, LocationArray, Marker, MarkerLocations,
    User,
};
use crate::telemetry::{ErrorReport, ErrorReporter};
use crate::vcs::VersionControl;

pub const REPO_ROOT: &str = "/repo";
pub const REPO_ID: &str = "r1";

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn user(id: &str, version: u64, username: &str) -> User {
    User {
        id: id.into(),
        version: Some(version),
        username: username.into(),
        email: format!("{username}@example.com"),
        full_name: None,
        team_ids: Vec::new(),
        extra: Map::new(),
    }
}

pub fn codemark(id: &str, stream_id: &str) -> Codemark {
    Codemark {
        id: id.into(),
        version: Some(1),
        team_id: "t1".into(),
        stream_id: Some(stream_id.into()),
        post_id: None,
        text: String::new(),
        status: None,
        marker_ids: Vec::new(),
        modified_at: None,
        extra: Map::new(),
    }
}

pub fn stream(id: &str, file: &str) -> FileStream {
    FileStream {
        id: id.into(),
        version: Some(1),
        team_id: "t1".into(),
        repo_id: REPO_ID.into(),
        file: file.into(),
        extra: Map::new(),
    }
}

pub fn marker(id: &str, stream_id: &str, commit: &str) -> Marker {
    Marker {
        id: id.into(),
        version: Some(1),
        team_id: "t1".into(),
        file_stream_id: stream_id.into(),
        commit_hash_when_created: commit.into(),
        codemark_id: None,
        superseded_by_marker_id: None,
        deactivated: false,
        code: String::new(),
        reference_locations: Vec::new(),
        extra: Map::new(),
    }
}

/// `line 1\n` through `line {count}\n`.
pub fn numbered(count: u32) -> String {
    (1..=count).map(|i| format!("line {i}\n")).collect()
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Answers id and any-field criteria from an in-memory map.
pub struct FakeSource<T> {
    entities: RwLock<IndexMap<String, T>>,
    fetched: RwLock<Vec<Criteria>>,
    failing: AtomicBool,
}

impl<T: Entity> Default for FakeSource<T> {
    fn default() -> Self {
        Self {
            entities: RwLock::new(IndexMap::new()),
            fetched: RwLock::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }
}

impl<T: Entity> FakeSource<T> {
    pub fn insert(&self, entity: T) {
        self.entities.write().insert(entity.id().into_owned(), entity);
    }

    pub fn fetched(&self) -> Vec<Criteria> {
        self.fetched.read().clone()
    }

    pub fn fail_fetches(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> SyncResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Fetch(format!("{} server unavailable", T::ENTITY_NAME)));
        }
        Ok(())
    }

    fn matching(&self, criteria: &Criteria) -> Option<T> {
        self.entities
            .read()
            .values()
            .find(|entity| {
                let Ok(value) = serde_json::to_value(entity) else {
                    return false;
                };
                criteria.pairs().iter().all(|(field, wanted)| {
                    value.get(field).and_then(key_component).as_deref() == Some(wanted.as_str())
                })
            })
            .cloned()
    }
}

impl<T: Entity> EntitySource<T> for FakeSource<T> {
    fn fetch_by_id(&self, id: &str) -> SyncResult<Option<T>> {
        self.fetched.write().push(Criteria::id(id));
        self.check()?;
        Ok(self.entities.read().get(id).cloned())
    }

    fn fetch_by_criteria(&self, criteria: &Criteria) -> SyncResult<Option<T>> {
        self.fetched.write().push(criteria.clone());
        self.check()?;
        Ok(self.matching(criteria))
    }
}

#[derive(Default)]
pub struct FakeMarkerSource {
    inner: FakeSource<Marker>,
    stream_fetches: RwLock<Vec<String>>,
    anchor_updates: RwLock<Vec<(String, String)>>,
}

impl FakeMarkerSource {
    pub fn insert(&self, marker: Marker) {
        self.inner.insert(marker);
    }

    pub fn stream_fetches(&self) -> Vec<String> {
        self.stream_fetches.read().clone()
    }

    pub fn anchor_updates(&self) -> Vec<(String, String)> {
        self.anchor_updates.read().clone()
    }
}

impl EntitySource<Marker> for FakeMarkerSource {
    fn fetch_by_id(&self, id: &str) -> SyncResult<Option<Marker>> {
        self.inner.fetch_by_id(id)
    }

    fn fetch_by_criteria(&self, criteria: &Criteria) -> SyncResult<Option<Marker>> {
        self.inner.fetch_by_criteria(criteria)
    }
}

impl MarkerSource for FakeMarkerSource {
    fn fetch_by_stream(&self, stream_id: &str) -> SyncResult<Vec<Marker>> {
        self.stream_fetches.write().push(stream_id.to_string());
        self.inner.check()?;
        Ok(self
            .inner
            .entities
            .read()
            .values()
            .filter(|m| m.file_stream_id == stream_id)
            .cloned()
            .collect())
    }

    fn update_commit_hash_when_created(
        &self,
        marker_id: &str,
        commit_hash: &str,
    ) -> SyncResult<Option<Marker>> {
        self.anchor_updates
            .write()
            .push((marker_id.to_string(), commit_hash.to_string()));
        let mut entities = self.inner.entities.write();
        Ok(entities.get_mut(marker_id).map(|marker| {
            marker.commit_hash_when_created = commit_hash.to_string();
            marker.version = marker.version.map(|v| v + 1);
            marker.clone()
        }))
    }
}

type CreatedLocations = (String, String, IndexMap<String, LocationArray>);

#[derive(Default)]
pub struct FakeLocationSource {
    sets: RwLock<IndexMap<(String, String), MarkerLocations>>,
    fetched: RwLock<Vec<Criteria>>,
    created: RwLock<Vec<CreatedLocations>>,
}

impl FakeLocationSource {
    pub fn put(&self, stream_id: &str, commit_hash: &str, marker_id: &str, array: LocationArray) {
        self.sets
            .write()
            .entry((stream_id.to_string(), commit_hash.to_string()))
            .or_insert_with(|| MarkerLocations::new(stream_id, commit_hash))
            .locations
            .insert(marker_id.to_string(), array);
    }

    pub fn fetched(&self) -> Vec<Criteria> {
        self.fetched.read().clone()
    }

    pub fn created(&self) -> Vec<CreatedLocations> {
        self.created.read().clone()
    }
}

impl EntitySource<MarkerLocations> for FakeLocationSource {
    fn fetch_by_id(&self, _id: &str) -> SyncResult<Option<MarkerLocations>> {
        Ok(None)
    }

    fn fetch_by_criteria(&self, criteria: &Criteria) -> SyncResult<Option<MarkerLocations>> {
        self.fetched.write().push(criteria.clone());
        let (Some(stream_id), Some(commit_hash)) =
            (criteria.value("streamId"), criteria.value("commitHash"))
        else {
            return Ok(None);
        };
        Ok(self
            .sets
            .read()
            .get(&(stream_id.to_string(), commit_hash.to_string()))
            .cloned())
    }
}

impl MarkerLocationSource for FakeLocationSource {
    fn create_marker_locations(
        &self,
        stream_id: &str,
        commit_hash: &str,
        locations: &IndexMap<String, LocationArray>,
    ) -> SyncResult<()> {
        self.created.write().push((
            stream_id.to_string(),
            commit_hash.to_string(),
            locations.clone(),
        ));
        for (marker_id, array) in locations {
            self.put(stream_id, commit_hash, marker_id, *array);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Version control
// ---------------------------------------------------------------------------

/// Files under [`REPO_ROOT`] with explicit per-commit contents.
#[derive(Default)]
pub struct FakeVcs {
    contents: RwLock<HashMap<(PathBuf, String), String>>,
    current: RwLock<HashMap<PathBuf, String>>,
    reads: RwLock<Vec<(PathBuf, String)>>,
}

impl FakeVcs {
    pub fn put(&self, path: &Path, commit: &str, text: &str) {
        self.contents
            .write()
            .insert((path.to_path_buf(), commit.to_string()), text.to_string());
    }

    pub fn set_current(&self, path: &Path, commit: &str) {
        self.current
            .write()
            .insert(path.to_path_buf(), commit.to_string());
    }

    pub fn content_reads(&self) -> Vec<(PathBuf, String)> {
        self.reads.read().clone()
    }
}

impl VersionControl for FakeVcs {
    fn repo_root(&self, path: &Path) -> SyncResult<Option<PathBuf>> {
        Ok(path.starts_with(REPO_ROOT).then(|| PathBuf::from(REPO_ROOT)))
    }

    fn current_commit_hash(&self, path: &Path) -> SyncResult<Option<String>> {
        Ok(self.current.read().get(path).cloned())
    }

    fn file_content_at_revision(&self, path: &Path, commit_hash: &str) -> SyncResult<Option<String>> {
        let key = (path.to_path_buf(), commit_hash.to_string());
        self.reads.write().push(key.clone());
        Ok(self.contents.read().get(&key).cloned())
    }
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingReporter {
    reports: RwLock<Vec<ErrorReport>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.read().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, report: &ErrorReport) {
        self.reports.write().push(report.clone());
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeSources {
    pub codemarks: Arc<FakeSource<Codemark>>,
    pub users: Arc<FakeSource<User>>,
    pub streams: Arc<FakeSource<FileStream>>,
    pub markers: Arc<FakeMarkerSource>,
    pub marker_locations: Arc<FakeLocationSource>,
}

/// A full manager set wired to fakes, with its data dir in a temp dir and
/// [`REPO_ROOT`] registered as [`REPO_ID`].
pub struct TestSession {
    pub sources: FakeSources,
    pub vcs: Arc<FakeVcs>,
    pub documents: Arc<OpenDocuments>,
    pub reporter: Arc<RecordingReporter>,
    pub managers: Managers,
    _data_dir: TempDir,
}

impl TestSession {
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Session whose config is adjusted by `tune` after the data dir is set.
    pub fn with_config(tune: impl FnOnce(SyncConfig) -> SyncConfig) -> Self {
        let data_dir = tempfile::tempdir().unwrap();
        let config = tune(SyncConfig::default().with_data_dir(data_dir.path()));
        let fakes = FakeSources::default();
        let sources = Sources {
            codemarks: fakes.codemarks.clone(),
            users: fakes.users.clone(),
            streams: fakes.streams.clone(),
            markers: fakes.markers.clone(),
            marker_locations: fakes.marker_locations.clone(),
        };
        let vcs = Arc::new(FakeVcs::default());
        let documents = Arc::new(OpenDocuments::new());
        let reporter = Arc::new(RecordingReporter::default());
        let context = Arc::new(SessionContext::new(
            config,
            sources,
            vcs.clone(),
            documents.clone(),
            reporter.clone(),
        ));
        context.register_repo(REPO_ROOT, REPO_ID);

        Self {
            sources: fakes,
            vcs,
            documents,
            reporter,
            managers: Managers::new(context),
            _data_dir: data_dir,
        }
    }
}
