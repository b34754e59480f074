//! Marker location manager.
//!
//! Answers "where is each marker of this file" for a commit or for the live
//! buffer, walking backward from a marker's anchor commit when the requested
//! commit has no stored location, and keeps locations for markers created on
//! uncommitted edits until their file is committed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::api::MarkerLocationSource;
use crate::documents::{read_live_text, uri_to_path};
use crate::errors::{SyncError, SyncResult};
use crate::location::{diff_text, locate_by_code, relocate, relocate_all, Hunk};
use crate::managers::session::{Resettable, SessionContext};
use crate::managers::{ManagerBase, MarkersManager, StreamsManager};
use crate::models::{
    Entity, FileStream, LocationArray, LocationsResult, Marker, MarkerLocation, MarkerLocations,
    MissingLocation, NotLocatedReason,
};
use crate::store::{UncommittedLocation, UncommittedLocationStore};

/// Result of walking one marker from its known origins to a target commit.
enum WalkOutcome {
    Located(MarkerLocation),
    Missing(MissingLocation),
}

pub struct MarkerLocationManager {
    base: ManagerBase<MarkerLocations, dyn MarkerLocationSource>,
    context: Arc<SessionContext>,
    streams: Arc<StreamsManager>,
    markers: Arc<MarkersManager>,
    stores: RwLock<HashMap<PathBuf, Arc<UncommittedLocationStore>>>,
}

impl MarkerLocationManager {
    pub fn new(
        source: Arc<dyn MarkerLocationSource>,
        context: Arc<SessionContext>,
        streams: Arc<StreamsManager>,
        markers: Arc<MarkersManager>,
    ) -> Self {
        Self {
            base: ManagerBase::new(source, Arc::clone(&context)),
            context,
            streams,
            markers,
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub fn base(&self) -> &ManagerBase<MarkerLocations, dyn MarkerLocationSource> {
        &self.base
    }

    /// Stored locations for one stream at one commit, keyed by marker id.
    pub fn get_commit_location_set(
        &self,
        stream_id: &str,
        commit_hash: &str,
    ) -> SyncResult<IndexMap<String, MarkerLocation>> {
        let criteria = MarkerLocations::key_criteria(stream_id, commit_hash);
        let Some(set) = self.base.get(&criteria)? else {
            return Ok(IndexMap::new());
        };
        Ok(set
            .locations
            .iter()
            .map(|(marker_id, array)| {
                (marker_id.clone(), MarkerLocation::from_array(marker_id.as_str(), array))
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Commit locations
    // -----------------------------------------------------------------------

    /// Locations of every visible marker of `file_path` at `commit_hash`.
    /// Locations computed by walking history are persisted for the commit.
    pub fn get_commit_locations(
        &self,
        file_path: &Path,
        commit_hash: &str,
    ) -> SyncResult<LocationsResult> {
        let Some(stream) = self.streams.get_by_path(file_path)? else {
            info!(path = %file_path.display(), "no stream for file - no commit locations");
            return Ok(LocationsResult::default());
        };
        let markers = self.markers.get_by_stream(&stream.id, true)?;
        self.commit_locations_for(&stream, &markers, file_path, commit_hash)
    }

    fn commit_locations_for(
        &self,
        stream: &FileStream,
        markers: &[Marker],
        file_path: &Path,
        commit_hash: &str,
    ) -> SyncResult<LocationsResult> {
        let mut result = LocationsResult::default();
        let known = self.get_commit_location_set(&stream.id, commit_hash)?;

        let mut groups: IndexMap<String, Vec<&Marker>> = IndexMap::new();
        for marker in markers {
            match known.get(&marker.id) {
                Some(location) => record(&mut result, location.clone()),
                None => groups
                    .entry(marker.commit_hash_when_created.clone())
                    .or_default()
                    .push(marker),
            }
        }
        if groups.is_empty() {
            return Ok(result);
        }
        debug!(
            stream_id = %stream.id,
            commit_hash,
            missing = groups.values().map(Vec::len).sum::<usize>(),
            origins = groups.len(),
            "walking history for missing locations"
        );

        let groups: Vec<(String, Vec<&Marker>)> = groups.into_iter().collect();
        let walked: Vec<SyncResult<Vec<(String, WalkOutcome)>>> = self.context.install(|| {
            groups
                .par_iter()
                .map(|(anchor, group)| {
                    self.walk_group(&stream.id, anchor, group, commit_hash, file_path)
                })
                .collect()
        });

        let mut computed: IndexMap<String, LocationArray> = IndexMap::new();
        for group in walked {
            for (marker_id, outcome) in group? {
                match outcome {
                    WalkOutcome::Located(location) => {
                        computed.insert(marker_id, location.to_array());
                        record(&mut result, location);
                    }
                    WalkOutcome::Missing(missing) => result.mark_missing(&marker_id, missing),
                }
            }
        }
        if !computed.is_empty() {
            self.save_commit_locations(&stream.id, commit_hash, computed)?;
        }
        Ok(result)
    }

    /// Relocate every marker anchored at `anchor` to `target`.
    fn walk_group(
        &self,
        stream_id: &str,
        anchor: &str,
        markers: &[&Marker],
        target: &str,
        file_path: &Path,
    ) -> SyncResult<Vec<(String, WalkOutcome)>> {
        let anchor_locations = if anchor.is_empty() {
            IndexMap::new()
        } else {
            self.get_commit_location_set(stream_id, anchor)?
        };
        let hops = self.context.config().max_commit_walk_hops;
        let mut diffs: HashMap<String, Option<Vec<Hunk>>> = HashMap::new();
        let mut outcomes = Vec::with_capacity(markers.len());

        for marker in markers {
            let origins = known_origins(marker, anchor, &anchor_locations);
            if origins.is_empty() {
                let missing = MissingLocation::new(
                    NotLocatedReason::MissingOriginalLocation,
                    format!("No original location for marker {} at {anchor}", marker.id),
                );
                outcomes.push((marker.id.clone(), WalkOutcome::Missing(missing)));
                continue;
            }

            let mut located = None;
            for (commit, origin) in origins.iter().take(hops) {
                if !diffs.contains_key(commit) {
                    let hunks = if commit == target {
                        Some(Vec::new())
                    } else {
                        self.context
                            .vcs()
                            .diff_between_commits(commit, target, file_path)?
                    };
                    diffs.insert(commit.clone(), hunks);
                }
                if let Some(Some(hunks)) = diffs.get(commit) {
                    let moved = relocate(origin, hunks);
                    debug!(marker_id = %marker.id, from = %commit, to = target, "{origin} => {moved}");
                    located = Some(moved);
                    break;
                }
            }

            let outcome = match located {
                Some(location) => WalkOutcome::Located(location),
                None => {
                    let details = if origins.len() > hops {
                        format!("Walk budget of {hops} commits exhausted for marker {}", marker.id)
                    } else {
                        format!("No diff from any known commit of marker {} to {target}", marker.id)
                    };
                    WalkOutcome::Missing(MissingLocation::new(
                        NotLocatedReason::MissingOriginalCommit,
                        details,
                    ))
                }
            };
            outcomes.push((marker.id.clone(), outcome));
        }
        Ok(outcomes)
    }

    /// Persist computed locations and layer them over the cached set.
    fn save_commit_locations(
        &self,
        stream_id: &str,
        commit_hash: &str,
        locations: IndexMap<String, LocationArray>,
    ) -> SyncResult<()> {
        self.base
            .source()
            .create_marker_locations(stream_id, commit_hash, &locations)?;
        debug!(stream_id, commit_hash, count = locations.len(), "commit locations saved");

        let mut incoming = MarkerLocations::new(stream_id, commit_hash);
        incoming.locations = locations;
        let cache = self.base.cache();
        let existing = cache.get(&incoming.fetch_criteria())?;
        let merged = match &existing {
            Some(current) => MarkerLocations::merge(current, incoming)?,
            None => incoming,
        };
        cache.set(merged, existing.as_ref());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Live locations
    // -----------------------------------------------------------------------

    /// Locations of every visible marker in the live text of a document.
    pub fn get_current_locations(&self, document_uri: &str) -> SyncResult<LocationsResult> {
        let path = uri_to_path(document_uri)?;
        let vcs = self.context.vcs();
        let Some(repo_root) = vcs.repo_root(&path)? else {
            info!(uri = document_uri, "no repository root - no current locations");
            return Ok(LocationsResult::default());
        };
        let Some(stream) = self.streams.get_by_path(&path)? else {
            info!(uri = document_uri, "no stream for document - no current locations");
            return Ok(LocationsResult::default());
        };
        let markers = self.markers.get_by_stream(&stream.id, true)?;
        if markers.is_empty() {
            return Ok(LocationsResult::default());
        }

        let mut uncommitted = self.store_for(&repo_root)?.all()?;
        uncommitted.retain(|marker_id, _| markers.iter().any(|m| &m.id == marker_id));
        let committed: Vec<Marker> = markers
            .into_iter()
            .filter(|m| !uncommitted.contains_key(&m.id))
            .collect();

        let live = read_live_text(self.context.documents(), document_uri, &path)?
            .ok_or_else(|| {
                SyncError::Content(format!("Could not retrieve contents for {document_uri}"))
            })?;

        let current_commit = vcs.current_commit_hash(&path)?;
        let mut result = LocationsResult::default();
        let commit_text = match &current_commit {
            Some(commit) if !committed.is_empty() => {
                let at_commit = self.commit_locations_for(&stream, &committed, &path, commit)?;
                result.missing_locations = at_commit.missing_locations;
                vcs.file_content_at_revision(&path, commit)?
                    .map(|text| (text, at_commit.locations))
            }
            _ => None,
        };

        match commit_text {
            Some((text, at_commit)) => {
                let hunks = diff_text(&text, &live);
                for (_, location) in relocate_all(&at_commit, &hunks) {
                    record(&mut result, location);
                }
            }
            None => {
                debug!(uri = document_uri, "committed text unavailable - matching by code");
                for marker in &committed {
                    if result.missing_locations.contains_key(&marker.id) {
                        continue;
                    }
                    match locate_by_code(&marker.id, &live, &marker.code) {
                        Some(location) => result.mark_located(location),
                        None => result.mark_missing(
                            &marker.id,
                            MissingLocation::new(
                                NotLocatedReason::Unknown,
                                "No committed text and no matching code",
                            ),
                        ),
                    }
                }
            }
        }

        for (marker_id, entry) in &uncommitted {
            let hunks = diff_text(&entry.file_contents, &live);
            let moved = relocate(&entry.location, &hunks);
            debug!(marker_id = %marker_id, "uncommitted {} => {moved}", entry.location);
            result.mark_located(moved);
        }
        Ok(result)
    }

    /// Map a location in `text` (the live buffer of `document_uri`) back to
    /// the file's current commit.
    pub fn backtrack_location(
        &self,
        document_uri: &str,
        text: &str,
        location: &MarkerLocation,
    ) -> SyncResult<MarkerLocation> {
        let path = uri_to_path(document_uri)?;
        let vcs = self.context.vcs();
        let Some(commit) = vcs.current_commit_hash(&path)? else {
            debug!(uri = document_uri, "file has no commit - location kept as is");
            return Ok(location.clone());
        };
        let committed = vcs.file_content_at_revision(&path, &commit)?.ok_or_else(|| {
            SyncError::Content(format!("Could not retrieve contents of {document_uri} at {commit}"))
        })?;
        Ok(relocate(location, &diff_text(text, &committed)))
    }

    // -----------------------------------------------------------------------
    // Uncommitted locations
    // -----------------------------------------------------------------------

    /// Remember a marker location computed against uncommitted `file_contents`.
    /// `location.id` must be the marker id.
    pub fn save_uncommitted_location(
        &self,
        file_path: &Path,
        file_contents: &str,
        location: MarkerLocation,
    ) -> SyncResult<()> {
        let root = self
            .context
            .vcs()
            .repo_root(file_path)?
            .ok_or_else(|| SyncError::NoRepoRoot(file_path.display().to_string()))?;
        self.store_for(&root)?.set(&UncommittedLocation {
            file_contents: file_contents.to_string(),
            location,
        })
    }

    /// Promote uncommitted locations whose file has since been committed.
    /// Returns the number of markers promoted.
    pub fn flush_uncommitted_locations(&self, repo_root: &Path) -> SyncResult<usize> {
        let store = self.store_for(repo_root)?;
        let vcs = self.context.vcs();
        let mut flushed = 0;

        for marker_id in store.keys()? {
            let Some(entry) = store.get(&marker_id)? else {
                continue;
            };
            let Some(marker) = self.markers.get_by_id(&marker_id)? else {
                warn!(marker_id = %marker_id, "uncommitted location for unknown marker");
                continue;
            };
            let Some(stream) = self.streams.get_by_id(&marker.file_stream_id)? else {
                warn!(marker_id = %marker_id, stream_id = %marker.file_stream_id, "marker stream not found");
                continue;
            };
            let file_path = repo_root.join(&stream.file);
            let Some(commit) = vcs.current_commit_hash(&file_path)? else {
                debug!(marker_id = %marker_id, "file not committed yet");
                continue;
            };
            let Some(committed) = vcs.file_content_at_revision(&file_path, &commit)? else {
                debug!(marker_id = %marker_id, commit = %commit, "no content at commit");
                continue;
            };

            let moved = relocate(&entry.location, &diff_text(&entry.file_contents, &committed));
            if moved.is_entirely_deleted() {
                debug!(marker_id = %marker_id, commit = %commit, "code not in commit - keeping entry");
                continue;
            }

            let mut locations = IndexMap::new();
            locations.insert(marker_id.clone(), moved.to_array());
            self.save_commit_locations(&stream.id, &commit, locations)?;
            self.markers.update_commit_hash_when_created(&marker_id, &commit)?;
            store.delete(&marker_id)?;
            info!(marker_id = %marker_id, commit = %commit, "uncommitted location flushed");
            flushed += 1;
        }
        store.checkpoint()?;
        Ok(flushed)
    }

    fn store_for(&self, repo_root: &Path) -> SyncResult<Arc<UncommittedLocationStore>> {
        if let Some(store) = self.stores.read().get(repo_root) {
            return Ok(Arc::clone(store));
        }
        let config = self.context.config();
        let opened = Arc::new(UncommittedLocationStore::open(
            &config.data_dir,
            repo_root,
            config.max_snapshot_bytes,
        )?);
        let mut stores = self.stores.write();
        let store = stores
            .entry(repo_root.to_path_buf())
            .or_insert(opened);
        Ok(Arc::clone(store))
    }

    pub fn invalidate(&self) {
        self.base.invalidate();
    }
}

impl Resettable for MarkerLocationManager {
    fn reset(&self) {
        self.invalidate();
    }
}

/// Known locations of `marker`, anchor commit first, then its reference
/// locations in server order.
fn known_origins(
    marker: &Marker,
    anchor: &str,
    anchor_locations: &IndexMap<String, MarkerLocation>,
) -> Vec<(String, MarkerLocation)> {
    let mut origins: Vec<(String, MarkerLocation)> = Vec::new();
    if let Some(location) = anchor_locations.get(&marker.id) {
        origins.push((anchor.to_string(), location.clone()));
    }
    for reference in &marker.reference_locations {
        if reference.commit_hash.is_empty()
            || origins.iter().any(|(commit, _)| commit == &reference.commit_hash)
        {
            continue;
        }
        origins.push((
            reference.commit_hash.clone(),
            MarkerLocation::from_array(marker.id.as_str(), &reference.location),
        ));
    }
    origins
}

/// Entirely deleted locations are reported as missing.
fn record(result: &mut LocationsResult, location: MarkerLocation) {
    if location.is_entirely_deleted() {
        let id = location.id.clone();
        result.mark_missing(
            &id,
            MissingLocation::new(
                NotLocatedReason::CodeblockDeleted,
                format!("Code block of marker {id} was deleted"),
            ),
        );
    } else {
        result.mark_located(location);
    }
}
