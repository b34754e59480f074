//! Markers: per-stream loading and supersede-chain traversal.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::api::MarkerSource;
use crate::errors::SyncResult;
use crate::guards::MAX_SUPERSEDE_CHAIN;
use crate::managers::session::{Resettable, SessionContext};
use crate::managers::ManagerBase;
use crate::models::{Criteria, Marker};

pub struct MarkersManager {
    base: ManagerBase<Marker, dyn MarkerSource>,
    /// Streams whose full marker list has been fetched this session.
    loaded_streams: RwLock<HashSet<String>>,
}

impl MarkersManager {
    pub fn new(source: Arc<dyn MarkerSource>, context: Arc<SessionContext>) -> Self {
        Self {
            base: ManagerBase::new(source, context),
            loaded_streams: RwLock::new(HashSet::new()),
        }
    }

    pub fn base(&self) -> &ManagerBase<Marker, dyn MarkerSource> {
        &self.base
    }

    pub fn get_by_id(&self, id: &str) -> SyncResult<Option<Marker>> {
        self.base.get_by_id(id)
    }

    /// Markers attached to a stream, fetched from the server on first use.
    /// With `visible_only`, superseded and deactivated markers are dropped.
    pub fn get_by_stream(&self, stream_id: &str, visible_only: bool) -> SyncResult<Vec<Marker>> {
        if !self.loaded_streams.read().contains(stream_id) {
            let fetched = self.base.source().fetch_by_stream(stream_id)?;
            debug!(stream_id, count = fetched.len(), "markers loaded for stream");
            self.base.cache().set_many(fetched);
            self.loaded_streams.write().insert(stream_id.to_string());
        }
        let markers = self
            .base
            .cache()
            .get_group(&Criteria::new([("fileStreamId", stream_id)]))?;
        Ok(if visible_only {
            markers.into_iter().filter(Marker::is_visible).collect()
        } else {
            markers
        })
    }

    /// Follow `superseded_by_marker_id` links to the newest marker. Stops at
    /// a cycle, a missing link or [`MAX_SUPERSEDE_CHAIN`] hops, returning the
    /// last marker reached.
    pub fn latest_in_chain(&self, marker_id: &str) -> SyncResult<Option<Marker>> {
        let Some(mut current) = self.get_by_id(marker_id)? else {
            return Ok(None);
        };
        let mut visited = HashSet::from([current.id.clone()]);
        while let Some(next_id) = current.superseded_by_marker_id.clone() {
            if visited.len() >= MAX_SUPERSEDE_CHAIN || !visited.insert(next_id.clone()) {
                warn!(marker_id, at = %current.id, "supersede chain cut short");
                break;
            }
            match self.get_by_id(&next_id)? {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(Some(current))
    }

    /// Move a marker's anchor to `commit_hash` on the server and in the
    /// cache.
    pub fn update_commit_hash_when_created(
        &self,
        marker_id: &str,
        commit_hash: &str,
    ) -> SyncResult<Option<Marker>> {
        let echoed = self
            .base
            .source()
            .update_commit_hash_when_created(marker_id, commit_hash)?;
        let cached = self.base.get_cached(&Criteria::id(marker_id))?;
        let updated = match (echoed, cached) {
            (Some(server), cached) => Some(self.base.cache().set(server, cached.as_ref())),
            (None, Some(mut local)) => {
                let previous = local.clone();
                local.commit_hash_when_created = commit_hash.to_string();
                Some(self.base.cache().set(local, Some(&previous)))
            }
            (None, None) => None,
        };
        Ok(updated)
    }

    pub fn invalidate(&self) {
        self.base.invalidate();
        self.loaded_streams.write().clear();
    }
}

impl Resettable for MarkersManager {
    fn reset(&self) {
        self.invalidate();
    }
}
