//! Server collaborator interfaces.
//!
//! Transport, authentication and payload shapes live behind these traits.
//! Implementations are expected to carry their own timeout and retry policy;
//! this crate never retries a failed fetch.

use indexmap::IndexMap;

use crate::errors::{SyncError, SyncResult};
use crate::models::{Criteria, Entity, LocationArray, Marker, MarkerLocations, ID_FIELD};

/// Fetch primitives for one entity kind.
pub trait EntitySource<T: Entity>: Send + Sync {
    fn fetch_by_id(&self, id: &str) -> SyncResult<Option<T>>;

    /// Fetch by a secondary-index key. Kinds without criteria lookups only
    /// answer id criteria.
    fn fetch_by_criteria(&self, criteria: &Criteria) -> SyncResult<Option<T>> {
        match criteria.value(ID_FIELD) {
            Some(id) if criteria.is_id() => self.fetch_by_id(id),
            _ => Err(SyncError::Fetch(format!(
                "{} cannot be fetched by {criteria}",
                T::ENTITY_NAME
            ))),
        }
    }

    /// Dispatch to `fetch_by_id` or `fetch_by_criteria`.
    fn fetch(&self, criteria: &Criteria) -> SyncResult<Option<T>> {
        match criteria.value(ID_FIELD) {
            Some(id) if criteria.is_id() => self.fetch_by_id(id),
            _ => self.fetch_by_criteria(criteria),
        }
    }
}

/// Marker-specific server calls.
pub trait MarkerSource: EntitySource<Marker> {
    /// Every marker attached to a file stream, including superseded ones.
    fn fetch_by_stream(&self, stream_id: &str) -> SyncResult<Vec<Marker>>;

    /// Advance a marker's anchor commit. Returns the updated marker when the
    /// server echoes it back.
    fn update_commit_hash_when_created(
        &self,
        marker_id: &str,
        commit_hash: &str,
    ) -> SyncResult<Option<Marker>>;
}

/// Commit-location-set calls. `fetch_by_criteria` answers
/// `(streamId, commitHash)`.
pub trait MarkerLocationSource: EntitySource<MarkerLocations> {
    /// Persist locations for one stream at one commit. The server merges
    /// them into any existing set.
    fn create_marker_locations(
        &self,
        stream_id: &str,
        commit_hash: &str,
        locations: &IndexMap<String, LocationArray>,
    ) -> SyncResult<()>;
}
