//! Synchronized domain entities.
//!
//! Every struct keeps unknown server fields in `extra` so that applying a
//! directive through the JSON form never drops data this crate does not model.

use std::borrow::Cow;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::IndexSpec;
use crate::errors::SyncResult;
use crate::models::location::LocationArray;
use crate::models::{Criteria, Entity};

// ---------------------------------------------------------------------------
// Codemark
// ---------------------------------------------------------------------------

/// A comment/annotation that owns one or more markers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Codemark {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default)]
    pub team_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub marker_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for Codemark {
    const ENTITY_NAME: &'static str = "Codemark";

    fn id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.id)
    }

    fn version(&self) -> Option<u64> {
        self.version
    }

    fn index_specs() -> Vec<IndexSpec> {
        vec![IndexSpec::multi(&["streamId"])]
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub team_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for User {
    const ENTITY_NAME: &'static str = "User";

    fn id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.id)
    }

    fn version(&self) -> Option<u64> {
        self.version
    }

    fn index_specs() -> Vec<IndexSpec> {
        vec![IndexSpec::unique(&["username"])]
    }
}

// ---------------------------------------------------------------------------
// FileStream
// ---------------------------------------------------------------------------

/// Server-side identity of one file in one repository. `file` is the path
/// relative to the repository root, `/`-separated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStream {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default)]
    pub team_id: String,
    pub repo_id: String,
    pub file: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for FileStream {
    const ENTITY_NAME: &'static str = "Stream";

    fn id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.id)
    }

    fn version(&self) -> Option<u64> {
        self.version
    }

    fn index_specs() -> Vec<IndexSpec> {
        vec![IndexSpec::unique(&["repoId", "file"]).read_through()]
    }
}

// ---------------------------------------------------------------------------
// Marker
// ---------------------------------------------------------------------------

/// A location anchored at `commit_hash_when_created` in a file's history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceLocation {
    pub commit_hash: String,
    pub location: LocationArray,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default)]
    pub team_id: String,
    pub file_stream_id: String,
    #[serde(default)]
    pub commit_hash_when_created: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codemark_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by_marker_id: Option<String>,
    #[serde(default)]
    pub deactivated: bool,
    /// Code snippet captured when the marker was created.
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub reference_locations: Vec<ReferenceLocation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Marker {
    /// Superseded and deactivated markers are kept in the cache but hidden
    /// from per-file listings.
    pub fn is_visible(&self) -> bool {
        !self.deactivated && self.superseded_by_marker_id.is_none()
    }
}

impl Entity for Marker {
    const ENTITY_NAME: &'static str = "Marker";

    fn id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.id)
    }

    fn version(&self) -> Option<u64> {
        self.version
    }

    fn index_specs() -> Vec<IndexSpec> {
        vec![IndexSpec::multi(&["fileStreamId"])]
    }
}

// ---------------------------------------------------------------------------
// MarkerLocations (CommitLocationSet)
// ---------------------------------------------------------------------------

/// All known marker locations for one file stream at one commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerLocations {
    pub stream_id: String,
    pub commit_hash: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub locations: IndexMap<String, LocationArray>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MarkerLocations {
    pub fn new(stream_id: impl Into<String>, commit_hash: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            commit_hash: commit_hash.into(),
            team_id: String::new(),
            locations: IndexMap::new(),
            extra: Map::new(),
        }
    }

    pub fn key_criteria(stream_id: &str, commit_hash: &str) -> Criteria {
        Criteria::new([("streamId", stream_id), ("commitHash", commit_hash)])
    }
}

impl Entity for MarkerLocations {
    const ENTITY_NAME: &'static str = "MarkerLocation";

    fn id(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{}:{}", self.stream_id, self.commit_hash))
    }

    fn version(&self) -> Option<u64> {
        None
    }

    fn fetch_criteria(&self) -> Criteria {
        Self::key_criteria(&self.stream_id, &self.commit_hash)
    }

    /// Locations for one commit arrive piecemeal, so an incoming set is
    /// layered over the cached one instead of replacing it.
    fn merge(existing: &Self, mut incoming: Self) -> SyncResult<Self> {
        let mut locations = existing.locations.clone();
        for (marker_id, array) in incoming.locations.drain(..) {
            locations.insert(marker_id, array);
        }
        incoming.locations = locations;
        Ok(incoming)
    }

    fn index_specs() -> Vec<IndexSpec> {
        vec![IndexSpec::unique(&["streamId", "commitHash"]).read_through()]
    }
}
