//! Shared typed models used across the cache, managers and location engine.

pub mod directive;
pub mod entities;
pub mod location;

use std::borrow::Cow;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::cache::IndexSpec;
use crate::errors::SyncResult;

pub use directive::{Directive, DirectiveVersion, Incoming, RawMessage, VersionBound};
pub use entities::{Codemark, FileStream, Marker, MarkerLocations, ReferenceLocation, User};
pub use location::{
    LocationArray, LocationMeta, LocationsResult, MarkerLocation, MissingLocation,
    NotLocatedReason, Position, Range,
};

/// Name of the primary key field every entity carries.
pub const ID_FIELD: &str = "id";

/// A synchronized, id-addressed domain object.
///
/// Implementors are plain serde structs; the cache reads secondary-index
/// fields and applies directives through their JSON form.
pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Human-readable kind name used in logs and error reports.
    const ENTITY_NAME: &'static str;

    /// Primary key. Stable for the entity's lifetime.
    fn id(&self) -> Cow<'_, str>;

    /// Server-assigned version; `None` for objects that never receive
    /// partial updates.
    fn version(&self) -> Option<u64>;

    /// Criteria used to look the entity up in the cache and to re-fetch it.
    fn fetch_criteria(&self) -> Criteria {
        Criteria::id(self.id())
    }

    /// Combine an accepted incoming copy with the cached one. The default
    /// replaces wholesale.
    fn merge(existing: &Self, incoming: Self) -> SyncResult<Self> {
        let _ = existing;
        Ok(incoming)
    }

    /// Secondary indices registered on this kind's cache.
    fn index_specs() -> Vec<IndexSpec> {
        Vec::new()
    }
}

/// An ordered list of `field = value` pairs identifying one entity (or one
/// group, for multi indices).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Criteria {
    pairs: Vec<(String, String)>,
}

impl Criteria {
    pub fn new<F, V>(pairs: impl IntoIterator<Item = (F, V)>) -> Self
    where
        F: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(field, value)| (field.into(), value.into()))
                .collect(),
        }
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self {
            pairs: vec![(ID_FIELD.to_string(), id.into())],
        }
    }

    pub fn is_id(&self) -> bool {
        self.pairs.len() == 1 && self.pairs[0].0 == ID_FIELD
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(field, _)| field.as_str())
    }

    pub fn values(&self) -> Vec<String> {
        self.pairs.iter().map(|(_, value)| value.clone()).collect()
    }

    pub fn value(&self, field: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, value)| value.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .pairs
            .iter()
            .map(|(field, value)| format!("{field}={value}"))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Render a JSON scalar as an index key component. Objects, arrays and
/// `null` are not indexable.
pub fn key_component(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
