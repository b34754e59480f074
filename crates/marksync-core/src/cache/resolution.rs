//! Version-aware decision for one incoming element.

use crate::errors::{SyncError, SyncResult};
use crate::models::{Entity, Incoming, VersionBound};

/// What to do with an incoming element given the cached copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheAction {
    /// Apply the element to (or store it in place of) the cached copy.
    Update,
    /// The cached copy is already at or past the element's version.
    Skip,
    /// A gap was detected; the authoritative copy must be fetched.
    Query,
}

/// Decide how to resolve `incoming` against `existing`.
///
/// Directives:
/// * nothing cached: `Query` (a directive alone cannot rebuild an entity)
/// * no `$version`: protocol error
/// * `before` is `*` or equals the cached version: `Update`
/// * `after` is not newer than the cached version: `Skip`
/// * otherwise: `Query`
///
/// Full entities:
/// * nothing cached, or neither side versioned: `Update`
/// * incoming newer: `Update`
/// * incoming not newer: `Skip`
/// * exactly one side versioned: `Query`
pub fn decide<T: Entity>(incoming: &Incoming<T>, existing: Option<&T>) -> SyncResult<CacheAction> {
    match incoming {
        Incoming::Directive(directive) => {
            let Some(existing) = existing else {
                return Ok(CacheAction::Query);
            };
            let version = directive.version.ok_or_else(|| {
                SyncError::Protocol(format!(
                    "Received directive without version attribute for object Id={}",
                    directive.id
                ))
            })?;
            let current = existing.version();
            let applies = match version.before {
                VersionBound::Any => true,
                VersionBound::Exact(before) => current == Some(before),
            };
            if applies {
                return Ok(CacheAction::Update);
            }
            match current {
                Some(current) if version.after <= current => Ok(CacheAction::Skip),
                _ => Ok(CacheAction::Query),
            }
        }
        Incoming::Entity(entity) => {
            let Some(existing) = existing else {
                return Ok(CacheAction::Update);
            };
            match (entity.version(), existing.version()) {
                (None, None) => Ok(CacheAction::Update),
                (Some(incoming), Some(current)) if incoming > current => Ok(CacheAction::Update),
                (Some(_), Some(_)) => Ok(CacheAction::Skip),
                _ => Ok(CacheAction::Query),
            }
        }
    }
}
