//! Local persistence: the per-repository uncommitted-location store.

pub mod schema;
pub mod uncommitted;

pub use uncommitted::{repo_id_for_root, UncommittedLocation, UncommittedLocationStore};
