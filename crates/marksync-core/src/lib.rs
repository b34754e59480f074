//! Marksync core library: client-side synchronization of code annotations.
//!
//! This crate keeps a version-aware cache of server entities fed by real-time
//! partial updates, and tracks where each code marker sits in a file as the
//! file moves through commits and uncommitted edits. Transport, the editor
//! and telemetry are reached through the collaborator traits in [`api`],
//! [`documents`], [`vcs`] and [`telemetry`].

pub mod api;
pub mod cache;
pub mod config;
pub mod documents;
pub mod errors;
pub mod guards;
pub mod location;
pub mod managers;
pub mod models;
pub mod store;
pub mod telemetry;
pub mod vcs;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::SyncConfig;
pub use errors::{SyncError, SyncResult};
pub use managers::{Managers, SessionContext, Sources};
pub use models::{LocationsResult, MarkerLocation, RawMessage};
