//! Entity caching and version-aware resolution of real-time updates.

pub mod entity_cache;
pub mod operations;
pub mod resolution;

pub use entity_cache::{EntityCache, IndexKind, IndexSpec};
pub use operations::apply_directive;
pub use resolution::{decide, CacheAction};
