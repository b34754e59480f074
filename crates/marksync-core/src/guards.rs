//! Shared guardrails for walk depth, batch sizes and snapshot bounds.

use std::time::Duration;

// Marker location guards
pub const DEFAULT_COMMIT_WALK_HOPS: i64 = 8;
pub const MAX_COMMIT_WALK_HOPS: i64 = 64;
pub const MAX_SUPERSEDE_CHAIN: usize = 256;
pub const MAX_SNAPSHOT_BYTES: i64 = 8 * 1024 * 1024;
pub const MIN_SNAPSHOT_BYTES: i64 = 1024;

/// Wall-clock bound on one line diff; past it hunks get coarser.
pub const DIFF_TIMEOUT: Duration = Duration::from_millis(500);

// Resolution guards
pub const DEFAULT_RESOLVE_WORKERS: i64 = 4;
pub const MAX_RESOLVE_WORKERS: i64 = 64;
pub const MAX_BATCH_ELEMENTS: usize = 10_000;

// Fallback matching
pub const MIN_LINE_MATCH_SCORE: f64 = 0.5;
pub const MAX_SNIPPET_LENGTH: usize = 512;

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

pub fn clamp_hops(value: i64) -> i64 {
    clamp_int(value, 1, MAX_COMMIT_WALK_HOPS)
}

pub fn clamp_workers(value: i64) -> i64 {
    clamp_int(value, 1, MAX_RESOLVE_WORKERS)
}

pub fn clamp_snapshot_bytes(value: i64) -> i64 {
    clamp_int(value, MIN_SNAPSHOT_BYTES, MAX_SNAPSHOT_BYTES)
}

/// Trim a code snippet to [`MAX_SNIPPET_LENGTH`] bytes on a char boundary.
pub fn truncate_snippet(snippet: &str) -> &str {
    let stripped = snippet.trim();
    if stripped.len() <= MAX_SNIPPET_LENGTH {
        return stripped;
    }
    let mut end = MAX_SNIPPET_LENGTH;
    while !stripped.is_char_boundary(end) {
        end -= 1;
    }
    &stripped[..end]
}
