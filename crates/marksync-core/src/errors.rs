//! Error types for the marksync core library.

/// Top-level error enum for the marksync core library.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The server sent something that breaks the real-time protocol, e.g. a
    /// directive without `$version`.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Merge error: {0}")]
    Merge(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Content error: {0}")]
    Content(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("No repository root for {0}")]
    NoRepoRoot(String),

    #[error("Invalid document URI: {0}")]
    InvalidUri(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
}

impl SyncError {
    /// Whether this error originated from a server round-trip rather than
    /// local state.
    pub fn is_fetch(&self) -> bool {
        matches!(self, SyncError::Fetch(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
