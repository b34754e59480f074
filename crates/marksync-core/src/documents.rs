//! Live file content: open editor buffers first, disk second.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;
use url::Url;

use crate::errors::{SyncError, SyncResult};

/// Source of unsaved editor buffers.
pub trait DocumentSource: Send + Sync {
    /// Text of the buffer for `uri` when the editor has it open.
    fn read_buffer_if_open(&self, uri: &str) -> Option<String>;
}

/// In-memory registry of open buffers keyed by normalized URI.
#[derive(Debug, Default)]
pub struct OpenDocuments {
    buffers: RwLock<HashMap<String, String>>,
}

impl OpenDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the full text of an opened or edited buffer.
    pub fn update(&self, uri: &str, text: impl Into<String>) {
        self.buffers.write().insert(normalize_uri(uri), text.into());
    }

    pub fn close(&self, uri: &str) -> bool {
        self.buffers.write().remove(&normalize_uri(uri)).is_some()
    }

    pub fn is_open(&self, uri: &str) -> bool {
        self.buffers.read().contains_key(&normalize_uri(uri))
    }
}

impl DocumentSource for OpenDocuments {
    fn read_buffer_if_open(&self, uri: &str) -> Option<String> {
        self.buffers.read().get(&normalize_uri(uri)).cloned()
    }
}

/// Parse-and-print so `file:///a%20b` and `file:///a b` share one key.
fn normalize_uri(uri: &str) -> String {
    Url::parse(uri).map_or_else(|_| uri.to_string(), |url| url.to_string())
}

/// Filesystem path of a `file:` URI.
pub fn uri_to_path(uri: &str) -> SyncResult<PathBuf> {
    let url = Url::parse(uri).map_err(|e| SyncError::InvalidUri(format!("{uri}: {e}")))?;
    if url.scheme() != "file" {
        return Err(SyncError::InvalidUri(format!("{uri}: not a file URI")));
    }
    url.to_file_path()
        .map_err(|_| SyncError::InvalidUri(format!("{uri}: no local path")))
}

pub fn path_to_uri(path: &Path) -> SyncResult<String> {
    Url::from_file_path(path)
        .map(|url| url.to_string())
        .map_err(|_| SyncError::InvalidUri(format!("{} is not absolute", path.display())))
}

/// Current text of a document: the open buffer if any, else the file on
/// disk. `None` when neither exists.
pub fn read_live_text(
    documents: &dyn DocumentSource,
    uri: &str,
    path: &Path,
) -> SyncResult<Option<String>> {
    if let Some(text) = documents.read_buffer_if_open(uri) {
        return Ok(Some(text));
    }
    debug!(path = %path.display(), "buffer not open - reading from disk");
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
