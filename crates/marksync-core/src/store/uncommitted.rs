//! Per-repository store of marker locations anchored to uncommitted edits.
//!
//! Every public method opens its own connection, so the store can be shared
//! freely between threads. Each `set`/`delete` runs in its own transaction
//! and is durable once it returns.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::errors::{SyncError, SyncResult};
use crate::models::MarkerLocation;
use crate::store::schema;

/// A marker location plus the full file text it was computed against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncommittedLocation {
    pub file_contents: String,
    pub location: MarkerLocation,
}

/// Stable id for a repository root: first 16 hex chars of the SHA-256 of
/// its canonical, `/`-separated path.
pub fn repo_id_for_root(repo_root: &Path) -> String {
    let resolved = std::fs::canonicalize(repo_root).unwrap_or_else(|_| {
        if repo_root.is_absolute() {
            repo_root.to_path_buf()
        } else {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(repo_root)
        }
    });
    let posix = resolved.to_string_lossy().replace('\\', "/");
    let mut hasher = Sha256::new();
    hasher.update(posix.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

fn checksum(payload: &str) -> i64 {
    i64::from(crc32fast::hash(payload.as_bytes()))
}

#[derive(Debug)]
pub struct UncommittedLocationStore {
    repo_root: PathBuf,
    db_path: PathBuf,
    max_snapshot_bytes: usize,
}

impl UncommittedLocationStore {
    /// Open (creating if needed) the store for `repo_root` under
    /// `<data_dir>/repos/`.
    pub fn open(data_dir: &Path, repo_root: &Path, max_snapshot_bytes: usize) -> SyncResult<Self> {
        let dir = data_dir.join("repos");
        std::fs::create_dir_all(&dir)?;
        let db_path = dir.join(format!("{}.sqlite", repo_id_for_root(repo_root)));
        let store = Self {
            repo_root: repo_root.to_path_buf(),
            db_path,
            max_snapshot_bytes,
        };
        let conn = store.connect()?;
        schema::init_schema(&conn)?;
        debug!(repo_root = %repo_root.display(), db = %store.db_path.display(), "uncommitted store opened");
        Ok(store)
    }

    fn connect(&self) -> SyncResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        schema::configure_connection(&conn)?;
        Ok(conn)
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Store `entry` under its location's marker id, replacing any previous
    /// entry.
    pub fn set(&self, entry: &UncommittedLocation) -> SyncResult<()> {
        let marker_id = entry.location.id.as_str();
        let payload = serde_json::to_string(entry)?;
        if payload.len() > self.max_snapshot_bytes {
            return Err(SyncError::Store(format!(
                "uncommitted snapshot for {marker_id} is {} bytes (limit {})",
                payload.len(),
                self.max_snapshot_bytes
            )));
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO uncommitted_locations(marker_id, payload, checksum, byte_len, updated_at) \
             VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP) \
             ON CONFLICT(marker_id) DO UPDATE SET \
                payload = excluded.payload, \
                checksum = excluded.checksum, \
                byte_len = excluded.byte_len, \
                updated_at = excluded.updated_at;",
            params![marker_id, payload, checksum(&payload), payload.len() as i64],
        )?;
        tx.commit()?;
        debug!(marker_id, "uncommitted location stored");
        Ok(())
    }

    /// Remove the entry for `marker_id`. Returns whether one existed.
    pub fn delete(&self, marker_id: &str) -> SyncResult<bool> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM uncommitted_locations WHERE marker_id = ?1;",
            params![marker_id],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Read one entry. A row that fails verification is discarded and
    /// reported as absent.
    pub fn get(&self, marker_id: &str) -> SyncResult<Option<UncommittedLocation>> {
        let conn = self.connect()?;
        let row: Option<(String, i64, i64)> = conn
            .query_row(
                "SELECT payload, checksum, byte_len FROM uncommitted_locations WHERE marker_id = ?1;",
                params![marker_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((payload, sum, len)) = row else {
            return Ok(None);
        };
        match verify(marker_id, &payload, sum, len) {
            Some(entry) => Ok(Some(entry)),
            None => {
                self.discard(&conn, marker_id)?;
                Ok(None)
            }
        }
    }

    /// Every marker id with a stored entry, oldest write first.
    pub fn keys(&self) -> SyncResult<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT marker_id FROM uncommitted_locations ORDER BY updated_at, marker_id;",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    /// Every verified entry keyed by marker id. Corrupt rows are discarded.
    pub fn all(&self) -> SyncResult<IndexMap<String, UncommittedLocation>> {
        let conn = self.connect()?;
        let rows: Vec<(String, String, i64, i64)> = {
            let mut stmt = conn.prepare(
                "SELECT marker_id, payload, checksum, byte_len FROM uncommitted_locations \
                 ORDER BY updated_at, marker_id;",
            )?;
            let mapped = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            mapped.collect::<Result<_, _>>()?
        };

        let mut entries = IndexMap::new();
        for (marker_id, payload, sum, len) in rows {
            match verify(&marker_id, &payload, sum, len) {
                Some(entry) => {
                    entries.insert(marker_id, entry);
                }
                None => self.discard(&conn, &marker_id)?,
            }
        }
        Ok(entries)
    }

    /// Fold the write-ahead log into the main database file.
    pub fn checkpoint(&self) -> SyncResult<()> {
        let conn = self.connect()?;
        let _: (i64, i64, i64) = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE);", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        Ok(())
    }

    fn discard(&self, conn: &Connection, marker_id: &str) -> SyncResult<()> {
        conn.execute(
            "DELETE FROM uncommitted_locations WHERE marker_id = ?1;",
            params![marker_id],
        )?;
        Ok(())
    }
}

fn verify(marker_id: &str, payload: &str, sum: i64, len: i64) -> Option<UncommittedLocation> {
    if payload.len() as i64 != len || checksum(payload) != sum {
        warn!(marker_id, "uncommitted location failed checksum - discarding");
        return None;
    }
    match serde_json::from_str(payload) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(marker_id, error = %e, "uncommitted location is unreadable - discarding");
            None
        }
    }
}
