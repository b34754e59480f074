//! SQLite schema DDL and migration framework for the local store.

use rusqlite::Connection;

use crate::errors::SyncResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 1;

/// Bookkeeping DDL the migration framework itself needs. Data tables are
/// created by the migration steps.
///
/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
];

/// Apply per-connection pragmas. `synchronous = FULL` makes each committed
/// transaction durable before `COMMIT` returns.
pub fn configure_connection(conn: &Connection) -> SyncResult<()> {
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Create the base schema and bring it up to [`SCHEMA_VERSION`].
pub fn init_schema(conn: &Connection) -> SyncResult<()> {
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    migrate_schema(conn)
}

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations from the current stored version up to
/// [`SCHEMA_VERSION`]. Each step is wrapped in a SAVEPOINT so a failure
/// rolls back only that single step.
pub fn migrate_schema(conn: &Connection) -> SyncResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT marksync_migrate_step;")?;

        let step_result = (|| -> SyncResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                _ => {}
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT marksync_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT marksync_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT marksync_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Read the current schema version from `store_meta`.
/// Returns 0 when the key is absent or unparseable.
pub fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM store_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SyncResult<()> {
    conn.execute(
        "INSERT INTO store_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> SyncResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v0 -> v1: uncommitted location rows, indexed by last write.
fn migrate_to_v1(conn: &Connection) -> SyncResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS uncommitted_locations (
            marker_id TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            checksum INTEGER NOT NULL,
            byte_len INTEGER NOT NULL,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_uncommitted_updated
            ON uncommitted_locations(updated_at);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_statement_counts() {
        assert_eq!(SCHEMA_STATEMENTS.len(), 2);
    }

    #[test]
    fn baseline_creates_location_table() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let objects: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master \
                 WHERE name IN ('uncommitted_locations', 'idx_uncommitted_updated');",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(objects, 2);
    }

    #[test]
    fn migrate_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let steps: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM migration_history WHERE status = 'success';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(steps, i64::from(SCHEMA_VERSION));
    }

    #[test]
    fn migrate_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let steps: i64 = conn
            .query_row("SELECT COUNT(*) FROM migration_history;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(steps, i64::from(SCHEMA_VERSION));
    }
}
