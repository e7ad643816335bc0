//! SQLite-backed snapshot storage.
//!
//! One row per project holding the snapshot JSON. Useful when several
//! projects share a data directory and a single file is preferred.

#![cfg(feature = "sqlite")]

use mindmap_core::error::PersistenceError;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::info;

use crate::session::{EngineSnapshot, SnapshotBackend};

fn sql_err(e: rusqlite::Error) -> PersistenceError {
    PersistenceError::Io(e.to_string())
}

pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotStore {
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::init_with_connection(conn)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path).map_err(sql_err)?;
        Self::init_with_connection(conn)
    }

    fn init_with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS snapshots (
                project TEXT PRIMARY KEY,
                format INTEGER NOT NULL,
                graph_version INTEGER NOT NULL,
                saved_at TEXT NOT NULL,
                body TEXT NOT NULL
            );
            "#,
        )
        .map_err(sql_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SnapshotBackend for SqliteSnapshotStore {
    fn save(&self, snapshot: &EngineSnapshot) -> Result<(), PersistenceError> {
        let body = snapshot.to_json()?;
        let meta = &snapshot.metadata;
        self.conn
            .lock()
            .execute(
                "INSERT INTO snapshots (project, format, graph_version, saved_at, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(project) DO UPDATE SET
                    format = excluded.format,
                    graph_version = excluded.graph_version,
                    saved_at = excluded.saved_at,
                    body = excluded.body",
                params![
                    meta.project,
                    meta.format,
                    meta.graph_version as i64,
                    meta.saved_at.to_rfc3339(),
                    body
                ],
            )
            .map_err(sql_err)?;
        info!(project = %meta.project, "snapshot saved to sqlite");
        Ok(())
    }

    fn load(&self, project: &str) -> Result<EngineSnapshot, PersistenceError> {
        let body: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT body FROM snapshots WHERE project = ?1",
                params![project],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        let body = body.ok_or_else(|| PersistenceError::NotFound(project.to_string()))?;
        EngineSnapshot::from_json(&body)
    }

    fn exists(&self, project: &str) -> bool {
        self.conn
            .lock()
            .query_row(
                "SELECT 1 FROM snapshots WHERE project = ?1",
                params![project],
                |_| Ok(()),
            )
            .optional()
            .map(|r| r.is_some())
            .unwrap_or(false)
    }

    fn delete(&self, project: &str) -> Result<(), PersistenceError> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM snapshots WHERE project = ?1", params![project])
            .map_err(sql_err)?;
        if removed == 0 {
            return Err(PersistenceError::NotFound(project.to_string()));
        }
        Ok(())
    }

    fn projects(&self) -> Result<Vec<String>, PersistenceError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT project FROM snapshots ORDER BY project")
            .map_err(sql_err)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(sql_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
    }
}
