//! SQLite implementation of the notesync local store.

mod migrations;

use chrono::{DateTime, SecondsFormat, Utc};
use notesync_core::{Error, LocalId, LocalStore, Note, ServerId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub use migrations::{get_pending_migrations, Migration, MIGRATIONS, SCHEMA_VERSION};

const SELECT_NOTE: &str = "SELECT local_id, server_id, title, tags, created_at, updated_at,
            pending_delete, pending_edit
     FROM notes";

/// SQLite-backed local store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// A row as stored, before parsing.
struct NoteRow {
    local_id: String,
    server_id: Option<String>,
    title: String,
    tags: String,
    created_at: String,
    updated_at: String,
    pending_delete: String,
    pending_edit: String,
}

impl NoteRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            local_id: row.get(0)?,
            server_id: row.get(1)?,
            title: row.get(2)?,
            tags: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            pending_delete: row.get(6)?,
            pending_edit: row.get(7)?,
        })
    }

    fn into_note(self) -> Result<Note, Error> {
        Ok(Note {
            local_id: self
                .local_id
                .parse()
                .map_err(|e: Error| Error::Store(e.to_string()))?,
            server_id: self.server_id.map(ServerId::new),
            title: self.title,
            tags: serde_json::from_str(&self.tags)
                .map_err(|e| Error::Store(format!("Failed to parse tags: {}", e)))?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            pending_delete: self.pending_delete.parse()?,
            pending_edit: self.pending_edit.parse()?,
        })
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Store(format!("Failed to parse timestamp {:?}: {}", s, e)))
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

impl SqliteStore {
    /// Open a database at the given path and run any pending migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let conn = Connection::open(path).map_err(store_err)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database and run migrations.
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, Error> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")
            .map_err(store_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("connection lock poisoned".into()))
    }

    /// Run any pending database migrations.
    fn run_migrations(&self) -> Result<(), Error> {
        let mut conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _notesync_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(store_err)?;

        let current_version: i64 = conn
            .query_row(
                "SELECT value FROM _notesync_meta WHERE key = 'schema_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(store_err)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            return Ok(());
        }

        let tx = conn.transaction().map_err(store_err)?;
        for migration in get_pending_migrations(current_version) {
            for statement in migration.statements {
                tx.execute(statement, []).map_err(|e| {
                    Error::Store(format!("Migration {} failed: {}", migration.name, e))
                })?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO _notesync_meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )
        .map_err(store_err)?;
        tx.commit().map_err(store_err)?;

        Ok(())
    }

    /// Current schema version recorded in the database.
    pub fn schema_version(&self) -> Result<i64, Error> {
        let conn = self.conn()?;
        let version: String = conn
            .query_row(
                "SELECT value FROM _notesync_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        version
            .parse()
            .map_err(|e| Error::Store(format!("Bad schema version {:?}: {}", version, e)))
    }
}

#[async_trait::async_trait(?Send)]
impl LocalStore for SqliteStore {
    async fn get(&self, local_id: &LocalId) -> Result<Option<Note>, Error> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{} WHERE local_id = ?1", SELECT_NOTE),
                params![local_id.to_string()],
                NoteRow::from_row,
            )
            .optional()
            .map_err(store_err)?;
        row.map(NoteRow::into_note).transpose()
    }

    async fn list(&self) -> Result<Vec<Note>, Error> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{} ORDER BY created_at DESC, local_id", SELECT_NOTE))
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], NoteRow::from_row)
            .map_err(store_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)?;
        rows.into_iter().map(NoteRow::into_note).collect()
    }

    async fn put(&self, note: &Note) -> Result<(), Error> {
        let conn = self.conn()?;
        let tags = serde_json::to_string(&note.tags)
            .map_err(|e| Error::Store(format!("Failed to serialize tags: {}", e)))?;
        conn.execute(
            "INSERT INTO notes (local_id, server_id, title, tags, created_at, updated_at,
                                pending_delete, pending_edit)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (local_id) DO UPDATE SET
                server_id = excluded.server_id,
                title = excluded.title,
                tags = excluded.tags,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                pending_delete = excluded.pending_delete,
                pending_edit = excluded.pending_edit",
            params![
                note.local_id.to_string(),
                note.server_id.as_ref().map(|id| id.as_str()),
                note.title,
                tags,
                format_timestamp(&note.created_at),
                format_timestamp(&note.updated_at),
                note.pending_delete.as_str(),
                note.pending_edit.as_str(),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete(&self, local_id: &LocalId) -> Result<bool, Error> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "DELETE FROM notes WHERE local_id = ?1",
                params![local_id.to_string()],
            )
            .map_err(store_err)?;
        Ok(rows > 0)
    }
}
