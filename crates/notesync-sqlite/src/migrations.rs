//! Embedded schema migrations for the SQLite store.
//!
//! Migrations are versioned and run automatically when the store is opened.
//! The schema version is tracked in the `_notesync_meta` table.

/// Current schema version. Increment when adding new migrations.
pub const SCHEMA_VERSION: i64 = 2;

/// A database migration with version number and SQL statements.
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

/// All migrations in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        statements: &[
            "CREATE TABLE IF NOT EXISTS notes (
                local_id TEXT PRIMARY KEY,
                server_id TEXT UNIQUE,
                title TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                pending_delete TEXT NOT NULL DEFAULT 'not_applicable',
                pending_edit TEXT NOT NULL DEFAULT 'not_applicable'
            )",
        ],
    },
    Migration {
        version: 2,
        name: "index_created_at",
        statements: &["CREATE INDEX IF NOT EXISTS idx_notes_created_at ON notes(created_at)"],
    },
];

/// Get migrations that need to be applied given the current version.
pub fn get_pending_migrations(current_version: i64) -> Vec<&'static Migration> {
    MIGRATIONS
        .iter()
        .filter(|m| m.version > current_version)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_migrations() {
        assert_eq!(get_pending_migrations(0).len(), MIGRATIONS.len());
        assert!(get_pending_migrations(SCHEMA_VERSION).is_empty());
        assert_eq!(get_pending_migrations(1)[0].version, 2);
    }

    #[test]
    fn test_versions_are_ordered() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
        assert_eq!(MIGRATIONS.last().unwrap().version, SCHEMA_VERSION);
    }
}
