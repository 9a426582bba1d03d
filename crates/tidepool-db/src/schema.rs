//! Database schema definitions.
//!
//! The schema version is tracked through SQLite's `user_version` pragma.
//! [`initialize`] is idempotent: it creates missing tables and stamps the
//! current version on a fresh database.

use rusqlite::Connection;

use crate::error::DbError;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS stateentries (
    entrykey  BLOB PRIMARY KEY,
    entryval  BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS bucketlist (
    sequence  INTEGER NOT NULL,
    level     INTEGER NOT NULL,
    currhash  TEXT NOT NULL,
    snaphash  TEXT NOT NULL,
    PRIMARY KEY (sequence, level)
);
"#;

/// Create all tables and stamp the schema version.
pub fn initialize(conn: &Connection) -> Result<(), DbError> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(DbError::Integrity(format!(
            "database schema version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }

    conn.execute_batch(CREATE_TABLES)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();

        let version: u32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_initialize_rejects_future_schema() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        assert!(initialize(&conn).is_err());
    }
}
