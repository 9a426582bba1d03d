//! Live state entry queries.
//!
//! The `stateentries` table holds the node's materialized key-value state;
//! it is the table bucket replay writes into during catch-up.

use rusqlite::{params, Connection};

use super::super::error::DbError;

/// Trait for reading and writing live state entries.
pub trait StateQueries {
    /// Insert or replace a state entry.
    fn upsert_state_entry(&self, key: &[u8], value: &[u8]) -> Result<(), DbError>;

    /// Delete a state entry. Deleting a missing key is a no-op.
    fn delete_state_entry(&self, key: &[u8]) -> Result<(), DbError>;

    /// Load a state entry by key.
    fn get_state_entry(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError>;

    /// Count all state entries.
    fn count_state_entries(&self) -> Result<u64, DbError>;
}

impl StateQueries for Connection {
    fn upsert_state_entry(&self, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        self.execute(
            r#"
            INSERT INTO stateentries (entrykey, entryval)
            VALUES (?1, ?2)
            ON CONFLICT (entrykey) DO UPDATE SET entryval = excluded.entryval
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    fn delete_state_entry(&self, key: &[u8]) -> Result<(), DbError> {
        self.execute(
            "DELETE FROM stateentries WHERE entrykey = ?1",
            params![key],
        )?;
        Ok(())
    }

    fn get_state_entry(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        let mut stmt = self.prepare("SELECT entryval FROM stateentries WHERE entrykey = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn count_state_entries(&self) -> Result<u64, DbError> {
        let count: u64 =
            self.query_row("SELECT COUNT(*) FROM stateentries", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::initialize(&conn).unwrap();
        conn
    }

    #[test]
    fn test_upsert_and_get() {
        let conn = test_conn();

        conn.upsert_state_entry(b"alpha", b"one").unwrap();
        assert_eq!(conn.get_state_entry(b"alpha").unwrap().unwrap(), b"one");

        // Upsert replaces
        conn.upsert_state_entry(b"alpha", b"two").unwrap();
        assert_eq!(conn.get_state_entry(b"alpha").unwrap().unwrap(), b"two");
        assert_eq!(conn.count_state_entries().unwrap(), 1);
    }

    #[test]
    fn test_delete() {
        let conn = test_conn();

        conn.upsert_state_entry(b"alpha", b"one").unwrap();
        conn.delete_state_entry(b"alpha").unwrap();
        assert!(conn.get_state_entry(b"alpha").unwrap().is_none());

        // Deleting an absent key is fine
        conn.delete_state_entry(b"missing").unwrap();
    }
}
