//! Bucket list snapshot queries.

use rusqlite::{params, Connection};
use tidepool_common::Hash256;

use super::super::error::DbError;

/// Trait for querying and storing bucket list snapshots.
///
/// A snapshot records the (curr, snap) hash of every level at a given
/// state sequence, so a restarting node can tell what it last adopted.
pub trait BucketListQueries {
    /// Store a bucket list snapshot for a state sequence.
    fn store_bucket_list(
        &self,
        sequence: u64,
        levels: &[(Hash256, Hash256)],
    ) -> Result<(), DbError>;

    /// Load a bucket list snapshot by state sequence.
    fn load_bucket_list(&self, sequence: u64) -> Result<Option<Vec<(Hash256, Hash256)>>, DbError>;
}

impl BucketListQueries for Connection {
    fn store_bucket_list(
        &self,
        sequence: u64,
        levels: &[(Hash256, Hash256)],
    ) -> Result<(), DbError> {
        self.execute("DELETE FROM bucketlist WHERE sequence = ?1", params![sequence])?;
        for (idx, (curr, snap)) in levels.iter().enumerate() {
            self.execute(
                r#"
                INSERT INTO bucketlist (sequence, level, currhash, snaphash)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![sequence, idx as u32, curr.to_hex(), snap.to_hex()],
            )?;
        }
        Ok(())
    }

    fn load_bucket_list(&self, sequence: u64) -> Result<Option<Vec<(Hash256, Hash256)>>, DbError> {
        let mut stmt = self.prepare(
            r#"
            SELECT currhash, snaphash
            FROM bucketlist
            WHERE sequence = ?1
            ORDER BY level ASC
            "#,
        )?;
        let rows = stmt.query_map(params![sequence], |row| {
            let curr: String = row.get(0)?;
            let snap: String = row.get(1)?;
            Ok((curr, snap))
        })?;

        let mut levels = Vec::new();
        for row in rows {
            let (curr, snap) = row?;
            let curr_hash = Hash256::from_hex(&curr)
                .map_err(|e| DbError::Integrity(format!("Invalid curr hash: {}", e)))?;
            let snap_hash = Hash256::from_hex(&snap)
                .map_err(|e| DbError::Integrity(format!("Invalid snap hash: {}", e)))?;
            levels.push((curr_hash, snap_hash));
        }

        if levels.is_empty() {
            return Ok(None);
        }
        Ok(Some(levels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    #[test]
    fn test_store_and_load_snapshot() {
        let conn = Connection::open_in_memory().unwrap();
        schema::initialize(&conn).unwrap();

        let levels = vec![
            (Hash256::hash(b"c0"), Hash256::hash(b"s0")),
            (Hash256::hash(b"c1"), Hash256::ZERO),
        ];
        conn.store_bucket_list(42, &levels).unwrap();

        let loaded = conn.load_bucket_list(42).unwrap().unwrap();
        assert_eq!(loaded, levels);
        assert!(conn.load_bucket_list(43).unwrap().is_none());

        // Re-storing the same sequence replaces the old rows
        let replacement = vec![(Hash256::hash(b"c2"), Hash256::hash(b"s2"))];
        conn.store_bucket_list(42, &replacement).unwrap();
        let loaded = conn.load_bucket_list(42).unwrap().unwrap();
        assert_eq!(loaded, replacement);
    }
}
