//! Database abstraction layer for tidepool.
//!
//! This crate provides SQLite-based persistence for the node, handling
//! storage and retrieval of:
//!
//! - **State entries**: the materialized key-value state that bucket replay
//!   writes into during catch-up
//! - **Bucket list snapshots**: the (curr, snap) hashes of every level at
//!   an adopted state sequence
//!
//! # Architecture
//!
//! - [`pool`]: Connection pool management using r2d2
//! - [`schema`]: Table definitions and schema versioning
//! - [`queries`]: Typed query traits for each data domain
//! - [`error`]: Error types for database operations
//!
//! # Usage
//!
//! ```no_run
//! use tidepool_db::{Database, queries::StateQueries};
//!
//! // Open a database (creates if it doesn't exist)
//! let db = Database::open("path/to/tidepool.db")?;
//!
//! // Or use an in-memory database for testing
//! let test_db = Database::open_in_memory()?;
//!
//! db.with_connection(|conn| {
//!     conn.upsert_state_entry(b"key", b"value")?;
//!     Ok(())
//! })?;
//! # Ok::<(), tidepool_db::DbError>(())
//! ```

pub mod error;
pub mod pool;
pub mod queries;
pub mod schema;

pub use error::DbError;
pub use pool::{Database, PooledConnection};
pub use queries::*;
pub use schema::SCHEMA_VERSION;

use std::path::Path;
use tracing::info;

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DbError>;

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// This will create the parent directory if needed, open or create the
    /// SQLite file, and initialize the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = r2d2_sqlite::SqliteConnectionManager::file(path);
        let pool = r2d2::Pool::builder().max_size(10).build(manager)?;

        let db = Self { pool };
        db.initialize()?;
        info!(path = %path.display(), "opened database");
        Ok(db)
    }

    /// Opens an in-memory database, primarily for testing.
    ///
    /// The pool is limited to a single connection since each in-memory
    /// SQLite database is connection-specific.
    pub fn open_in_memory() -> Result<Self> {
        let manager = r2d2_sqlite::SqliteConnectionManager::memory();
        let pool = r2d2::Pool::builder().max_size(1).build(manager)?;

        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<()> {
        self.with_connection(|conn| {
            // journal_mode returns a row (and WAL is unsupported for
            // in-memory databases), so query it rather than pragma_update.
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(())).ok();
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            schema::initialize(conn)
        })
    }
}
