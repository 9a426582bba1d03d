//! Database query implementations.
//!
//! Queries are organized into domain-specific traits that extend
//! [`rusqlite::Connection`], so they can be called directly on any
//! connection or transaction:
//!
//! ```ignore
//! use tidepool_db::queries::StateQueries;
//!
//! db.with_connection(|conn| {
//!     let value = conn.get_state_entry(b"some-key")?;
//!     Ok(value)
//! })?;
//! ```

pub mod bucket_list;
pub mod state;

pub use bucket_list::BucketListQueries;
pub use state::StateQueries;
