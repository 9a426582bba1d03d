//! Common types for tidepool.
//!
//! This crate provides the fundamental types shared across the workspace,
//! particularly the [`Hash256`] content-hash type.

mod types;

pub use types::Hash256;
