//! SQLite storage layer.
//!
//! The pause store backed by SQLite with WAL mode and split read/write
//! connection pools.

pub mod pause;
pub mod pool;
