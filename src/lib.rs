//! # gamedb
//!
//! Typed, change-tracked result rows and key-serialized asynchronous queries
//! over a pool of database connections.
//!
//! ```no_run
//! use gamedb::{Database, Mode};
//!
//! let mut db = Database::new();
//! db.init("", 0, "", "", "world.db", 4)?;
//!
//! db.execute_async(42, "UPDATE player SET gold = gold + 10 WHERE id = 42", |ok| {
//!     assert!(ok);
//! })?;
//! db.query_async(42, "SELECT * FROM player WHERE id = 42", Mode::Edit, |records| {
//!     if let Some(records) = records {
//!         println!("gold = {}", records[0].get_int("gold").unwrap());
//!     }
//! })?;
//!
//! // Later, on the thread that owns the callbacks:
//! db.flush();
//! # Ok::<(), gamedb::DbError>(())
//! ```

// Core infrastructure modules
pub mod config;
pub mod core;

#[cfg(test)]
mod test_utils;

pub use crate::config::{load_config, Config, DbConfig, SyncPath};
pub use crate::core::db::{
    Database, Field, FieldType, FieldValue, Mode, Record, Recordset,
};
pub use crate::core::{DbError, Result};
