/// Core Module
///
/// The record model, the driver seam, pooling and async scheduling, plus the
/// shared error type.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{DbError, Result};
