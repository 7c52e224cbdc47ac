/// Error Module
///
/// This module defines the error taxonomy for the database layer. Errors fall
/// into two groups: recoverable conditions reported by the database or the
/// pool (connectivity, rejected SQL, configuration), and programming errors
/// where a caller broke the record/field contract.
use thiserror::Error;

use crate::core::db::field::FieldType;

/// Comprehensive error type for the database layer.
#[derive(Error, Debug)]
pub enum DbError {
    /// The pool could not establish or keep a live connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// SQL rejected by the database
    #[error("Query error: {0}")]
    Query(String),

    /// Field accessor type does not match the stored type
    #[error("Type mismatch: expected {expected}, field holds {actual}")]
    TypeMismatch { expected: FieldType, actual: FieldType },

    /// Name lookup on a record failed
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Record or recordset index out of bounds
    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// A record slot that was never populated by `write_field`
    #[error("Field slot {0} is empty")]
    EmptyField(usize),

    /// Setter called on a record opened in read mode
    #[error("Record is read-only")]
    ReadOnlyRecord,

    #[error("Database is not initialized")]
    NotInitialized,

    #[error("Database is already initialized")]
    AlreadyInitialized,

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Returns true for contract violations that well-formed callers never
    /// trigger, as opposed to conditions reported by the database.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            DbError::TypeMismatch { .. }
                | DbError::UnknownField(_)
                | DbError::IndexOutOfRange { .. }
                | DbError::EmptyField(_)
                | DbError::ReadOnlyRecord
        )
    }

    /// Returns true when the failure came from the connection rather than
    /// from the SQL text.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DbError::Connection(_))
    }
}

/// Type alias for Result to use DbError as the error type.
pub type Result<T> = std::result::Result<T, DbError>;
