/// Error Module
///
/// This module defines the error type shared by the execution engine, the
/// providers and the configuration layer. Argument problems are reported
/// before any native call is made; native driver failures pass through
/// unwrapped.
use crate::core::db::value::{ConversionError, DbType};
use thiserror::Error;

/// Error type for every fallible operation in the crate.
///
/// - Argument validation (blank names, blank command text, negative timeouts)
/// - Parameter type mapping for a specific backend
/// - Column resolution on a row cursor
/// - Value coercion, with or without the surrounding command/column context
/// - Native connection and command failures
/// - Transactions, configuration, I/O and JSON output
#[derive(Error, Debug)]
pub enum DbError {
    /// A caller supplied an unusable argument; never retried
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The portable type has no native counterpart on the backend
    #[error("{db_type:?} is not a supported or ambiguous DbType for {backend}")]
    UnsupportedType {
        db_type: DbType,
        backend: &'static str,
    },

    /// A named column is absent from the current result
    #[error("Column not found: column name = {0} not found")]
    ColumnNotFound(String),

    /// A column ordinal lies outside the current result
    #[error("Column not found: ordinal {index} is outside 0..{field_count}")]
    ColumnOutOfRange { index: usize, field_count: usize },

    /// A value could not be coerced; `context` names the command, column or parameter
    #[error("Conversion error: {source} {context}.")]
    Conversion {
        context: String,
        #[source]
        source: ConversionError,
    },

    /// A value could not be coerced and no context applies
    #[error(transparent)]
    RawConversion(#[from] ConversionError),

    /// Database-related errors from SQLite operations
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Native failures reported by providers that are not backed by rusqlite
    #[error("Provider error: {0}")]
    Provider(String),

    /// The tool released its connection and cannot be used again
    #[error("Connection has been disposed")]
    Disposed,

    /// Transaction-related errors
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbError {
    /// Builds the argument error raised for blank names and command text.
    pub fn blank_argument(arg_name: &str) -> Self {
        DbError::InvalidArgument(format!(
            "{} cannot be null, empty, or consists only of white-space characters.",
            arg_name
        ))
    }
}

/// Type alias for Result to use DbError as the error type.
pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let db_err = DbError::Database(rusqlite::Error::ExecuteReturnedResults);
        assert!(db_err.to_string().contains("Database error"));

        let arg_err = DbError::blank_argument("cmd_text");
        assert_eq!(
            arg_err.to_string(),
            "Invalid argument: cmd_text cannot be null, empty, or consists only of white-space characters."
        );

        let type_err = DbError::UnsupportedType {
            db_type: DbType::Currency,
            backend: "Sqlite",
        };
        assert_eq!(
            type_err.to_string(),
            "Currency is not a supported or ambiguous DbType for Sqlite"
        );
    }

    #[test]
    fn test_conversion_context_keeps_source() {
        let source = ConversionError::new("text", "abc", "i32");
        let err = DbError::Conversion {
            context: "for column: age".to_string(),
            source: source.clone(),
        };

        assert!(err.to_string().contains("for column: age"));
        let inner = std::error::Error::source(&err).expect("source kept");
        assert_eq!(inner.to_string(), source.to_string());
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let db_err: DbError = io_err.into();
        match db_err {
            DbError::Io(_) => {}
            _ => panic!("Expected IO error"),
        }

        let json_err: std::result::Result<serde_json::Value, serde_json::Error> =
            serde_json::from_str("{ invalid json }");
        let db_err: DbError = json_err.unwrap_err().into();
        match db_err {
            DbError::Json(_) => {}
            _ => panic!("Expected JSON error"),
        }
    }
}
