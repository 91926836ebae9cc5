/// Core Module for dbexec
///
/// Shared infrastructure for every provider: the execution engine, the
/// connection lifecycle manager, row materialization and the error type.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{DbError, Result};
