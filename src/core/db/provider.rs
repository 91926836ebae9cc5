/// Provider Module
///
/// The capability a backend implements so the execution engine can run
/// against it. A provider builds native connections and maps portable
/// parameter types; a native connection opens, closes, executes a bound
/// [`Command`] and exposes at most one open row cursor at a time.
use crate::core::db::command::{Command, CommandBehavior, CommandKind, IsolationLevel};
use crate::core::db::value::{DbType, Value};
use crate::core::{DbError, Result};
use std::fmt;

/// Physical state of a native connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
    Broken,
}

/// Column access for the row a cursor is positioned on.
pub trait RowSource {
    /// Number of columns in the current result; zero when no cursor is open.
    fn field_count(&self) -> usize;

    fn field_name(&self, index: usize) -> Option<&str>;

    /// Value of a column of the current row.
    fn field_value(&self, index: usize) -> Result<Value>;
}

/// One physical connection to a backend.
///
/// The engine only calls the `execute_*` methods while [`state`] reports
/// `Open`. Opening a row cursor with `execute_reader` positions it before the
/// first row; `read` advances it.
///
/// [`state`]: NativeConnection::state
pub trait NativeConnection: RowSource {
    fn state(&self) -> ConnectionState;

    fn connection_string(&self) -> Option<&str>;

    fn set_connection_string(&mut self, connection_string: &str) -> Result<()>;

    fn open(&mut self) -> Result<()>;

    /// Closes the connection, dropping any open cursor and rolling back an
    /// active transaction.
    fn close(&mut self) -> Result<()>;

    fn execute_non_query(&mut self, cmd: &mut Command) -> Result<u64>;

    fn execute_scalar(&mut self, cmd: &mut Command) -> Result<Value>;

    fn execute_reader(&mut self, cmd: &mut Command, behavior: CommandBehavior) -> Result<()>;

    /// Advances the open cursor; `false` once the rows are exhausted.
    fn read(&mut self) -> Result<bool>;

    fn is_reader_open(&self) -> bool;

    fn close_reader(&mut self) -> Result<()>;

    fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}

/// A database backend pluggable into the execution engine.
pub trait Provider {
    type Connection: NativeConnection;

    /// Backend-native parameter type produced by the type mapping table.
    type NativeType: Copy + fmt::Debug + PartialEq;

    /// Backend name used in error messages.
    fn name(&self) -> &'static str;

    /// Command kind used when a request does not name one.
    fn default_command_kind(&self) -> CommandKind {
        CommandKind::StoredProcedure
    }

    /// Creates a connection with no connection string, for callers that
    /// manage the connection themselves.
    fn create_unbound_connection(&self) -> Self::Connection;

    fn create_connection(&self, connection_string: &str) -> Result<Self::Connection> {
        if connection_string.trim().is_empty() {
            return Err(DbError::blank_argument("connection_string"));
        }

        let mut conn = self.create_unbound_connection();
        conn.set_connection_string(connection_string)?;
        Ok(conn)
    }

    fn create_command(&self, _conn: &Self::Connection) -> Command {
        Command::new()
    }

    fn create_command_with_text(&self, _conn: &Self::Connection, text: &str) -> Command {
        Command::with_text(text)
    }

    /// Runs once after every Closed -> Open transition; an error here fails
    /// the open.
    fn post_open(&self, _conn: &mut Self::Connection) -> Result<()> {
        Ok(())
    }

    fn map_type(&self, db_type: DbType) -> Result<Self::NativeType>;

    /// Helper for `map_type` implementations backed by a lookup table.
    fn unsupported_type(&self, db_type: DbType) -> DbError {
        DbError::UnsupportedType {
            db_type,
            backend: self.name(),
        }
    }
}
