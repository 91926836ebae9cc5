/// Connection Management Module
///
/// `DbTool` owns one native connection for its whole life. It opens the
/// connection on demand (recovering a broken one once), runs the provider's
/// post-open hook, rebinds a single reusable command for every call and
/// tracks the one transaction that may be active on it.
use crate::core::db::command::{Command, CommandBehavior, CommandKind, IsolationLevel, Transaction};
use crate::core::db::parameter::Parameter;
use crate::core::db::provider::{ConnectionState, NativeConnection, Provider};
use crate::core::db::reader::DataReader;
use crate::core::db::row::Row;
use crate::core::db::value::{convert, FromValue, Value};
use crate::core::{DbError, Result};
use std::rc::Rc;
use tracing::{debug, warn};

/// Command timeout applied when none is configured, in seconds
pub const DEFAULT_COMMAND_TIMEOUT: u32 = 120;

/// Connection lifecycle manager and command builder for one connection.
///
/// Not meant to be shared: every method takes `&mut self`, which is the
/// only serialization the connection gets.
pub struct DbTool<P: Provider> {
    provider: Rc<P>,
    /// `None` once disposed
    conn: Option<P::Connection>,
    command: Command,
    command_timeout: u32,
    next_transaction_id: u64,
    reader_behavior: Option<CommandBehavior>,
}

impl<P: Provider> DbTool<P> {
    /// Creates a tool owning a new connection built from `connection_string`.
    ///
    /// The connection stays closed until the first command needs it.
    pub fn new(provider: Rc<P>, connection_string: &str) -> Result<Self> {
        let conn = provider.create_connection(connection_string)?;
        Ok(DbTool::from_connection(provider, conn))
    }

    /// Creates a tool around a connection the caller built.
    pub fn from_connection(provider: Rc<P>, conn: P::Connection) -> Self {
        let command = provider.create_command(&conn);
        DbTool {
            provider,
            conn: Some(conn),
            command,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            next_transaction_id: 1,
            reader_behavior: None,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Command execution timeout in seconds
    pub fn command_timeout(&self) -> u32 {
        self.command_timeout
    }

    pub fn set_command_timeout(&mut self, seconds: i32) -> Result<()> {
        self.command_timeout = u32::try_from(seconds).map_err(|_| {
            DbError::InvalidArgument(format!("command timeout cannot be less than 0, got {}", seconds))
        })?;
        Ok(())
    }

    /// State of the owned connection; a disposed tool reports `Closed`.
    pub fn state(&self) -> ConnectionState {
        self.conn
            .as_ref()
            .map(|c| c.state())
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn connection(&self) -> Option<&P::Connection> {
        self.conn.as_ref()
    }

    pub fn connection_mut(&mut self) -> Option<&mut P::Connection> {
        self.conn.as_mut()
    }

    /// The command as bound by the most recent call.
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn is_disposed(&self) -> bool {
        self.conn.is_none()
    }

    /// Brings the connection to `Open`.
    ///
    /// A broken connection is closed first and reopened; that is the only
    /// recovery attempt. The post-open hook runs once per open transition.
    pub fn ensure_open(&mut self) -> Result<&mut P::Connection> {
        let conn = self.conn.as_mut().ok_or(DbError::Disposed)?;

        if conn.state() == ConnectionState::Broken {
            warn!("Connection is broken, closing it before reopening");
            conn.close()?;
        }

        if conn.state() == ConnectionState::Closed {
            conn.open()?;
            debug!("Connection opened, running post-open hook");

            if let Err(e) = self.provider.post_open(conn) {
                warn!("Post-open hook failed: {}", e);
                if let Err(close_err) = conn.close() {
                    debug!("Suppressed close error after hook failure: {}", close_err);
                }
                return Err(e);
            }
        }

        Ok(conn)
    }

    /// Closes the connection; closing a closed or disposed connection is a no-op.
    pub fn close_connection(&mut self) -> Result<()> {
        self.reader_behavior = None;
        self.command.set_transaction(None);

        match self.conn.as_mut() {
            Some(conn) if conn.state() != ConnectionState::Closed => {
                debug!("Closing connection");
                conn.close()
            }
            _ => Ok(()),
        }
    }

    /// Closes and releases the connection. Later calls do nothing.
    pub fn dispose(&mut self) {
        if self.conn.is_none() {
            return;
        }

        if let Err(e) = self.close_connection() {
            warn!("Error while closing connection on dispose: {}", e);
        }
        self.conn = None;
    }

    /// Binds kind, text, timeout and parameters onto the reused command.
    ///
    /// The connection is opened first. Previous parameters are dropped and
    /// absent values become database-null.
    pub fn create_command(
        &mut self,
        kind: CommandKind,
        text: &str,
        params: &[Parameter],
    ) -> Result<&Command> {
        if text.trim().is_empty() {
            return Err(DbError::blank_argument("cmd_text"));
        }

        self.ensure_open()?;

        debug!(?kind, params = params.len(), "Binding command: {}", text);
        self.command.rebind(kind, text, self.command_timeout);
        for param in params {
            self.command.add_parameter(param.clone());
        }

        Ok(&self.command)
    }

    /// Executes a command that returns no rows; returns the affected-row count.
    pub fn exec_non_query(
        &mut self,
        kind: CommandKind,
        text: &str,
        params: &mut [Parameter],
    ) -> Result<u64> {
        self.create_command(kind, text, params)?;
        let conn = self.conn.as_mut().ok_or(DbError::Disposed)?;
        let rows = conn.execute_non_query(&mut self.command)?;
        self.copy_outputs(params);
        Ok(rows)
    }

    /// Executes a command and returns the first column of the first row.
    pub fn exec_scalar_value(
        &mut self,
        kind: CommandKind,
        text: &str,
        params: &mut [Parameter],
    ) -> Result<Value> {
        self.create_command(kind, text, params)?;
        let conn = self.conn.as_mut().ok_or(DbError::Disposed)?;
        let value = conn.execute_scalar(&mut self.command)?;
        self.copy_outputs(params);
        Ok(value)
    }

    /// Scalar execution converted to `T`; conversion errors are not wrapped.
    pub fn exec_scalar<T: FromValue + Default>(
        &mut self,
        kind: CommandKind,
        text: &str,
        params: &mut [Parameter],
    ) -> Result<T> {
        let value = self.exec_scalar_value(kind, text, params)?;
        Ok(convert(value)?)
    }

    /// Opens a row cursor over the bound command.
    pub fn data_reader(
        &mut self,
        behavior: CommandBehavior,
        kind: CommandKind,
        text: &str,
        params: &[Parameter],
    ) -> Result<DataReader<'_, P>> {
        self.open_reader(behavior, kind, text, params)?;
        Ok(DataReader::new(self))
    }

    /// Begins a transaction and binds it to the tool's command.
    ///
    /// At most one transaction can be active per tool.
    pub fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<Transaction> {
        if self.command.transaction().is_some() {
            return Err(DbError::Transaction(
                "a transaction is already active on this connection".to_string(),
            ));
        }

        let conn = self.ensure_open()?;
        conn.begin_transaction(isolation)?;

        let transaction = Transaction::new(self.next_transaction_id, isolation);
        self.next_transaction_id += 1;
        self.command.set_transaction(Some(transaction));
        debug!(id = transaction.id(), ?isolation, "Transaction started");
        Ok(transaction)
    }

    /// Commits the active transaction; no-op when none is active.
    pub fn commit(&mut self) -> Result<()> {
        let Some(transaction) = self.command.transaction() else {
            return Ok(());
        };

        self.command.set_transaction(None);
        let conn = self.conn.as_mut().ok_or(DbError::Disposed)?;
        debug!(id = transaction.id(), "Committing transaction");
        conn.commit()
    }

    /// Rolls back the active transaction; no-op when none is active.
    pub fn rollback(&mut self) -> Result<()> {
        let Some(transaction) = self.command.transaction() else {
            return Ok(());
        };

        self.command.set_transaction(None);
        let conn = self.conn.as_mut().ok_or(DbError::Disposed)?;
        debug!(id = transaction.id(), "Rolling back transaction");
        conn.rollback()
    }

    pub fn transaction(&self) -> Option<Transaction> {
        self.command.transaction()
    }

    pub(crate) fn open_reader(
        &mut self,
        behavior: CommandBehavior,
        kind: CommandKind,
        text: &str,
        params: &[Parameter],
    ) -> Result<()> {
        self.create_command(kind, text, params)?;
        let conn = self.conn.as_mut().ok_or(DbError::Disposed)?;
        conn.execute_reader(&mut self.command, behavior)?;
        self.reader_behavior = Some(behavior);
        Ok(())
    }

    pub(crate) fn read_row(&mut self) -> Result<bool> {
        let conn = self.conn.as_mut().ok_or(DbError::Disposed)?;
        conn.read()
    }

    pub(crate) fn current_row(&self) -> Result<Row<'_>> {
        let conn = self.conn.as_ref().ok_or(DbError::Disposed)?;
        Ok(Row::new(conn))
    }

    /// Closes the open cursor, and the connection when the cursor was opened
    /// with `CLOSE_CONNECTION`.
    pub(crate) fn close_reader(&mut self) -> Result<()> {
        let Some(behavior) = self.reader_behavior.take() else {
            return Ok(());
        };

        if let Some(conn) = self.conn.as_mut() {
            if conn.is_reader_open() {
                conn.close_reader()?;
            }
        }

        if behavior.contains(CommandBehavior::CLOSE_CONNECTION) {
            self.close_connection()?;
        }
        Ok(())
    }

    fn copy_outputs(&self, params: &mut [Parameter]) {
        for (target, bound) in params.iter_mut().zip(self.command.parameters()) {
            if target.is_output() {
                if let Some(value) = bound.value() {
                    target.set_value(value.clone());
                }
            }
        }
    }
}

impl<P: Provider> Drop for DbTool<P> {
    fn drop(&mut self) {
        self.dispose();
    }
}
