/// Scripted Provider
///
/// A backend that answers commands from responses registered up front.
/// Every connection created by a provider shares the provider's script, so
/// the counters in [`ScriptStats`] see all of them.
use crate::core::db::command::{Command, CommandBehavior, IsolationLevel};
use crate::core::db::provider::{ConnectionState, NativeConnection, Provider, RowSource};
use crate::core::db::value::{DbType, Value};
use crate::core::{DbError, Result};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use tracing::debug;

/// Portable types the scripted backend accepts.
const SUPPORTED_TYPES: [DbType; 20] = [
    DbType::AnsiString,
    DbType::AnsiStringFixedLength,
    DbType::Binary,
    DbType::Boolean,
    DbType::Byte,
    DbType::Date,
    DbType::DateTime,
    DbType::DateTime2,
    DbType::DateTimeOffset,
    DbType::Decimal,
    DbType::Double,
    DbType::Guid,
    DbType::Int16,
    DbType::Int32,
    DbType::Int64,
    DbType::Single,
    DbType::String,
    DbType::StringFixedLength,
    DbType::Time,
    DbType::Xml,
];

/// Columns and rows returned for a registered query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: &[&str]) -> Self {
        ResultSet {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }
}

/// Counters kept across every connection of a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptStats {
    pub opens: usize,
    pub closes: usize,
    pub post_open_runs: usize,
    pub executions: usize,
    /// Rows handed out by `read`
    pub rows_read: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

#[derive(Debug, Clone)]
enum Response {
    NonQuery(u64),
    Scalar(Value),
    Query(ResultSet),
}

#[derive(Debug, Default)]
struct Script {
    responses: HashMap<String, Response>,
    outputs: HashMap<String, Vec<(String, Value)>>,
    failures: HashMap<String, String>,
    breaks: HashMap<String, String>,
    open_failure: Option<String>,
    post_open: Vec<String>,
    executed: Vec<String>,
    stats: ScriptStats,
}

/// In-process provider driven by registered responses.
///
/// Cloning shares the script, which lets a test keep a handle for
/// registering responses and reading counters after the provider has been
/// moved into a context.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    script: Rc<RefCell<Script>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        ScriptedProvider::default()
    }

    /// Adds a statement to run after every open.
    pub fn with_post_open(self, text: &str) -> Self {
        {
            let mut script = self.script.borrow_mut();
            script.post_open.push(text.to_string());
            script
                .responses
                .entry(key(text))
                .or_insert(Response::NonQuery(0));
        }
        self
    }

    pub fn on_non_query(&self, text: &str, affected: u64) {
        self.respond(text, Response::NonQuery(affected));
    }

    pub fn on_scalar(&self, text: &str, value: impl Into<Value>) {
        self.respond(text, Response::Scalar(value.into()));
    }

    pub fn on_query(&self, text: &str, result: ResultSet) {
        self.respond(text, Response::Query(result));
    }

    /// Values written to matching output parameters when `text` executes.
    pub fn on_outputs(&self, text: &str, outputs: Vec<(&str, Value)>) {
        let outputs = outputs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        self.script.borrow_mut().outputs.insert(key(text), outputs);
    }

    /// Executing `text` fails with a provider error carrying `message`.
    pub fn fail_on(&self, text: &str, message: &str) {
        self.script
            .borrow_mut()
            .failures
            .insert(key(text), message.to_string());
    }

    /// Executing `text` fails and leaves the connection broken.
    pub fn break_on(&self, text: &str, message: &str) {
        self.script
            .borrow_mut()
            .breaks
            .insert(key(text), message.to_string());
    }

    /// Every open fails until cleared with `None`.
    pub fn fail_open(&self, message: Option<&str>) {
        self.script.borrow_mut().open_failure = message.map(String::from);
    }

    pub fn stats(&self) -> ScriptStats {
        self.script.borrow().stats
    }

    /// Command texts in execution order, post-open statements included.
    pub fn executed(&self) -> Vec<String> {
        self.script.borrow().executed.clone()
    }

    fn respond(&self, text: &str, response: Response) {
        self.script.borrow_mut().responses.insert(key(text), response);
    }
}

impl Provider for ScriptedProvider {
    type Connection = ScriptedConnection;
    type NativeType = DbType;

    fn name(&self) -> &'static str {
        "Scripted"
    }

    fn create_unbound_connection(&self) -> ScriptedConnection {
        ScriptedConnection {
            script: Rc::clone(&self.script),
            connection_string: None,
            state: ConnectionState::Closed,
            cursor: None,
            in_transaction: false,
        }
    }

    fn post_open(&self, conn: &mut ScriptedConnection) -> Result<()> {
        let statements = {
            let mut script = self.script.borrow_mut();
            script.stats.post_open_runs += 1;
            script.post_open.clone()
        };

        for text in statements {
            let mut cmd = self.create_command_with_text(conn, &text);
            conn.execute_non_query(&mut cmd)?;
        }
        Ok(())
    }

    fn map_type(&self, db_type: DbType) -> Result<DbType> {
        if SUPPORTED_TYPES.contains(&db_type) {
            Ok(db_type)
        } else {
            Err(self.unsupported_type(db_type))
        }
    }
}

#[derive(Debug)]
struct Cursor {
    columns: Vec<String>,
    pending: VecDeque<Vec<Value>>,
    current: Option<Vec<Value>>,
    single_row: bool,
    yielded: usize,
}

/// Connection of the scripted backend. Rows are handed out one per `read`.
#[derive(Debug)]
pub struct ScriptedConnection {
    script: Rc<RefCell<Script>>,
    connection_string: Option<String>,
    state: ConnectionState,
    cursor: Option<Cursor>,
    in_transaction: bool,
}

impl ScriptedConnection {
    /// Puts an open connection into the `Broken` state.
    pub fn mark_broken(&mut self) {
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Broken;
            self.cursor = None;
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(DbError::Provider(format!(
                "connection is not open (state: {:?})",
                self.state
            )));
        }
        if self.cursor.is_some() {
            return Err(DbError::Provider(
                "a data reader is already open on this connection".to_string(),
            ));
        }
        Ok(())
    }

    /// Looks up the response for a command, applying failures and outputs.
    fn run(&mut self, cmd: &mut Command) -> Result<Response> {
        self.ensure_ready()?;

        let text = key(cmd.text());
        let mut script = self.script.borrow_mut();
        script.stats.executions += 1;
        script.executed.push(text.clone());
        debug!("Scripted execution: {}", text);

        let broken = script.breaks.get(&text).cloned();
        if let Some(message) = broken {
            drop(script);
            self.mark_broken();
            return Err(DbError::Provider(message));
        }
        if let Some(message) = script.failures.get(&text) {
            return Err(DbError::Provider(message.clone()));
        }

        if let Some(outputs) = script.outputs.get(&text) {
            for param in cmd.parameters_mut().iter_mut().filter(|p| p.is_output()) {
                if let Some((_, value)) = outputs
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(param.name()))
                {
                    param.set_value(value.clone());
                }
            }
        }

        script
            .responses
            .get(&text)
            .cloned()
            .ok_or_else(|| DbError::Provider(format!("no scripted response for: {}", text)))
    }

    fn current(&self) -> Result<&Vec<Value>> {
        self.cursor
            .as_ref()
            .and_then(|c| c.current.as_ref())
            .ok_or_else(|| DbError::Provider("the data reader has no current row".to_string()))
    }
}

impl RowSource for ScriptedConnection {
    fn field_count(&self) -> usize {
        self.cursor.as_ref().map(|c| c.columns.len()).unwrap_or(0)
    }

    fn field_name(&self, index: usize) -> Option<&str> {
        self.cursor
            .as_ref()
            .and_then(|c| c.columns.get(index))
            .map(String::as_str)
    }

    fn field_value(&self, index: usize) -> Result<Value> {
        let row = self.current()?;
        row.get(index).cloned().ok_or(DbError::ColumnOutOfRange {
            index,
            field_count: row.len(),
        })
    }
}

impl NativeConnection for ScriptedConnection {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn connection_string(&self) -> Option<&str> {
        self.connection_string.as_deref()
    }

    fn set_connection_string(&mut self, connection_string: &str) -> Result<()> {
        if self.state != ConnectionState::Closed {
            return Err(DbError::Provider(
                "cannot change the connection string of an open connection".to_string(),
            ));
        }
        self.connection_string = Some(connection_string.to_string());
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        if self.state == ConnectionState::Open {
            return Ok(());
        }
        if self.connection_string.is_none() {
            return Err(DbError::InvalidArgument(
                "connection string has not been set".to_string(),
            ));
        }

        let mut script = self.script.borrow_mut();
        if let Some(message) = &script.open_failure {
            return Err(DbError::Provider(message.clone()));
        }
        script.stats.opens += 1;
        self.state = ConnectionState::Open;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.cursor = None;
        self.in_transaction = false;
        self.state = ConnectionState::Closed;
        self.script.borrow_mut().stats.closes += 1;
        Ok(())
    }

    fn execute_non_query(&mut self, cmd: &mut Command) -> Result<u64> {
        match self.run(cmd)? {
            Response::NonQuery(affected) => Ok(affected),
            Response::Scalar(_) | Response::Query(_) => Ok(0),
        }
    }

    fn execute_scalar(&mut self, cmd: &mut Command) -> Result<Value> {
        match self.run(cmd)? {
            Response::Scalar(value) => Ok(value),
            Response::Query(result) => Ok(result
                .rows
                .first()
                .and_then(|row| row.first())
                .cloned()
                .unwrap_or(Value::Null)),
            Response::NonQuery(_) => Ok(Value::Null),
        }
    }

    fn execute_reader(&mut self, cmd: &mut Command, behavior: CommandBehavior) -> Result<()> {
        let result = match self.run(cmd)? {
            Response::Query(result) => result,
            Response::Scalar(value) => ResultSet::new(&[""]).row(vec![value]),
            Response::NonQuery(_) => ResultSet::default(),
        };

        self.cursor = Some(Cursor {
            columns: result.columns,
            pending: result.rows.into(),
            current: None,
            single_row: behavior.contains(CommandBehavior::SINGLE_ROW),
            yielded: 0,
        });
        Ok(())
    }

    fn read(&mut self) -> Result<bool> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| DbError::Provider("no data reader is open".to_string()))?;

        if cursor.single_row && cursor.yielded > 0 {
            cursor.current = None;
            return Ok(false);
        }

        cursor.current = cursor.pending.pop_front();
        match cursor.current {
            Some(_) => {
                cursor.yielded += 1;
                self.script.borrow_mut().stats.rows_read += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn is_reader_open(&self) -> bool {
        self.cursor.is_some()
    }

    fn close_reader(&mut self) -> Result<()> {
        self.cursor = None;
        Ok(())
    }

    fn begin_transaction(&mut self, _isolation: IsolationLevel) -> Result<()> {
        self.ensure_ready()?;
        if self.in_transaction {
            return Err(DbError::Transaction("transaction already in progress".to_string()));
        }
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(DbError::Transaction("no active transaction to commit".to_string()));
        }
        self.in_transaction = false;
        self.script.borrow_mut().stats.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(DbError::Transaction("no active transaction to rollback".to_string()));
        }
        self.in_transaction = false;
        self.script.borrow_mut().stats.rollbacks += 1;
        Ok(())
    }
}

fn key(text: &str) -> String {
    text.trim().to_string()
}
