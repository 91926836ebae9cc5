/// SQLite Provider
///
/// Runs the execution engine against SQLite through rusqlite.
///
/// ## Connection strings
///
/// Either a plain path (`app.db`, `:memory:`) or `key=value` pairs separated
/// by `;` with the keys `Data Source` (alias `Filename`) and `Mode`
/// (`ReadOnly`, `ReadWrite`, `ReadWriteCreate`, `Memory`).
///
/// ## Row cursors
///
/// rusqlite rows borrow their prepared statement, so the cursor buffers the
/// result when the command executes and `read` walks the buffer. A lazy
/// fetch over this backend therefore holds every row of the result in
/// memory before the first pull; only the mapping into `T` is deferred.
/// `SINGLE_ROW` stops the buffering after the first row.
use crate::core::db::command::{Command, CommandBehavior, CommandKind, IsolationLevel};
use crate::core::db::parameter::{Direction, Parameter};
use crate::core::db::provider::{ConnectionState, NativeConnection, Provider, RowSource};
use crate::core::db::value::{DbType, FromValue, Value};
use crate::core::{DbError, Result};
use once_cell::sync::Lazy;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode, OpenFlags, Statement};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Storage classes a SQLite parameter is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqliteType {
    Integer,
    Real,
    Text,
    Blob,
}

static TYPE_MAP: Lazy<HashMap<DbType, SqliteType>> = Lazy::new(|| {
    HashMap::from([
        (DbType::AnsiString, SqliteType::Text),
        (DbType::AnsiStringFixedLength, SqliteType::Text),
        (DbType::Binary, SqliteType::Blob),
        (DbType::Boolean, SqliteType::Integer),
        (DbType::Byte, SqliteType::Integer),
        (DbType::Date, SqliteType::Text),
        (DbType::DateTime, SqliteType::Text),
        (DbType::DateTime2, SqliteType::Text),
        (DbType::DateTimeOffset, SqliteType::Text),
        (DbType::Decimal, SqliteType::Real),
        (DbType::Double, SqliteType::Real),
        (DbType::Guid, SqliteType::Text),
        (DbType::Int16, SqliteType::Integer),
        (DbType::Int32, SqliteType::Integer),
        (DbType::Int64, SqliteType::Integer),
        (DbType::Single, SqliteType::Real),
        (DbType::String, SqliteType::Text),
        (DbType::StringFixedLength, SqliteType::Text),
        (DbType::Time, SqliteType::Text),
        (DbType::Xml, SqliteType::Text),
    ])
});

/// Prefixes tried when a parameter name carries none.
const PARAMETER_PREFIXES: [char; 3] = [':', '@', '$'];

const DEFAULT_PRAGMAS: [&str; 1] = ["PRAGMA foreign_keys = ON;"];

/// SQLite backend. The post-open hook runs the configured pragmas.
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    pragmas: Vec<String>,
}

impl Default for SqliteProvider {
    fn default() -> Self {
        SqliteProvider {
            pragmas: DEFAULT_PRAGMAS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl SqliteProvider {
    pub fn new() -> Self {
        SqliteProvider::default()
    }

    /// Replaces the statements run after every open.
    pub fn with_pragmas(pragmas: Vec<String>) -> Self {
        SqliteProvider { pragmas }
    }

    pub fn pragmas(&self) -> &[String] {
        &self.pragmas
    }
}

impl Provider for SqliteProvider {
    type Connection = SqliteConnection;
    type NativeType = SqliteType;

    fn name(&self) -> &'static str {
        "Sqlite"
    }

    fn default_command_kind(&self) -> CommandKind {
        CommandKind::Text
    }

    fn create_unbound_connection(&self) -> SqliteConnection {
        SqliteConnection::default()
    }

    fn post_open(&self, conn: &mut SqliteConnection) -> Result<()> {
        for pragma in &self.pragmas {
            let mut cmd = self.create_command_with_text(conn, pragma);
            conn.execute_non_query(&mut cmd)?;
        }
        Ok(())
    }

    fn map_type(&self, db_type: DbType) -> Result<SqliteType> {
        TYPE_MAP
            .get(&db_type)
            .copied()
            .ok_or_else(|| self.unsupported_type(db_type))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Target {
    path: String,
    flags: OpenFlags,
}

#[derive(Debug, Default)]
struct Cursor {
    columns: Vec<String>,
    pending: VecDeque<Vec<Value>>,
    current: Option<Vec<Value>>,
}

/// A rusqlite connection that can be closed and reopened.
#[derive(Debug, Default)]
pub struct SqliteConnection {
    conn: Option<Connection>,
    connection_string: Option<String>,
    target: Option<Target>,
    broken: bool,
    cursor: Option<Cursor>,
}

impl SqliteConnection {
    /// Puts an open connection into the `Broken` state.
    pub fn mark_broken(&mut self) {
        if self.conn.is_some() {
            self.broken = true;
            self.cursor = None;
        }
    }

    /// The underlying rusqlite connection while open.
    pub fn native(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    fn live(&self) -> Result<&Connection> {
        if self.broken {
            return Err(DbError::Provider("connection is broken".to_string()));
        }
        if self.cursor.is_some() {
            return Err(DbError::Provider(
                "a data reader is already open on this connection".to_string(),
            ));
        }
        self.conn
            .as_ref()
            .ok_or_else(|| DbError::Provider("connection is not open".to_string()))
    }

    /// Prepares the command's statement with its timeout and parameters applied.
    fn prepare<'c>(conn: &'c Connection, cmd: &Command) -> Result<Statement<'c>> {
        let sql = statement_sql(cmd)?;
        conn.busy_timeout(busy_timeout(cmd.timeout()))?;
        let mut stmt = conn.prepare(&sql)?;
        bind_parameters(&mut stmt, cmd.parameters())?;
        Ok(stmt)
    }

    fn run_non_query(&self, cmd: &Command) -> Result<u64> {
        let conn = self.live()?;
        let mut stmt = Self::prepare(conn, cmd)?;

        if stmt.column_count() > 0 {
            let mut rows = stmt.raw_query();
            while rows.next()?.is_some() {}
            return Ok(0);
        }
        Ok(stmt.raw_execute()? as u64)
    }

    fn run_scalar(&self, cmd: &Command) -> Result<Value> {
        let conn = self.live()?;
        let mut stmt = Self::prepare(conn, cmd)?;

        if stmt.column_count() == 0 {
            stmt.raw_execute()?;
            return Ok(Value::Null);
        }
        let mut rows = stmt.raw_query();
        let value = match rows.next()? {
            Some(row) => from_sql(row.get_ref(0)?),
            None => Value::Null,
        };
        Ok(value)
    }

    fn run_reader(&self, cmd: &Command, behavior: CommandBehavior) -> Result<Cursor> {
        let conn = self.live()?;
        let mut stmt = Self::prepare(conn, cmd)?;

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let column_count = columns.len();
        let mut pending = VecDeque::new();

        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(from_sql(row.get_ref(i)?));
            }
            pending.push_back(values);
            if behavior.contains(CommandBehavior::SINGLE_ROW) {
                break;
            }
        }

        Ok(Cursor {
            columns,
            pending,
            current: None,
        })
    }

    fn run_batch(&self, sql: &str) -> Result<()> {
        self.live()?.execute_batch(sql)?;
        Ok(())
    }

    /// Marks the connection broken when the error says the database is gone.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(DbError::Database(e)) = &result {
            if is_fatal(e) {
                warn!("SQLite connection marked broken: {}", e);
                self.mark_broken();
            }
        }
        result
    }
}

impl RowSource for SqliteConnection {
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
        let row = self
            .cursor
            .as_ref()
            .and_then(|c| c.current.as_ref())
            .ok_or_else(|| DbError::Provider("the data reader has no current row".to_string()))?;
        row.get(index).cloned().ok_or(DbError::ColumnOutOfRange {
            index,
            field_count: row.len(),
        })
    }
}

impl NativeConnection for SqliteConnection {
    fn state(&self) -> ConnectionState {
        match (&self.conn, self.broken) {
            (Some(_), true) => ConnectionState::Broken,
            (Some(_), false) => ConnectionState::Open,
            (None, _) => ConnectionState::Closed,
        }
    }

    fn connection_string(&self) -> Option<&str> {
        self.connection_string.as_deref()
    }

    fn set_connection_string(&mut self, connection_string: &str) -> Result<()> {
        if self.conn.is_some() {
            return Err(DbError::Provider(
                "cannot change the connection string of an open connection".to_string(),
            ));
        }
        self.target = Some(parse_connection_string(connection_string)?);
        self.connection_string = Some(connection_string.to_string());
        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let target = self.target.as_ref().ok_or_else(|| {
            DbError::InvalidArgument("connection string has not been set".to_string())
        })?;

        let conn = Connection::open_with_flags(&target.path, target.flags)?;
        info!("Opened SQLite database: {}", target.path);
        self.conn = Some(conn);
        self.broken = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.cursor = None;
        self.broken = false;

        if let Some(conn) = self.conn.take() {
            debug!("Closing SQLite connection");
            conn.close().map_err(|(_, e)| DbError::Database(e))?;
        }
        Ok(())
    }

    fn execute_non_query(&mut self, cmd: &mut Command) -> Result<u64> {
        let result = self.run_non_query(cmd);
        self.track(result)
    }

    fn execute_scalar(&mut self, cmd: &mut Command) -> Result<Value> {
        let result = self.run_scalar(cmd);
        self.track(result)
    }

    fn execute_reader(&mut self, cmd: &mut Command, behavior: CommandBehavior) -> Result<()> {
        let result = self.run_reader(cmd, behavior);
        self.cursor = Some(self.track(result)?);
        Ok(())
    }

    fn read(&mut self) -> Result<bool> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| DbError::Provider("no data reader is open".to_string()))?;
        cursor.current = cursor.pending.pop_front();
        Ok(cursor.current.is_some())
    }

    fn is_reader_open(&self) -> bool {
        self.cursor.is_some()
    }

    fn close_reader(&mut self) -> Result<()> {
        self.cursor = None;
        Ok(())
    }

    fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<()> {
        let result = match isolation {
            IsolationLevel::Serializable => self.run_batch("BEGIN IMMEDIATE"),
            IsolationLevel::ReadUncommitted => self
                .run_batch("PRAGMA read_uncommitted = 1")
                .and_then(|_| self.run_batch("BEGIN DEFERRED")),
            _ => self.run_batch("BEGIN DEFERRED"),
        };
        self.track(result)
    }

    fn commit(&mut self) -> Result<()> {
        let result = self.run_batch("COMMIT");
        self.track(result)
    }

    fn rollback(&mut self) -> Result<()> {
        let result = self.run_batch("ROLLBACK");
        self.track(result)
    }
}

fn statement_sql(cmd: &Command) -> Result<String> {
    match cmd.kind() {
        CommandKind::Text => Ok(cmd.text().to_string()),
        CommandKind::TableDirect => Ok(format!(
            "SELECT * FROM \"{}\"",
            cmd.text().trim().replace('"', "\"\"")
        )),
        CommandKind::StoredProcedure => Err(DbError::Provider(
            "Sqlite does not support stored procedures".to_string(),
        )),
        CommandKind::Unrecognized(code) => Err(DbError::InvalidArgument(format!(
            "unrecognized command kind: {}",
            code
        ))),
    }
}

/// Zero waits indefinitely, as far as SQLite allows.
fn busy_timeout(seconds: u32) -> Duration {
    if seconds == 0 {
        Duration::from_millis(i32::MAX as u64)
    } else {
        Duration::from_secs(u64::from(seconds))
    }
}

fn bind_parameters(stmt: &mut Statement<'_>, params: &[Parameter]) -> Result<()> {
    for param in params {
        if matches!(param.direction(), Direction::Out | Direction::ReturnValue) {
            continue;
        }

        let Some(index) = parameter_index(stmt, param.name())? else {
            debug!("Statement has no placeholder for parameter {}", param.name());
            continue;
        };
        stmt.raw_bind_parameter(index, to_sql(param)?)?;
    }
    Ok(())
}

fn parameter_index(stmt: &Statement<'_>, name: &str) -> Result<Option<usize>> {
    if name.starts_with(PARAMETER_PREFIXES) {
        return Ok(stmt.parameter_index(name)?);
    }

    for prefix in PARAMETER_PREFIXES {
        if let Some(index) = stmt.parameter_index(&format!("{}{}", prefix, name))? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Converts a parameter value to what SQLite stores, honoring a declared type.
fn to_sql(param: &Parameter) -> Result<SqlValue> {
    let value = param.value().cloned().unwrap_or_default();
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    let Some(db_type) = param.db_type() else {
        return Ok(native(value));
    };
    let storage = TYPE_MAP
        .get(&db_type)
        .copied()
        .ok_or(DbError::UnsupportedType {
            db_type,
            backend: "Sqlite",
        })?;

    let coerced = match storage {
        SqliteType::Integer => i64::from_value(value).map(SqlValue::Integer),
        SqliteType::Real => f64::from_value(value).map(SqlValue::Real),
        SqliteType::Text => String::from_value(value).map(SqlValue::Text),
        SqliteType::Blob => Vec::<u8>::from_value(value).map(SqlValue::Blob),
    };
    coerced.map_err(|source| DbError::Conversion {
        context: format!("for parameter: {}", param.name()),
        source,
    })
}

fn native(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(b)),
        Value::Integer(i) => SqlValue::Integer(i),
        Value::Real(f) => SqlValue::Real(f),
        Value::Text(s) => SqlValue::Text(s),
        Value::Blob(b) => SqlValue::Blob(b),
        other @ (Value::Uuid(_) | Value::DateTime(_)) => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

fn is_fatal(error: &rusqlite::Error) -> bool {
    match error {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::CannotOpen
        ),
        _ => false,
    }
}

fn parse_connection_string(connection_string: &str) -> Result<Target> {
    let trimmed = connection_string.trim();
    if trimmed.is_empty() {
        return Err(DbError::blank_argument("connection_string"));
    }

    if !trimmed.contains('=') {
        return Ok(Target {
            path: trimmed.to_string(),
            flags: OpenFlags::default(),
        });
    }

    let mut path = None;
    let mut flags = OpenFlags::default();
    for pair in trimmed.split(';').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            DbError::InvalidArgument(format!("malformed connection string segment: {}", pair))
        })?;
        let value = value.trim();

        match key.trim().to_lowercase().as_str() {
            "data source" | "datasource" | "filename" => path = Some(value.to_string()),
            "mode" => flags = mode_flags(value)?,
            other => {
                return Err(DbError::InvalidArgument(format!(
                    "unsupported connection string keyword: {}",
                    other
                )))
            }
        }
    }

    let path = path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| DbError::blank_argument("Data Source"))?;
    Ok(Target { path, flags })
}

fn mode_flags(mode: &str) -> Result<OpenFlags> {
    let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    match mode.to_lowercase().as_str() {
        "readonly" => Ok(base | OpenFlags::SQLITE_OPEN_READ_ONLY),
        "readwrite" => Ok(base | OpenFlags::SQLITE_OPEN_READ_WRITE),
        "readwritecreate" => Ok(OpenFlags::default()),
        "memory" => Ok(OpenFlags::default() | OpenFlags::SQLITE_OPEN_MEMORY),
        other => Err(DbError::InvalidArgument(format!(
            "unsupported connection mode: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::connection::DbTool;
    use std::rc::Rc;

    fn memory_tool() -> DbTool<SqliteProvider> {
        let mut tool = DbTool::new(Rc::new(SqliteProvider::new()), ":memory:").unwrap();
        tool.exec_non_query(
            CommandKind::Text,
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL, code TEXT)",
            &mut [],
        )
        .unwrap();
        tool
    }

    fn insert(tool: &mut DbTool<SqliteProvider>, id: i64, name: &str, score: Option<f64>) {
        let mut params = vec![
            Parameter::new("id", id).unwrap(),
            Parameter::new("@name", name).unwrap(),
            Parameter::new("score", score).unwrap(),
        ];
        tool.exec_non_query(
            CommandKind::Text,
            "INSERT INTO items (id, name, score) VALUES (:id, @name, $score)",
            &mut params,
        )
        .unwrap();
    }

    #[test]
    fn test_type_map_covers_twenty_types() {
        let provider = SqliteProvider::new();
        let supported: Vec<DbType> = DbType::ALL
            .iter()
            .copied()
            .filter(|t| provider.map_type(*t).is_ok())
            .collect();
        assert_eq!(supported.len(), 20);
        assert_eq!(provider.map_type(DbType::Guid).unwrap(), SqliteType::Text);
        assert_eq!(provider.map_type(DbType::Boolean).unwrap(), SqliteType::Integer);
        assert_eq!(provider.map_type(DbType::Decimal).unwrap(), SqliteType::Real);
        assert_eq!(provider.map_type(DbType::Binary).unwrap(), SqliteType::Blob);
        assert_eq!(
            provider.map_type(DbType::Object).unwrap_err().to_string(),
            "Object is not a supported or ambiguous DbType for Sqlite"
        );
    }

    #[test]
    fn test_parse_connection_string() {
        let target = parse_connection_string("app.db").unwrap();
        assert_eq!(target.path, "app.db");
        assert_eq!(target.flags, OpenFlags::default());

        let target = parse_connection_string("Data Source=data/app.db;Mode=ReadOnly").unwrap();
        assert_eq!(target.path, "data/app.db");
        assert!(target.flags.contains(OpenFlags::SQLITE_OPEN_READ_ONLY));
        assert!(!target.flags.contains(OpenFlags::SQLITE_OPEN_CREATE));

        assert!(parse_connection_string("Data Source=").is_err());
        assert!(parse_connection_string("Mode=Memory").is_err());
        assert!(parse_connection_string("Data Source=x;Cache=Shared").is_err());
        assert!(parse_connection_string("Data Source=x;Mode=Sideways").is_err());
    }

    #[test]
    fn test_post_open_runs_pragmas() {
        let provider = SqliteProvider::with_pragmas(vec![
            "PRAGMA foreign_keys = OFF;".to_string(),
            "PRAGMA user_version = 7;".to_string(),
        ]);
        let mut tool = DbTool::new(Rc::new(provider), ":memory:").unwrap();

        let enabled: i64 = tool
            .exec_scalar(CommandKind::Text, "PRAGMA foreign_keys", &mut [])
            .unwrap();
        assert_eq!(enabled, 0);
        let version: i64 = tool
            .exec_scalar(CommandKind::Text, "PRAGMA user_version", &mut [])
            .unwrap();
        assert_eq!(version, 7);
    }

    #[test]
    fn test_post_open_pragmas_rerun_on_each_open() {
        let provider = SqliteProvider::with_pragmas(vec!["PRAGMA user_version = 3;".to_string()]);
        let mut tool = DbTool::new(Rc::new(provider), ":memory:").unwrap();

        for _ in 0..2 {
            // every open of :memory: starts a fresh database
            let version: i64 = tool
                .exec_scalar(CommandKind::Text, "PRAGMA user_version", &mut [])
                .unwrap();
            assert_eq!(version, 3);
            tool.close_connection().unwrap();
        }
    }

    #[test]
    fn test_bind_and_read_rows() {
        let mut tool = memory_tool();
        insert(&mut tool, 1, "alpha", Some(1.5));
        insert(&mut tool, 2, "beta", None);

        let mut reader = tool
            .data_reader(
                CommandBehavior::DEFAULT,
                CommandKind::Text,
                "SELECT id, name, score FROM items ORDER BY id",
                &[],
            )
            .unwrap();
        assert_eq!(reader.field_count(), 3);

        assert!(reader.read().unwrap());
        let row = reader.row().unwrap();
        assert_eq!(row.get::<i32>("ID").unwrap(), 1);
        assert_eq!(row.get::<f64>("score").unwrap(), 1.5);

        assert!(reader.read().unwrap());
        let row = reader.row().unwrap();
        assert_eq!(row.get::<String>(1usize).unwrap(), "beta");
        assert_eq!(row.get::<Option<f64>>("score").unwrap(), None);

        assert!(!reader.read().unwrap());
        reader.close().unwrap();
        drop(reader);
        assert_eq!(tool.state(), ConnectionState::Open);
    }

    #[test]
    fn test_typed_parameters_are_coerced() {
        let mut tool = memory_tool();
        let mut params = vec![
            Parameter::typed("id", DbType::Int32).unwrap().with_value("7"),
            Parameter::typed("name", DbType::String).unwrap().with_value(42),
            Parameter::typed("code", DbType::Guid)
                .unwrap()
                .with_value(uuid::Uuid::nil()),
        ];
        tool.exec_non_query(
            CommandKind::Text,
            "INSERT INTO items (id, name, code) VALUES (@id, @name, @code)",
            &mut params,
        )
        .unwrap();

        let name: String = tool
            .exec_scalar(CommandKind::Text, "SELECT name FROM items WHERE id = 7", &mut [])
            .unwrap();
        assert_eq!(name, "42");
        let code: uuid::Uuid = tool
            .exec_scalar(CommandKind::Text, "SELECT code FROM items WHERE id = 7", &mut [])
            .unwrap();
        assert_eq!(code, uuid::Uuid::nil());

        let mut bad = vec![Parameter::typed("id", DbType::Int64).unwrap().with_value("x")];
        let err = tool
            .exec_non_query(CommandKind::Text, "DELETE FROM items WHERE id = @id", &mut bad)
            .unwrap_err();
        assert!(err.to_string().contains("for parameter: id"), "{}", err);
    }

    #[test]
    fn test_portable_types_round_trip() {
        let mut tool = memory_tool();
        tool.exec_non_query(CommandKind::Text, "CREATE TABLE t (v)", &mut [])
            .unwrap();

        let id = uuid::Uuid::new_v4();
        let at = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();

        let mut round_trip = |db_type: DbType, value: Value| -> Value {
            tool.exec_non_query(CommandKind::Text, "DELETE FROM t", &mut [])
                .unwrap();
            let mut params = vec![Parameter::typed("v", db_type).unwrap().with_value(value)];
            tool.exec_non_query(CommandKind::Text, "INSERT INTO t VALUES (@v)", &mut params)
                .unwrap();
            tool.exec_scalar_value(CommandKind::Text, "SELECT v FROM t", &mut [])
                .unwrap()
        };

        let stored = round_trip(DbType::Boolean, Value::Bool(true));
        assert!(crate::core::db::value::convert::<bool>(stored).unwrap());

        let stored = round_trip(DbType::Guid, Value::Uuid(id));
        assert_eq!(crate::core::db::value::convert::<uuid::Uuid>(stored).unwrap(), id);

        let stored = round_trip(DbType::DateTime, Value::DateTime(at));
        assert_eq!(stored, Value::Text("2024-01-02 03:04:05".to_string()));
        assert_eq!(
            crate::core::db::value::convert::<chrono::NaiveDateTime>(stored).unwrap(),
            at
        );

        let stored = round_trip(DbType::Binary, Value::Blob(vec![0, 1, 2]));
        assert_eq!(stored, Value::Blob(vec![0, 1, 2]));

        let stored = round_trip(DbType::Decimal, Value::Integer(3));
        assert_eq!(stored, Value::Real(3.0));
    }

    #[test]
    fn test_table_direct_and_stored_procedure() {
        let mut tool = memory_tool();
        insert(&mut tool, 1, "alpha", None);

        let count: i64 = tool
            .exec_scalar(CommandKind::TableDirect, "items", &mut [])
            .unwrap();
        assert_eq!(count, 1);

        let err = tool
            .exec_non_query(CommandKind::StoredProcedure, "usp_anything", &mut [])
            .unwrap_err();
        assert!(matches!(err, DbError::Provider(_)));
    }

    #[test]
    fn test_non_query_counts_and_row_returning_statements() {
        let mut tool = memory_tool();
        insert(&mut tool, 1, "a", None);
        insert(&mut tool, 2, "b", None);

        let updated = tool
            .exec_non_query(CommandKind::Text, "UPDATE items SET score = 1.0", &mut [])
            .unwrap();
        assert_eq!(updated, 2);

        let selected = tool
            .exec_non_query(CommandKind::Text, "SELECT * FROM items", &mut [])
            .unwrap();
        assert_eq!(selected, 0);
    }

    #[test]
    fn test_transactions_commit_and_rollback() {
        let mut tool = memory_tool();

        tool.begin_transaction(IsolationLevel::Serializable).unwrap();
        insert(&mut tool, 1, "kept", None);
        tool.commit().unwrap();

        tool.begin_transaction(IsolationLevel::ReadUncommitted).unwrap();
        insert(&mut tool, 2, "discarded", None);
        tool.rollback().unwrap();

        let count: i64 = tool
            .exec_scalar(CommandKind::Text, "SELECT COUNT(*) FROM items", &mut [])
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_scalar_on_empty_result_is_null() {
        let mut tool = memory_tool();
        let value = tool
            .exec_scalar_value(CommandKind::Text, "SELECT name FROM items", &mut [])
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_broken_connection_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.db");
        let mut tool =
            DbTool::new(Rc::new(SqliteProvider::new()), path.to_str().unwrap()).unwrap();
        tool.exec_non_query(CommandKind::Text, "CREATE TABLE t (x INTEGER)", &mut [])
            .unwrap();

        tool.connection_mut().unwrap().mark_broken();
        assert_eq!(tool.state(), ConnectionState::Broken);

        let rows = tool
            .exec_non_query(CommandKind::Text, "INSERT INTO t VALUES (1)", &mut [])
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(tool.state(), ConnectionState::Open);
    }
}
