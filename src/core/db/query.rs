/// Query Execution Module
///
/// `DbContext` is the execution engine: every call builds a fresh `DbTool`,
/// binds the request, runs one execution shape and closes the connection
/// again. Failures tear the connection down before the error is returned.
///
/// ## Execution shapes
///
/// - `fetch_each` / `fetch_into`: read loop driving a callback
/// - `fetch`: lazy iterator, one native row per pull
/// - `fetch_one`: at most one row, default when there is none
/// - `exec_non_query` / `exec_scalar`: affected rows or a single value
/// - `exec_reader` / `exec`: raw escapes over the reader or the tool
use crate::core::db::command::{CommandBehavior, CommandKind};
use crate::core::db::connection::DbTool;
use crate::core::db::parameter::{Direction, Parameter};
use crate::core::db::provider::Provider;
use crate::core::db::reader::DataReader;
use crate::core::db::row::{OrdinalCache, Row};
use crate::core::db::value::{convert, DbType, FromValue, Value};
use crate::core::{DbError, Result};
use std::marker::PhantomData;
use std::rc::Rc;
use tracing::{debug, warn};

/// Command text plus the optional overrides of a single call.
///
/// Unset kind and behavior fall back to the context defaults for the
/// execution shape.
#[derive(Debug, Clone, Default)]
pub struct Request {
    text: String,
    kind: Option<CommandKind>,
    behavior: Option<CommandBehavior>,
    params: Vec<Parameter>,
}

impl Request {
    pub fn new(text: impl Into<String>) -> Self {
        Request {
            text: text.into(),
            ..Request::default()
        }
    }

    pub fn kind(mut self, kind: CommandKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn behavior(mut self, behavior: CommandBehavior) -> Self {
        self.behavior = Some(behavior);
        self
    }

    pub fn param(mut self, param: Parameter) -> Self {
        self.params.push(param);
        self
    }

    pub fn params(mut self, params: impl IntoIterator<Item = Parameter>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl From<&str> for Request {
    fn from(text: &str) -> Self {
        Request::new(text)
    }
}

impl From<String> for Request {
    fn from(text: String) -> Self {
        Request::new(text)
    }
}

/// Execution engine bound to one provider and connection string.
pub struct DbContext<P: Provider> {
    provider: Rc<P>,
    connection_string: String,
    command_timeout: Option<i32>,
    default_kind: CommandKind,
    fetch_behavior: CommandBehavior,
    fetch_one_behavior: CommandBehavior,
    exec_reader_behavior: CommandBehavior,
}

impl<P: Provider> DbContext<P> {
    pub fn new(provider: P, connection_string: &str) -> Self {
        let default_kind = provider.default_command_kind();
        DbContext {
            provider: Rc::new(provider),
            connection_string: connection_string.to_string(),
            command_timeout: None,
            default_kind,
            fetch_behavior: CommandBehavior::CLOSE_CONNECTION | CommandBehavior::SINGLE_RESULT,
            fetch_one_behavior: CommandBehavior::CLOSE_CONNECTION | CommandBehavior::SINGLE_ROW,
            exec_reader_behavior: CommandBehavior::CLOSE_CONNECTION,
        }
    }

    pub fn with_timeout(provider: P, connection_string: &str, command_timeout: Option<i32>) -> Self {
        let mut ctx = DbContext::new(provider, connection_string);
        ctx.command_timeout = command_timeout;
        ctx
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Timeout override applied to every tool this context creates.
    pub fn command_timeout(&self) -> Option<i32> {
        self.command_timeout
    }

    pub fn set_command_timeout(&mut self, seconds: Option<i32>) {
        self.command_timeout = seconds;
    }

    pub fn default_command_kind(&self) -> CommandKind {
        self.default_kind
    }

    pub fn set_default_command_kind(&mut self, kind: CommandKind) {
        self.default_kind = kind;
    }

    pub fn default_fetch_behavior(&self) -> CommandBehavior {
        self.fetch_behavior
    }

    pub fn set_default_fetch_behavior(&mut self, behavior: CommandBehavior) {
        self.fetch_behavior = behavior;
    }

    pub fn default_fetch_one_behavior(&self) -> CommandBehavior {
        self.fetch_one_behavior
    }

    pub fn set_default_fetch_one_behavior(&mut self, behavior: CommandBehavior) {
        self.fetch_one_behavior = behavior;
    }

    pub fn default_exec_reader_behavior(&self) -> CommandBehavior {
        self.exec_reader_behavior
    }

    pub fn set_default_exec_reader_behavior(&mut self, behavior: CommandBehavior) {
        self.exec_reader_behavior = behavior;
    }

    /// Creates a tool owning a new, still closed, connection.
    pub fn create_tool(&self) -> Result<DbTool<P>> {
        let mut tool = DbTool::new(Rc::clone(&self.provider), &self.connection_string)?;
        if let Some(timeout) = self.command_timeout {
            tool.set_command_timeout(timeout)?;
        }
        Ok(tool)
    }

    // ---------------------------------------------------------------------
    // raw escapes
    // ---------------------------------------------------------------------

    /// Runs `action` against a fresh tool and closes its connection afterwards.
    ///
    /// If `action` fails the connection is torn down on a best-effort basis
    /// and the original error is returned.
    pub fn exec<R>(&self, action: impl FnOnce(&mut DbTool<P>) -> Result<R>) -> Result<R> {
        let mut tool = self.create_tool()?;

        match action(&mut tool) {
            Ok(result) => {
                tool.close_connection()?;
                Ok(result)
            }
            Err(e) => {
                if let Err(close_err) = tool.close_connection() {
                    warn!("Suppressed error while tearing down connection: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Opens a data reader for the request and hands it to `action`.
    pub fn exec_reader<R>(
        &self,
        request: impl Into<Request>,
        action: impl FnOnce(&mut DataReader<'_, P>) -> Result<R>,
    ) -> Result<R> {
        let request = request.into();
        let behavior = request.behavior.unwrap_or(self.exec_reader_behavior);
        self.run_reader(request, behavior, action)
    }

    // ---------------------------------------------------------------------
    // streamed fetch
    // ---------------------------------------------------------------------

    /// Calls `action` for every row.
    pub fn fetch_each(
        &self,
        request: impl Into<Request>,
        mut action: impl FnMut(&Row<'_>) -> Result<()>,
    ) -> Result<()> {
        let request = request.into();
        let behavior = request.behavior.unwrap_or(self.fetch_behavior);
        self.run_reader(request, behavior, |reader| {
            while reader.read()? {
                action(&reader.row()?)?;
            }
            Ok(())
        })
    }

    /// Calls `action` for every row with an ordinal cache shared by all rows.
    pub fn fetch_each_cached(
        &self,
        request: impl Into<Request>,
        mut action: impl FnMut(&Row<'_>, &mut OrdinalCache) -> Result<()>,
    ) -> Result<()> {
        let mut cache = OrdinalCache::new();
        self.fetch_each(request, |row| action(row, &mut cache))
    }

    /// Populates a single accumulator across all rows and returns it.
    pub fn fetch_into<T: Default>(
        &self,
        request: impl Into<Request>,
        mut action: impl FnMut(&Row<'_>, &mut T) -> Result<()>,
    ) -> Result<T> {
        let mut acc = T::default();
        self.fetch_each(request, |row| action(row, &mut acc))?;
        Ok(acc)
    }

    pub fn fetch_into_cached<T: Default>(
        &self,
        request: impl Into<Request>,
        mut action: impl FnMut(&Row<'_>, &mut OrdinalCache, &mut T) -> Result<()>,
    ) -> Result<T> {
        let mut acc = T::default();
        let mut cache = OrdinalCache::new();
        self.fetch_each(request, |row| action(row, &mut cache, &mut acc))?;
        Ok(acc)
    }

    // ---------------------------------------------------------------------
    // lazy fetch
    // ---------------------------------------------------------------------

    /// Executes the request and returns an iterator producing one `T` per row.
    ///
    /// The command runs immediately; rows are read as the iterator is pulled.
    /// Exhausting or dropping the iterator closes the cursor and connection.
    pub fn fetch<T>(
        &self,
        request: impl Into<Request>,
        mut func: impl FnMut(&Row<'_>) -> Result<T>,
    ) -> Result<LazyFetch<P, T, impl FnMut(&Row<'_>, &mut OrdinalCache) -> Result<T>>> {
        self.fetch_cached(request, move |row, _cache| func(row))
    }

    /// Lazy fetch whose function also receives the fetch's ordinal cache.
    pub fn fetch_cached<T, F>(&self, request: impl Into<Request>, func: F) -> Result<LazyFetch<P, T, F>>
    where
        F: FnMut(&Row<'_>, &mut OrdinalCache) -> Result<T>,
    {
        let request = request.into();
        let behavior = request.behavior.unwrap_or(self.fetch_behavior);
        let kind = request.kind.unwrap_or(self.default_kind);
        debug!(?kind, ?behavior, "Lazy fetch: {}", request.text);

        let mut tool = self.create_tool()?;
        if let Err(e) = tool.open_reader(behavior, kind, &request.text, &request.params) {
            if let Err(close_err) = tool.close_connection() {
                warn!("Suppressed error while tearing down connection: {}", close_err);
            }
            return Err(e);
        }

        Ok(LazyFetch::new(tool, func))
    }

    // ---------------------------------------------------------------------
    // fetch one
    // ---------------------------------------------------------------------

    /// Applies `func` to the first row, or returns `T::default()` when the
    /// result is empty.
    pub fn fetch_one<T: Default>(
        &self,
        request: impl Into<Request>,
        func: impl FnOnce(&Row<'_>) -> Result<T>,
    ) -> Result<T> {
        let request = request.into();
        let behavior = request.behavior.unwrap_or(self.fetch_one_behavior);
        self.run_reader(request, behavior, |reader| {
            if reader.read()? {
                func(&reader.row()?)
            } else {
                Ok(T::default())
            }
        })
    }

    pub fn fetch_one_cached<T: Default>(
        &self,
        request: impl Into<Request>,
        func: impl FnOnce(&Row<'_>, &mut OrdinalCache) -> Result<T>,
    ) -> Result<T> {
        self.fetch_one(request, |row| func(row, &mut OrdinalCache::new()))
    }

    // ---------------------------------------------------------------------
    // execute
    // ---------------------------------------------------------------------

    /// Executes a command and returns the number of affected rows.
    pub fn exec_non_query(&self, request: impl Into<Request>) -> Result<u64> {
        let mut request = request.into();
        let kind = request.kind.unwrap_or(self.default_kind);
        debug!(?kind, "Execute non-query: {}", request.text);

        let text = request.text.trim().to_string();
        self.exec(|tool| tool.exec_non_query(kind, &text, &mut request.params))
    }

    /// Executes a command and converts the first column of the first row.
    ///
    /// Null yields `T::default()`. A conversion failure names the command;
    /// for an unrecognized command kind the raw conversion error is returned.
    pub fn exec_scalar<T: FromValue + Default>(&self, request: impl Into<Request>) -> Result<T> {
        let mut request = request.into();
        let kind = request.kind.unwrap_or(self.default_kind);
        debug!(?kind, "Execute scalar: {}", request.text);

        let text = request.text;
        let value = self.exec(|tool| tool.exec_scalar_value(kind, &text, &mut request.params))?;
        scalar_to::<T>(value, kind, &text)
    }

    // ---------------------------------------------------------------------
    // parameters
    // ---------------------------------------------------------------------

    pub fn param(&self, name: &str, value: impl Into<Value>) -> Result<Parameter> {
        Parameter::new(name, value)
    }

    pub fn param_dir(&self, name: &str, value: impl Into<Value>, direction: Direction) -> Result<Parameter> {
        Ok(Parameter::new(name, value)?.with_direction(direction))
    }

    /// Declares a parameter by portable type; fails with `UnsupportedType`
    /// when the provider has no mapping for it.
    pub fn param_typed(&self, name: &str, db_type: DbType) -> Result<Parameter> {
        let param = Parameter::typed(name, db_type)?;
        self.provider.map_type(db_type)?;
        Ok(param)
    }

    pub fn param_sized(&self, name: &str, db_type: DbType, size: usize) -> Result<Parameter> {
        Ok(self.param_typed(name, db_type)?.with_size(size))
    }

    pub fn param_typed_value(&self, name: &str, db_type: DbType, value: impl Into<Value>) -> Result<Parameter> {
        Ok(self.param_typed(name, db_type)?.with_value(value))
    }

    pub fn param_typed_dir(&self, name: &str, db_type: DbType, direction: Direction) -> Result<Parameter> {
        Ok(self.param_typed(name, db_type)?.with_direction(direction))
    }

    pub fn param_full(
        &self,
        name: &str,
        db_type: DbType,
        size: usize,
        value: impl Into<Value>,
        direction: Direction,
    ) -> Result<Parameter> {
        Ok(self
            .param_sized(name, db_type, size)?
            .with_value(value)
            .with_direction(direction))
    }

    fn run_reader<R>(
        &self,
        request: Request,
        behavior: CommandBehavior,
        action: impl FnOnce(&mut DataReader<'_, P>) -> Result<R>,
    ) -> Result<R> {
        let kind = request.kind.unwrap_or(self.default_kind);
        debug!(?kind, ?behavior, "Execute reader: {}", request.text);

        self.exec(|tool| {
            let mut reader = tool.data_reader(behavior, kind, &request.text, &request.params)?;
            let result = action(&mut reader)?;
            reader.close()?;
            Ok(result)
        })
    }
}

fn scalar_to<T: FromValue + Default>(value: Value, kind: CommandKind, text: &str) -> Result<T> {
    if value.is_null() {
        return Ok(T::default());
    }

    let shown = value.to_string();
    convert(value).map_err(|source| {
        let context = match kind {
            CommandKind::StoredProcedure => {
                format!("Scalar value \"{}\" for stored procedure: {}", shown, text)
            }
            CommandKind::TableDirect => format!("Scalar value \"{}\" for table: {}", shown, text),
            CommandKind::Text => {
                format!("Scalar value \"{}\" for command text:\n{}", shown, text)
            }
            CommandKind::Unrecognized(_) => return DbError::RawConversion(source),
        };
        DbError::Conversion { context, source }
    })
}

/// Lazily materialized rows of a fetch.
///
/// Owns the tool that executed the request. Each `next` reads exactly one
/// native row. The cursor and connection are closed when the rows run out,
/// when `func` fails, or when the iterator is dropped, whichever comes first.
pub struct LazyFetch<P: Provider, T, F> {
    tool: DbTool<P>,
    func: F,
    cache: OrdinalCache,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<P, T, F> LazyFetch<P, T, F>
where
    P: Provider,
    F: FnMut(&Row<'_>, &mut OrdinalCache) -> Result<T>,
{
    fn new(tool: DbTool<P>, func: F) -> Self {
        LazyFetch {
            tool,
            func,
            cache: OrdinalCache::new(),
            finished: false,
            _marker: PhantomData,
        }
    }
}

impl<P: Provider, T, F> LazyFetch<P, T, F> {
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The tool driving the fetch, mostly useful for inspecting its state.
    pub fn tool(&self) -> &DbTool<P> {
        &self.tool
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let reader = self.tool.close_reader();
        let conn = self.tool.close_connection();
        reader.and(conn)
    }
}

impl<P, T, F> Iterator for LazyFetch<P, T, F>
where
    P: Provider,
    F: FnMut(&Row<'_>, &mut OrdinalCache) -> Result<T>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.tool.read_row() {
            Ok(true) => {
                let item = match self.tool.current_row() {
                    Ok(row) => (self.func)(&row, &mut self.cache),
                    Err(e) => Err(e),
                };
                if item.is_err() {
                    if let Err(close_err) = self.finish() {
                        warn!("Suppressed error while tearing down connection: {}", close_err);
                    }
                }
                Some(item)
            }
            Ok(false) => self.finish().err().map(Err),
            Err(e) => {
                if let Err(close_err) = self.finish() {
                    warn!("Suppressed error while tearing down connection: {}", close_err);
                }
                Some(Err(e))
            }
        }
    }
}

impl<P: Provider, T, F> Drop for LazyFetch<P, T, F> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("Error while closing abandoned fetch: {}", e);
        }
    }
}
