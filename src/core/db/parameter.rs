/// Parameter Module
///
/// Named command parameters, declared either by value or by portable type.
use crate::core::db::value::{convert, DbType, FromValue, Value};
use crate::core::{DbError, Result};

/// Direction of a parameter relative to the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    In,
    Out,
    InOut,
    ReturnValue,
}

/// A named parameter attached to a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    direction: Direction,
    value: Option<Value>,
    db_type: Option<DbType>,
    size: Option<usize>,
}

impl Parameter {
    /// Creates an input parameter carrying a concrete value.
    ///
    /// Use [`Parameter::absent`] for a parameter without a value; it is bound
    /// as database-null.
    pub fn new(name: &str, value: impl Into<Value>) -> Result<Self> {
        let mut param = Parameter::absent(name)?;
        param.value = Some(value.into());
        Ok(param)
    }

    /// Creates a parameter with no value yet.
    pub fn absent(name: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(DbError::blank_argument("name"));
        }
        Ok(Parameter {
            name: name.to_string(),
            direction: Direction::In,
            value: None,
            db_type: None,
            size: None,
        })
    }

    /// Creates a parameter declared by portable type.
    ///
    /// The type is not validated here; providers validate through their
    /// type mapping table (see `DbContext::param_typed`).
    pub fn typed(name: &str, db_type: DbType) -> Result<Self> {
        let mut param = Parameter::absent(name)?;
        param.db_type = Some(db_type);
        Ok(param)
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn db_type(&self) -> Option<DbType> {
        self.db_type
    }

    pub fn size(&self) -> Option<usize> {
        self.size
    }

    /// Stores a value produced by the provider for an output parameter.
    pub fn set_value(&mut self, value: impl Into<Value>) {
        self.value = Some(value.into());
    }

    /// Rewrites an absent value to the explicit database-null marker.
    pub(crate) fn normalize_null(&mut self) {
        if self.value.is_none() {
            self.value = Some(Value::Null);
        }
    }

    pub fn is_output(&self) -> bool {
        self.direction != Direction::In
    }

    /// Reads the value written back by the provider after execution.
    ///
    /// Fails for input-only parameters. Null maps to `T::default()`.
    pub fn output_value<T: FromValue + Default>(&self) -> Result<T> {
        if !self.is_output() {
            return Err(DbError::InvalidArgument(format!(
                "Parameter {} does not have its direction set to Out, InOut or ReturnValue.",
                self.name
            )));
        }

        let value = self.value.clone().unwrap_or(Value::Null);
        convert(value).map_err(|source| DbError::Conversion {
            context: format!("Output value for parameter: {}", self.name),
            source,
        })
    }
}
