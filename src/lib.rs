// Core infrastructure modules
pub mod core;

// Backends and configuration
pub mod config;
pub mod providers;

pub use crate::core::db::{
    CommandBehavior, CommandKind, DataReader, DbContext, DbTool, DbType, Direction,
    IsolationLevel, LazyFetch, OrdinalCache, Parameter, Provider, Request, Row, Value,
};
pub use crate::core::{DbError, Result};
