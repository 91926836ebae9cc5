/// Providers Module
///
/// Concrete backends for the execution engine.
///
/// - `sqlite`: SQLite through rusqlite
/// - `scripted`: in-process backend answering from registered responses,
///   used to exercise the engine without a database
pub mod scripted;
pub mod sqlite;

pub use scripted::{ResultSet, ScriptStats, ScriptedConnection, ScriptedProvider};
pub use sqlite::{SqliteConnection, SqliteProvider, SqliteType};
