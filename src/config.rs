use crate::core::db::command::CommandKind;
use crate::core::db::query::DbContext;
use crate::core::{DbError, Result};
use crate::providers::sqlite::SqliteProvider;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub sqlite: Option<SqliteConfig>,
}

/// Connection-related configuration.
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Backend name; only `sqlite` can be built from configuration
    pub provider: Option<String>,
    pub connection_string: String,
    /// Seconds; negative values are rejected when the context runs
    pub command_timeout: Option<i32>,
    pub default_command_kind: Option<CommandKind>,
}

/// SQLite-related configuration.
#[derive(Debug, Deserialize)]
pub struct SqliteConfig {
    /// Statements run after every open, replacing the defaults
    pub pragmas: Option<Vec<String>>,
}

impl FromStr for Config {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| DbError::Config(e.to_string()))
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = dbexec::config::load_config("dbexec.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    content.parse()
}

/// `<config dir>/dbexec/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dbexec").join("config.toml"))
}

impl DbContext<SqliteProvider> {
    /// Builds a SQLite context from the `[connection]` and `[sqlite]` tables.
    pub fn from_config(config: &Config) -> Result<Self> {
        let connection = &config.connection;
        if let Some(provider) = &connection.provider {
            if !provider.eq_ignore_ascii_case("sqlite") {
                return Err(DbError::Config(format!(
                    "provider '{}' cannot be built from configuration",
                    provider
                )));
            }
        }
        if connection.connection_string.trim().is_empty() {
            return Err(DbError::Config("connection_string is empty".to_string()));
        }

        let provider = match config.sqlite.as_ref().and_then(|s| s.pragmas.clone()) {
            Some(pragmas) => SqliteProvider::with_pragmas(pragmas),
            None => SqliteProvider::new(),
        };

        let mut ctx = DbContext::with_timeout(
            provider,
            &connection.connection_string,
            connection.command_timeout,
        );
        if let Some(kind) = connection.default_command_kind {
            ctx.set_default_command_kind(kind);
        }
        Ok(ctx)
    }
}
