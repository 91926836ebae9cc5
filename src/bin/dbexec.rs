use dbexec::config::{default_config_path, load_config, Config};
use dbexec::providers::SqliteProvider;
use dbexec::{DbContext, DbError, Result, Row};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

const USAGE: &str = "Usage: dbexec [--config PATH] <database> <sql>";

struct Args {
    config: Option<PathBuf>,
    database: String,
    sql: String,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut config = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| DbError::InvalidArgument("--config needs a path".to_string()))?;
                config = Some(PathBuf::from(path));
            }
            _ => positional.push(arg),
        }
    }

    match <[String; 2]>::try_from(positional) {
        Ok([database, sql]) => Ok(Args {
            config,
            database,
            sql,
        }),
        Err(_) => Err(DbError::InvalidArgument(USAGE.to_string())),
    }
}

/// Explicit `--config` must load; the default location is optional.
fn resolve_config(explicit: Option<&PathBuf>) -> Result<Option<Config>> {
    if let Some(path) = explicit {
        return load_config(path).map(Some);
    }
    match default_config_path() {
        Some(path) if path.exists() => {
            info!("Using configuration from {}", path.display());
            load_config(path).map(Some)
        }
        _ => Ok(None),
    }
}

fn row_to_json(row: &Row<'_>) -> Result<serde_json::Value> {
    let mut object = serde_json::Map::new();
    for i in 0..row.field_count() {
        let name = row.column_name(i).unwrap_or_default().to_string();
        object.insert(name, row.value(i)?.to_json());
    }
    Ok(serde_json::Value::Object(object))
}

fn run(args: Args) -> Result<usize> {
    let ctx = match resolve_config(args.config.as_ref())? {
        Some(mut config) => {
            config.connection.connection_string = args.database.clone();
            DbContext::from_config(&config)?
        }
        None => DbContext::new(SqliteProvider::new(), &args.database),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut printed = 0;
    for row in ctx.fetch(args.sql.as_str(), row_to_json)? {
        serde_json::to_writer(&mut out, &row?)?;
        writeln!(out)?;
        printed += 1;
    }
    Ok(printed)
}

fn main() -> ExitCode {
    // Initialize the logging system using tracing subscriber
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    info!("Running against {}", args.database);
    match run(args) {
        Ok(rows) => {
            info!("{} row(s) returned", rows);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
