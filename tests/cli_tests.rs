//! Integration tests for the `dbexec` binary

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Creates a database with a small `items` table and returns its path.
fn seeded_database(dir: &Path) -> PathBuf {
    let path = dir.join("items.db");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, score REAL);
         INSERT INTO items VALUES (1, 'alpha', 1.5), (2, 'beta', NULL);",
    )
    .unwrap();
    path
}

fn dbexec(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dbexec").unwrap();
    // keep a user config out of the way
    cmd.env("XDG_CONFIG_HOME", home.path()).env("HOME", home.path());
    cmd
}

#[test]
fn test_prints_rows_as_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_database(dir.path());

    let output = dbexec(&dir)
        .arg(&db)
        .arg("SELECT id, name, score FROM items ORDER BY id")
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    insta::assert_snapshot!(stdout.trim_end(), @r###"
    {"id":1,"name":"alpha","score":1.5}
    {"id":2,"name":"beta","score":null}
    "###);
}

#[test]
fn test_missing_arguments_prints_usage() {
    let dir = tempfile::tempdir().unwrap();
    let output = dbexec(&dir).arg("only-a-database.db").output().unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Usage: dbexec [--config PATH] <database> <sql>"));
}

#[test]
fn test_invalid_sql_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_database(dir.path());

    let output = dbexec(&dir)
        .arg(&db)
        .arg("SELECT * FROM missing_table")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("no such table: missing_table"), "{}", stderr);
}

#[test]
fn test_config_pragmas_replace_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_database(dir.path());

    let run = |config: Option<&Path>| {
        let mut cmd = dbexec(&dir);
        if let Some(config) = config {
            cmd.arg("--config").arg(config);
        }
        let output = cmd.arg(&db).arg("PRAGMA foreign_keys").output().unwrap();
        assert!(output.status.success());
        String::from_utf8(output.stdout).unwrap()
    };

    insta::assert_snapshot!(run(None).trim_end(), @r###"{"foreign_keys":1}"###);

    let config = dir.path().join("dbexec.toml");
    fs::write(
        &config,
        "[connection]\nconnection_string = \"ignored.db\"\n\n[sqlite]\npragmas = [\"PRAGMA foreign_keys = OFF\"]\n",
    )
    .unwrap();
    insta::assert_snapshot!(run(Some(&config)).trim_end(), @r###"{"foreign_keys":0}"###);
}

#[test]
fn test_missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_database(dir.path());

    dbexec(&dir)
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg(&db)
        .arg("SELECT 1")
        .assert()
        .failure();
}
