//! Pool construction and schema creation.

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

/// Open (and create if missing) the database behind `database_url`.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Create every table the engine persists into.
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // raw_sql so the whole script runs as one multi-statement batch
    sqlx::raw_sql(
        r"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL UNIQUE,
            type TEXT NOT NULL,
            state TEXT NOT NULL,
            target_name TEXT NOT NULL,
            author_id TEXT NOT NULL DEFAULT '',
            author_ip TEXT NOT NULL DEFAULT '',
            data TEXT NOT NULL DEFAULT '{}',
            log_path TEXT NOT NULL DEFAULT '',
            log_store_position TEXT NOT NULL DEFAULT '',
            attempts INTEGER NOT NULL DEFAULT 0,
            error TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_type_state_updated
            ON tasks (type, state, updated_at);
        CREATE INDEX IF NOT EXISTS idx_tasks_target
            ON tasks (type, target_name);

        CREATE TABLE IF NOT EXISTS history_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL UNIQUE,
            type TEXT NOT NULL,
            state TEXT NOT NULL,
            target_name TEXT NOT NULL,
            author_id TEXT NOT NULL DEFAULT '',
            author_ip TEXT NOT NULL DEFAULT '',
            data TEXT NOT NULL DEFAULT '{}',
            log_path TEXT NOT NULL DEFAULT '',
            log_store_position TEXT NOT NULL DEFAULT '',
            attempts INTEGER NOT NULL DEFAULT 0,
            error TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS binaries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            binary_id TEXT NOT NULL UNIQUE,
            category TEXT NOT NULL,
            parent TEXT NOT NULL,
            name TEXT NOT NULL,
            is_dir INTEGER NOT NULL DEFAULT 0,
            size INTEGER NOT NULL DEFAULT 0,
            date TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (category, parent, name)
        );

        CREATE TABLE IF NOT EXISTS proxy_caches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fullname TEXT NOT NULL,
            file_type TEXT NOT NULL,
            file_path TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL,
            UNIQUE (fullname, file_type)
        );

        CREATE TABLE IF NOT EXISTS packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id TEXT NOT NULL UNIQUE,
            scope TEXT NOT NULL DEFAULT '',
            name TEXT NOT NULL,
            fullname TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS package_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_version_id TEXT NOT NULL UNIQUE,
            fullname TEXT NOT NULL,
            version TEXT NOT NULL,
            manifest TEXT NOT NULL DEFAULT '{}',
            tar_dist_path TEXT NOT NULL DEFAULT '',
            published_at TEXT NOT NULL,
            UNIQUE (fullname, version)
        );

        CREATE TABLE IF NOT EXISTS package_tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fullname TEXT NOT NULL,
            tag TEXT NOT NULL,
            version TEXT NOT NULL,
            UNIQUE (fullname, tag)
        );

        CREATE TABLE IF NOT EXISTS version_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id TEXT NOT NULL UNIQUE,
            package_version_id TEXT NOT NULL,
            directory TEXT NOT NULL,
            name TEXT NOT NULL,
            dist_path TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            content_type TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            UNIQUE (package_version_id, directory, name)
        );
        ",
    )
    .execute(pool)
    .await?;
    Ok(())
}
