//! Database connection pool
//!
//! The service runs against a single SQLite file so the whole deployment is
//! one binary plus one database. The pool factory takes care of directory
//! creation and connection options so callers only ever pass a path.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::config::DatabaseConfig;

/// Create a SQLite connection pool from configuration.
///
/// Accepts either a bare file path (`data/wopihost.db`), a `sqlite:` URL,
/// or `:memory:`. Parent directories are created for file-based databases
/// and foreign keys are enabled on the pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    let url = &config.url;

    // Ensure the database directory exists for file-based SQLite
    if !url.starts_with(":memory:") && !url.starts_with("sqlite::memory:") {
        let path = if url.starts_with("sqlite:") {
            url.trim_start_matches("sqlite:")
        } else {
            url
        };

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {:?}", parent)
                })?;
            }
        }
    }

    // Build the connection URL with create mode for file-based databases
    let connection_url = if url.starts_with("sqlite:") {
        if url.contains('?') {
            url.to_string()
        } else {
            format!("{}?mode=rwc", url)
        }
    } else if url == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        format!("sqlite:{}?mode=rwc", url)
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .connect(&connection_url)
        .await
        .with_context(|| format!("Failed to connect to SQLite database: {}", url))?;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .context("Failed to enable foreign keys")?;

    Ok(pool)
}

/// Create an in-memory database pool for testing.
///
/// The in-memory database lives as long as the pool, so tests must keep the
/// returned pool alive for their whole duration.
pub async fn create_test_pool() -> Result<SqlitePool> {
    // A single connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .context("Failed to create in-memory database")?;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .context("Failed to enable foreign keys")?;

    Ok(pool)
}
