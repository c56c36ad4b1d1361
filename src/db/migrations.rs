//! Database migrations
//!
//! Code-based migrations embedded in the binary as SQL strings, so a
//! deployment is a single executable. Applied versions are tracked in the
//! `_migrations` table and pending migrations run in version order at
//! startup.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (unique, sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements, separated by semicolons
    pub up: &'static str,
}

/// All migrations for the wopihost service
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_tenants",
        up: r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id VARCHAR(64) PRIMARY KEY,
                name VARCHAR(255),
                active BOOLEAN NOT NULL DEFAULT 1,
                editor_mode VARCHAR(16) NOT NULL DEFAULT 'pool',
                editor_url TEXT,
                callback_base_url TEXT,
                callback_auth TEXT,
                api_token_hash VARCHAR(64),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_tenants_api_token_hash ON tenants(api_token_hash);
        "#,
    },
    Migration {
        version: 2,
        name: "create_storages",
        up: r#"
            CREATE TABLE IF NOT EXISTS storages (
                tenant_id VARCHAR(64) NOT NULL,
                name VARCHAR(64) NOT NULL,
                protocol VARCHAR(16) NOT NULL,
                config TEXT NOT NULL DEFAULT '{}',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (tenant_id, name),
                FOREIGN KEY (tenant_id) REFERENCES tenants(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 3,
        name: "create_sessions",
        up: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(36) PRIMARY KEY,
                tenant_id VARCHAR(64) NOT NULL,
                storage_name VARCHAR(64) NOT NULL,
                file_path TEXT NOT NULL,
                file_id VARCHAR(36) NOT NULL,
                access_token TEXT NOT NULL,
                permissions TEXT NOT NULL DEFAULT '["view"]',
                account VARCHAR(255) NOT NULL,
                user VARCHAR(255),
                origin_connection_id TEXT,
                origin_page_id TEXT,
                lock_id TEXT,
                lock_expires_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                last_accessed_at TIMESTAMP NOT NULL,
                opened_at TIMESTAMP,
                FOREIGN KEY (tenant_id) REFERENCES tenants(id) ON DELETE CASCADE
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_file_id ON sessions(file_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_access_token ON sessions(access_token);
            CREATE INDEX IF NOT EXISTS idx_sessions_tenant_id ON sessions(tenant_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        "#,
    },
    Migration {
        version: 4,
        name: "create_command_log",
        up: r#"
            CREATE TABLE IF NOT EXISTS command_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id VARCHAR(64) NOT NULL,
                account VARCHAR(255),
                user VARCHAR(255),
                command VARCHAR(64) NOT NULL,
                details TEXT NOT NULL DEFAULT '{}',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_command_log_tenant_id ON command_log(tenant_id);
            CREATE INDEX IF NOT EXISTS idx_command_log_created_at ON command_log(created_at);
        "#,
    },
];

/// Run all pending migrations. Returns the number applied.
pub async fn run_migrations(pool: &SqlitePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = applied_versions(pool).await?;
    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

async fn create_migrations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create migrations table")?;
    Ok(())
}

async fn applied_versions(pool: &SqlitePool) -> Result<Vec<i32>> {
    let rows = sqlx::query("SELECT version FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .context("Failed to read applied migrations")?;

    Ok(rows.iter().map(|row| row.get("version")).collect())
}

async fn apply_migration(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    // Migration SQL may contain multiple statements
    for statement in split_sql_statements(migration.up) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(pool)
        .await?;

    Ok(())
}

/// Split SQL into individual statements on semicolons
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .collect()
}

/// Truncate SQL for error messages
fn truncate_sql(sql: &str) -> String {
    if sql.len() > 100 {
        format!("{}...", &sql[..100])
    } else {
        sql.to_string()
    }
}
