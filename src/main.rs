//! wopihost - Multi-tenant WOPI host
//!
//! CLI entry point: `serve` runs the service; the `tenants`, `storages`
//! and `sessions` subcommands administer the database directly.
//!
//! Exit codes: 0 on success, 1 on invalid input, 2 on service failure.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wopihost::{
    api::{self, middleware::{generate_api_token, hash_api_token}, sessions::SessionResponse, AppState},
    config::Config,
    db::{
        self,
        repositories::{
            SqlxCommandLogRepository, SqlxSessionRepository, SqlxStorageRepository,
            SqlxTenantRepository, StorageRepository, TenantRepository,
        },
    },
    models::{EditorMode, StorageProtocol, StorageRecord, Tenant},
    services::{AuditLog, CallbackDispatcher, Registry, SessionManager, TokenService},
};

#[derive(Parser, Debug)]
#[command(name = "wopihost", version, about = "Multi-tenant WOPI host", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the API server
    Serve {
        /// Bind host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage tenants
    Tenants {
        #[command(subcommand)]
        command: TenantCommands,
    },

    /// Manage storage backends
    Storages {
        #[command(subcommand)]
        command: StorageCommands,
    },

    /// Manage editing sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Subcommand, Debug)]
enum TenantCommands {
    /// List tenants
    List {
        /// Only show active tenants
        #[arg(long)]
        active_only: bool,
    },

    /// Add or update a tenant
    Add {
        /// Tenant identifier
        id: String,

        /// Human-readable name
        #[arg(long)]
        name: Option<String>,

        /// Editor mode: pool, own or disabled
        #[arg(long, default_value = "pool")]
        editor_mode: String,

        /// Editor URL (required for editor mode "own")
        #[arg(long)]
        editor_url: Option<String>,

        /// Base URL for event callbacks
        #[arg(long)]
        callback_base_url: Option<String>,

        /// Authorization header value sent with callbacks
        #[arg(long)]
        callback_auth: Option<String>,

        /// Mark the tenant inactive
        #[arg(long)]
        inactive: bool,

        /// Issue a fresh API token (printed once)
        #[arg(long)]
        issue_token: bool,
    },

    /// Remove a tenant
    Remove {
        /// Tenant identifier
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum StorageCommands {
    /// List storage backends for a tenant
    List {
        /// Tenant identifier
        tenant_id: String,
    },

    /// Add or update a storage backend
    Add {
        /// Tenant identifier
        tenant_id: String,

        /// Storage name, unique within the tenant
        name: String,

        /// Storage protocol: local, s3, gcs, azure or webdav
        #[arg(long, default_value = "local")]
        protocol: String,

        /// Base path shortcut for local storages
        #[arg(long)]
        base_path: Option<String>,

        /// Protocol-specific configuration as a JSON object
        #[arg(long)]
        config_json: Option<String>,
    },

    /// Remove a storage backend
    Remove {
        /// Tenant identifier
        tenant_id: String,

        /// Storage name
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum SessionCommands {
    /// List active sessions
    List {
        /// Filter by tenant
        #[arg(long)]
        tenant_id: Option<String>,
    },

    /// Show one session
    Get {
        /// Session identifier
        id: String,
    },

    /// Close a session early
    Close {
        /// Session identifier
        id: String,
    },

    /// Sweep expired sessions
    Cleanup {
        /// Count without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

/// CLI failure classified for the exit code
enum CliError {
    /// Exit 1: bad arguments or references to missing entities
    Invalid(String),
    /// Exit 2: the service itself failed
    Service(anyhow::Error),
}

impl From<anyhow::Error> for CliError {
    fn from(e: anyhow::Error) -> Self {
        CliError::Service(e)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wopihost=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    match run(cli).await {
        Ok(()) => {}
        Err(CliError::Invalid(msg)) => {
            eprintln!("error: {}", msg);
            std::process::exit(1);
        }
        Err(CliError::Service(e)) => {
            eprintln!("error: {:#}", e);
            std::process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::load_with_env(&cli.config)?;

    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await,
        Commands::Tenants { command } => tenants(config, command).await,
        Commands::Storages { command } => storages(config, command).await,
        Commands::Sessions { command } => sessions(config, command).await,
    }
}

/// Open the database and bring the schema up to date
async fn open_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let pool = db::create_pool(&config.database).await?;
    db::migrations::run_migrations(&pool).await?;
    Ok(pool)
}

async fn serve(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), CliError> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting wopihost...");

    if config.token.secret == wopihost::config::TokenConfig::default().secret {
        tracing::warn!(
            "token.secret is the built-in default; set WOPIHOST_TOKEN_SECRET in production"
        );
    }

    let pool = open_db(&config).await?;
    tracing::info!("Database ready: {}", config.database.url);

    // Repositories
    let tenant_repo = SqlxTenantRepository::boxed(pool.clone());
    let storage_repo = SqlxStorageRepository::boxed(pool.clone());
    let session_repo = SqlxSessionRepository::boxed(pool.clone());
    let command_log_repo = SqlxCommandLogRepository::boxed(pool.clone());

    // Services
    let registry = Arc::new(Registry::new(
        tenant_repo.clone(),
        storage_repo.clone(),
        config.editor.pool_url.clone(),
        std::time::Duration::from_secs(config.cache.ttl_seconds),
    ));
    let tokens = Arc::new(TokenService::new(&config.token.secret));
    let audit = Arc::new(AuditLog::new(command_log_repo));
    let callbacks = Arc::new(CallbackDispatcher::new(config.callback.clone()));
    let session_manager = Arc::new(SessionManager::new(
        session_repo.clone(),
        registry.clone(),
        tokens.clone(),
        audit.clone(),
        callbacks.clone(),
        config.server.public_url.clone(),
        config.editor.discovery_token.clone(),
        config.token.ttl_seconds,
    ));

    let state = AppState {
        session_manager,
        session_repo,
        tenant_repo,
        registry,
        tokens,
        audit,
        callbacks,
        lock_ttl_seconds: config.lock.ttl_seconds,
    };

    let app = api::build_router(
        state,
        &config.server.cors_origin,
        std::time::Duration::from_secs(config.server.request_timeout_secs),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CliError::Service(anyhow::anyhow!("failed to bind {}: {}", addr, e)))?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| CliError::Service(e.into()))?;

    Ok(())
}

async fn tenants(config: Config, command: TenantCommands) -> Result<(), CliError> {
    let pool = open_db(&config).await?;
    let repo = SqlxTenantRepository::new(pool);

    match command {
        TenantCommands::List { active_only } => {
            let tenants = repo
                .list(active_only)
                .await
                .map_err(CliError::Service)?;
            for tenant in tenants {
                println!(
                    "{}\t{}\t{}\t{}",
                    tenant.id,
                    if tenant.active { "active" } else { "inactive" },
                    tenant.editor_mode,
                    tenant.name.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
        TenantCommands::Add {
            id,
            name,
            editor_mode,
            editor_url,
            callback_base_url,
            callback_auth,
            inactive,
            issue_token,
        } => {
            let editor_mode = EditorMode::from_str(&editor_mode).map_err(CliError::Invalid)?;
            if editor_mode == EditorMode::Own && editor_url.is_none() {
                return Err(CliError::Invalid(
                    "--editor-url is required with --editor-mode own".to_string(),
                ));
            }

            let existing = repo.get(&id).await.map_err(CliError::Service)?;
            let api_token = if issue_token {
                Some(generate_api_token())
            } else {
                None
            };
            let api_token_hash = match (&api_token, &existing) {
                (Some(token), _) => Some(hash_api_token(token)),
                (None, Some(existing)) => existing.api_token_hash.clone(),
                (None, None) => None,
            };

            let tenant = Tenant {
                id: id.clone(),
                name,
                active: !inactive,
                editor_mode,
                editor_url,
                callback_base_url,
                callback_auth,
                api_token_hash,
                created_at: existing.map(|t| t.created_at).unwrap_or_else(Utc::now),
            };
            repo.upsert(&tenant).await.map_err(CliError::Service)?;

            println!("tenant '{}' saved", id);
            if let Some(token) = api_token {
                println!("api token (shown once): {}", token);
            }
            Ok(())
        }
        TenantCommands::Remove { id } => {
            let removed = repo.remove(&id).await.map_err(CliError::Service)?;
            if !removed {
                return Err(CliError::Invalid(format!("tenant '{}' not found", id)));
            }
            println!("tenant '{}' removed", id);
            Ok(())
        }
    }
}

async fn storages(config: Config, command: StorageCommands) -> Result<(), CliError> {
    let pool = open_db(&config).await?;
    let tenant_repo = SqlxTenantRepository::new(pool.clone());
    let repo = SqlxStorageRepository::new(pool);

    match command {
        StorageCommands::List { tenant_id } => {
            let storages = repo.list(&tenant_id).await.map_err(CliError::Service)?;
            for storage in storages {
                println!("{}\t{}\t{}", storage.name, storage.protocol, storage.config);
            }
            Ok(())
        }
        StorageCommands::Add {
            tenant_id,
            name,
            protocol,
            base_path,
            config_json,
        } => {
            if tenant_repo
                .get(&tenant_id)
                .await
                .map_err(CliError::Service)?
                .is_none()
            {
                return Err(CliError::Invalid(format!(
                    "tenant '{}' not found",
                    tenant_id
                )));
            }

            let protocol = StorageProtocol::from_str(&protocol).map_err(CliError::Invalid)?;
            let config_value = match (base_path, config_json) {
                (Some(base_path), None) => serde_json::json!({"base_path": base_path}),
                (None, Some(raw)) => serde_json::from_str(&raw)
                    .map_err(|e| CliError::Invalid(format!("invalid --config-json: {}", e)))?,
                (None, None) => {
                    return Err(CliError::Invalid(
                        "one of --base-path or --config-json is required".to_string(),
                    ))
                }
                (Some(_), Some(_)) => {
                    return Err(CliError::Invalid(
                        "--base-path and --config-json are mutually exclusive".to_string(),
                    ))
                }
            };

            repo.upsert(&StorageRecord {
                tenant_id: tenant_id.clone(),
                name: name.clone(),
                protocol,
                config: config_value,
                created_at: Utc::now(),
            })
            .await
            .map_err(CliError::Service)?;

            println!("storage '{}:{}' saved", tenant_id, name);
            Ok(())
        }
        StorageCommands::Remove { tenant_id, name } => {
            let removed = repo
                .remove(&tenant_id, &name)
                .await
                .map_err(CliError::Service)?;
            if !removed {
                return Err(CliError::Invalid(format!(
                    "storage '{}:{}' not found",
                    tenant_id, name
                )));
            }
            println!("storage '{}:{}' removed", tenant_id, name);
            Ok(())
        }
    }
}

async fn sessions(config: Config, command: SessionCommands) -> Result<(), CliError> {
    use wopihost::db::repositories::SessionRepository;

    let pool = open_db(&config).await?;
    let repo = SqlxSessionRepository::new(pool);

    match command {
        SessionCommands::List { tenant_id } => {
            let sessions = repo
                .list_active(tenant_id.as_deref())
                .await
                .map_err(CliError::Service)?;
            for session in sessions {
                println!(
                    "{}\t{}\t{}\t{}\texpires {}",
                    session.id,
                    session.tenant_id,
                    session.account,
                    session.file_path,
                    session.expires_at.to_rfc3339(),
                );
            }
            Ok(())
        }
        SessionCommands::Get { id } => {
            let session = repo
                .get_by_id(&id)
                .await
                .map_err(CliError::Service)?
                .ok_or_else(|| CliError::Invalid(format!("session '{}' not found", id)))?;
            let projection = SessionResponse::from(session);
            let rendered = serde_json::to_string_pretty(&projection)
                .map_err(|e| CliError::Service(e.into()))?;
            println!("{}", rendered);
            Ok(())
        }
        SessionCommands::Close { id } => {
            if repo
                .get_by_id(&id)
                .await
                .map_err(CliError::Service)?
                .is_none()
            {
                return Err(CliError::Invalid(format!("session '{}' not found", id)));
            }
            repo.delete(&id).await.map_err(CliError::Service)?;
            println!("session '{}' closed", id);
            Ok(())
        }
        SessionCommands::Cleanup { dry_run } => {
            let now = Utc::now();
            if dry_run {
                let preview = repo.count_expired(now).await.map_err(CliError::Service)?;
                println!(
                    "would delete {} session(s), {} with an active lock",
                    preview.expired, preview.locked
                );
            } else {
                let preview = repo.count_expired(now).await.map_err(CliError::Service)?;
                let deleted = repo.delete_expired(now).await.map_err(CliError::Service)?;
                println!(
                    "deleted {} session(s), released {} lock(s)",
                    deleted, preview.locked
                );
            }
            Ok(())
        }
    }
}
