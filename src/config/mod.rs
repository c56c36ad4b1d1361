//! Configuration management
//!
//! Handles loading and parsing configuration for the wopihost service.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Editor (WOPI client) configuration
    #[serde(default)]
    pub editor: EditorConfig,
    /// Access token configuration
    #[serde(default)]
    pub token: TokenConfig,
    /// WOPI lock configuration
    #[serde(default)]
    pub lock: LockConfig,
    /// Callback delivery configuration
    #[serde(default)]
    pub callback: CallbackConfig,
    /// Tenant/storage read cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin for the management API
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// Hard per-request deadline in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Externally reachable base URL of this service. Embedded in the
    /// WOPISrc parameter of editor URLs, so it must be resolvable by the
    /// editor, not just by local clients.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            request_timeout_secs: default_request_timeout(),
            public_url: default_public_url(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8880
}

fn default_cors_origin() -> String {
    "*".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_public_url() -> String {
    "http://localhost:8880".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/wopihost.db".to_string()
}

/// Editor (WOPI client) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Pool editor URL used by tenants in `pool` mode
    #[serde(default = "default_pool_url")]
    pub pool_url: String,
    /// Discovery token segment of the editor's browser path
    #[serde(default = "default_discovery_token")]
    pub discovery_token: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            pool_url: default_pool_url(),
            discovery_token: default_discovery_token(),
        }
    }
}

fn default_pool_url() -> String {
    "https://collabora.example.com".to_string()
}

fn default_discovery_token() -> String {
    "dist".to_string()
}

/// Access token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// HMAC secret for signing WOPI access tokens
    #[serde(default = "default_token_secret")]
    pub secret: String,
    /// Session/token TTL in seconds
    #[serde(default = "default_token_ttl")]
    pub ttl_seconds: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: default_token_secret(),
            ttl_seconds: default_token_ttl(),
        }
    }
}

fn default_token_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_token_ttl() -> u64 {
    3600
}

/// WOPI lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lock TTL in seconds granted on LOCK and REFRESH_LOCK
    #[serde(default = "default_lock_ttl")]
    pub ttl_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_lock_ttl(),
        }
    }
}

fn default_lock_ttl() -> u64 {
    1800
}

/// Callback delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Maximum delivery attempts per event
    #[serde(default = "default_callback_attempts")]
    pub max_attempts: u32,
    /// Initial retry backoff in seconds
    #[serde(default = "default_callback_base_backoff")]
    pub base_backoff_secs: u64,
    /// Retry backoff ceiling in seconds
    #[serde(default = "default_callback_max_backoff")]
    pub max_backoff_secs: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_callback_attempts(),
            base_backoff_secs: default_callback_base_backoff(),
            max_backoff_secs: default_callback_max_backoff(),
        }
    }
}

fn default_callback_attempts() -> u32 {
    5
}

fn default_callback_base_backoff() -> u64 {
    1
}

fn default_callback_max_backoff() -> u64 {
    60
}

/// Tenant/storage read cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache TTL in seconds for tenant and storage lookups
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    60
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
}

impl Config {
    /// Load configuration from file.
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides.
    ///
    /// Environment variables follow the pattern:
    /// - WOPIHOST_SERVER_HOST / WOPIHOST_SERVER_PORT / WOPIHOST_PUBLIC_URL
    /// - WOPIHOST_DATABASE_URL
    /// - WOPIHOST_EDITOR_POOL_URL / WOPIHOST_EDITOR_DISCOVERY_TOKEN
    /// - WOPIHOST_TOKEN_SECRET / WOPIHOST_TOKEN_TTL_SECONDS
    /// - WOPIHOST_LOCK_TTL_SECONDS
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("WOPIHOST_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("WOPIHOST_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(origin) = std::env::var("WOPIHOST_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = origin;
        }
        if let Ok(url) = std::env::var("WOPIHOST_PUBLIC_URL") {
            self.server.public_url = url;
        }

        if let Ok(url) = std::env::var("WOPIHOST_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(url) = std::env::var("WOPIHOST_EDITOR_POOL_URL") {
            self.editor.pool_url = url;
        }
        if let Ok(token) = std::env::var("WOPIHOST_EDITOR_DISCOVERY_TOKEN") {
            self.editor.discovery_token = token;
        }

        if let Ok(secret) = std::env::var("WOPIHOST_TOKEN_SECRET") {
            self.token.secret = secret;
        }
        if let Ok(ttl) = std::env::var("WOPIHOST_TOKEN_TTL_SECONDS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.token.ttl_seconds = ttl;
            }
        }
        if let Ok(ttl) = std::env::var("WOPIHOST_LOCK_TTL_SECONDS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.lock.ttl_seconds = ttl;
            }
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for all config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
