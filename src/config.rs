use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::services::cache::{CacheSettings, CoalesceFallback};
use crate::services::pipeline::GuardLimits;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub catalog: CatalogConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub guards: GuardConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Catalog file location. Dataset, model, ERD and source definitions are
/// owned by the catalog collaborator; the gateway only reads them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub path: String,
}

/// Static API-key table. Key issuance lives outside the gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub keys: Vec<ApiKeyEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub tenant: String,
    /// admin | user | service
    pub role: String,
    #[serde(default)]
    pub key_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// memory | redis | disabled
    pub backend: String,
    pub redis_url: Option<String>,
    pub default_ttl_secs: u64,
    pub lock_ttl_secs: u64,
    pub wait_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub error_sentinel_ttl_secs: u64,
    pub value_max_bytes: usize,
    /// promote | fail - what a coalescing follower does after the wait
    /// window expires.
    pub coalesce_fallback: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub max_dimensions: usize,
    pub max_metrics: usize,
    pub max_filter_depth: usize,
    pub max_rows: u64,
    pub global_timeout_secs: u64,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "meridian")]
#[command(version, about = "Meridian - Semantic Analytics Gateway")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Catalog file path (overrides config file)
    #[arg(long, value_name = "PATH")]
    pub catalog: Option<String>,

    /// Logging level (overrides config file, e.g. "info,analytics_gateway=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Cache backend: memory, redis or disabled (overrides config file)
    #[arg(long, value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Redis URL for the cache backend (overrides config file)
    #[arg(long, value_name = "URL")]
    pub redis_url: Option<String>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file
    /// support.
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_CATALOG_PATH
    /// - APP_LOG_LEVEL
    /// - APP_CACHE_BACKEND / APP_REDIS_URL
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
                tracing::info!("Override server.port from env: {}", self.server.port);
            }
        }

        if let Ok(path) = std::env::var("APP_CATALOG_PATH") {
            self.catalog.path = path;
            tracing::info!("Override catalog.path from env: {}", self.catalog.path);
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(backend) = std::env::var("APP_CACHE_BACKEND") {
            self.cache.backend = backend;
            tracing::info!("Override cache.backend from env: {}", self.cache.backend);
        }

        if let Ok(url) = std::env::var("APP_REDIS_URL") {
            self.cache.redis_url = Some(url);
            tracing::info!("Override cache.redis_url from env");
        }
    }

    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(catalog) = &args.catalog {
            self.catalog.path = catalog.clone();
            tracing::info!("Override catalog.path from CLI: {}", self.catalog.path);
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(backend) = &args.cache_backend {
            self.cache.backend = backend.clone();
            tracing::info!("Override cache.backend from CLI: {}", self.cache.backend);
        }

        if let Some(url) = &args.redis_url {
            self.cache.redis_url = Some(url.clone());
            tracing::info!("Override cache.redis_url from CLI");
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        match self.cache.backend.as_str() {
            "memory" | "disabled" => {}
            "redis" => {
                if self.cache.redis_url.is_none() {
                    anyhow::bail!("cache.backend = redis requires cache.redis_url");
                }
            }
            other => anyhow::bail!("Unknown cache backend: {other}"),
        }

        match self.cache.coalesce_fallback.as_str() {
            "promote" | "fail" => {}
            other => anyhow::bail!("Unknown coalesce fallback: {other}"),
        }

        if self.guards.max_rows == 0 {
            anyhow::bail!("guards.max_rows must be > 0");
        }
        if self.guards.global_timeout_secs == 0 {
            anyhow::bail!("guards.global_timeout_secs must be > 0");
        }

        for entry in &self.auth.keys {
            entry
                .role
                .parse::<crate::models::Role>()
                .map_err(|e| anyhow::anyhow!("auth.keys entry for '{}': {e}", entry.tenant))?;
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            default_ttl: std::time::Duration::from_secs(self.cache.default_ttl_secs),
            lock_ttl: std::time::Duration::from_secs(self.cache.lock_ttl_secs),
            wait_timeout: std::time::Duration::from_secs(self.cache.wait_timeout_secs),
            poll_interval: std::time::Duration::from_millis(self.cache.poll_interval_ms),
            error_sentinel_ttl: std::time::Duration::from_secs(self.cache.error_sentinel_ttl_secs),
            value_max_bytes: self.cache.value_max_bytes,
            fallback: CoalesceFallback::parse(&self.cache.coalesce_fallback),
        }
    }

    pub fn guard_limits(&self) -> GuardLimits {
        GuardLimits {
            max_dimensions: self.guards.max_dimensions,
            max_metrics: self.guards.max_metrics,
            max_filter_depth: self.guards.max_filter_depth,
            max_rows: self.guards.max_rows,
            global_timeout: std::time::Duration::from_secs(self.guards.global_timeout_secs),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { path: "conf/catalog.toml".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,analytics_gateway=debug".to_string(),
            file: Some("logs/meridian.log".to_string()),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            redis_url: None,
            default_ttl_secs: 60,
            lock_ttl_secs: 30,
            wait_timeout_secs: 10,
            poll_interval_ms: 50,
            error_sentinel_ttl_secs: 5,
            value_max_bytes: 5 * 1024 * 1024,
            coalesce_fallback: "promote".to_string(),
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_dimensions: 20,
            max_metrics: 50,
            max_filter_depth: 10,
            max_rows: 100_000,
            global_timeout_secs: 30,
        }
    }
}
