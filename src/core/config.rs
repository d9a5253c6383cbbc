use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::core::cron::EngineSettings;
use crate::core::jobs::CatalogSettings;

pub const CONFIG_FILE: &str = "tally-cron.toml";
pub const DEFAULT_API_PORT: u16 = 17890;

/// Root data directory: `TALLY_DATA_DIR`, else the platform data dir.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TALLY_DATA_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|d| d.join("tally-cron"))
        .unwrap_or_else(|| PathBuf::from(".tally-cron"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub operations: OperationsConfig,

    /// Values for `${PLACEHOLDER}` tokens in job schedules.
    #[serde(default)]
    pub schedules: HashMap<String, String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(skip)]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub internal_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Relative paths resolve against the data dir.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_execution_days")]
    pub execution_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationsConfig {
    #[serde(default = "default_app_base_url")]
    pub app_base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_batch_size")]
    pub categorize_batch_size: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    DEFAULT_API_PORT
}
fn default_db_path() -> PathBuf {
    PathBuf::from("tally.db")
}
fn default_true() -> bool {
    true
}
fn default_retry_base_delay_ms() -> u64 {
    1_000
}
fn default_retry_max_delay_ms() -> u64 {
    30_000
}
fn default_shutdown_grace_ms() -> u64 {
    30_000
}
fn default_execution_days() -> u32 {
    30
}
fn default_app_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_request_timeout_ms() -> u64 {
    120_000
}
fn default_batch_size() -> u32 {
    50
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            internal_token: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            auto_migrate: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            execution_days: default_execution_days(),
        }
    }
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            app_base_url: default_app_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            categorize_batch_size: default_batch_size(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            engine: EngineConfig::default(),
            retention: RetentionConfig::default(),
            operations: OperationsConfig::default(),
            schedules: HashMap::new(),
            log_level: default_log_level(),
            data_dir: PathBuf::new(),
        }
    }
}

impl AppConfig {
    /// Read `tally-cron.toml` from `data_dir` (defaults when absent), then
    /// apply `TALLY_*` environment overrides.
    pub async fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let config_path = data_dir.join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            let parsed: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Invalid config in {}", config_path.display()))?;
            info!("Loaded config from {}", config_path.display());
            parsed
        } else {
            info!("No {} found, using defaults.", CONFIG_FILE);
            AppConfig::default()
        };
        config.data_dir = data_dir.to_path_buf();
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(host) = get("TALLY_API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("TALLY_API_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(token) = get("TALLY_INTERNAL_TOKEN") {
            self.server.internal_token = Some(token);
        }
        if let Some(url) = get("TALLY_APP_URL") {
            self.operations.app_base_url = url;
        }
        if let Some(level) = get("TALLY_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    pub fn database_path(&self) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            self.data_dir.join(&self.database.path)
        }
    }

    /// Configured token, ignoring blank values.
    pub fn internal_token(&self) -> Option<String> {
        self.server
            .internal_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    pub fn is_loopback_bind(&self) -> bool {
        let host = self.server.host.trim();
        host.eq_ignore_ascii_case("localhost")
            || host
                .parse::<IpAddr>()
                .map(|ip| ip.is_loopback())
                .unwrap_or(false)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn api_url(&self) -> String {
        let host = if self.server.host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            self.server.host.as_str()
        };
        format!("http://{}:{}", host, self.server.port)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            retry_base_delay: Duration::from_millis(self.engine.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(self.engine.retry_max_delay_ms),
            shutdown_grace: Duration::from_millis(self.engine.shutdown_grace_ms),
        }
    }

    pub fn catalog_settings(&self) -> CatalogSettings {
        CatalogSettings {
            categorize_batch_size: self.operations.categorize_batch_size,
            retention_days: self.retention.execution_days,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.operations.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_local_and_conservative() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, DEFAULT_API_PORT);
        assert!(config.internal_token().is_none());
        assert!(config.is_loopback_bind());
        assert!(config.database.auto_migrate);
        assert_eq!(config.retention.execution_days, 30);
        assert_eq!(config.engine_settings().retry_base_delay, Duration::from_secs(1));
        assert_eq!(config.engine_settings().retry_max_delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = AppConfig::load(tmp.path()).await.unwrap();
        assert_eq!(config.database_path(), tmp.path().join("tally.db"));
        assert_eq!(config.log_level, "info");
    }

    #[tokio::test]
    async fn partial_file_keeps_other_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"
log_level = "debug"

[server]
port = 9100

[engine]
retry_base_delay_ms = 250

[retention]
execution_days = 7

[schedules]
CRON_BACKUP_SCHEDULE = "0 4 * * *"
"#,
        )
        .await
        .unwrap();

        let config = AppConfig::load(tmp.path()).await.unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.engine.retry_base_delay_ms, 250);
        assert_eq!(config.engine.retry_max_delay_ms, 30_000);
        assert_eq!(config.catalog_settings().retention_days, 7);
        assert_eq!(config.schedules["CRON_BACKUP_SCHEDULE"], "0 4 * * *");
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE), "[server\nport = ")
            .await
            .unwrap();
        assert!(AppConfig::load(tmp.path()).await.is_err());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = AppConfig::default();
        let env: HashMap<&str, &str> = HashMap::from([
            ("TALLY_API_HOST", "0.0.0.0"),
            ("TALLY_API_PORT", "8088"),
            ("TALLY_INTERNAL_TOKEN", "  "),
            ("TALLY_APP_URL", "http://app.internal:3000"),
        ]);
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.bind_addr(), "0.0.0.0:8088");
        assert_eq!(config.api_url(), "http://127.0.0.1:8088");
        assert!(!config.is_loopback_bind());
        assert!(config.internal_token().is_none());
        assert_eq!(config.operations.app_base_url, "http://app.internal:3000");
    }

    #[test]
    fn absolute_database_path_is_kept() {
        let mut config = AppConfig::default();
        config.data_dir = PathBuf::from("/var/lib/tally");
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/tally/tally.db"));
        config.database.path = PathBuf::from("/srv/tally/main.db");
        assert_eq!(config.database_path(), PathBuf::from("/srv/tally/main.db"));
    }
}
