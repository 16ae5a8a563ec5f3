//! Configuration for the ouvidoria server, read from `.ouvidoria/ouvidoria.toml`.
//!
//! Settings are layered file → environment → CLI. Every section is optional;
//! a missing file yields the defaults below.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! dev_mode = false
//!
//! [database]
//! path = ".ouvidoria/ouvidoria.db"
//! pool_size = 8
//!
//! [lifecycle]
//! conflict_attempts = 3
//!
//! [query]
//! default_page_size = 20
//! max_page_size = 100
//!
//! [protocol]
//! utc_offset_hours = 0
//!
//! [logging]
//! level = "info"
//! json = false
//! file = ""
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ombudsman::db::{DEFAULT_POOL_SIZE, PageLimits};
use crate::ombudsman::gateway::GatewaySettings;
use crate::ombudsman::server::ServerConfig;

/// Default configuration directory, relative to the working directory.
pub const DEFAULT_CONFIG_DIR: &str = ".ouvidoria";
pub const CONFIG_FILE_NAME: &str = "ouvidoria.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a local front-end dev server.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Pooled SQLite connections; reads and writes each check one out.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".ouvidoria/ouvidoria.db")
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleSection {
    /// Total attempts for a write that loses to concurrent writers.
    #[serde(default = "default_conflict_attempts")]
    pub conflict_attempts: u32,
}

fn default_conflict_attempts() -> u32 {
    3
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            conflict_attempts: default_conflict_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySection {
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    100
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSection {
    /// Civil offset used to pick the protocol year.
    #[serde(default)]
    pub utc_offset_hours: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rolling log files. Empty means stdout only.
    #[serde(default)]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: String::new(),
        }
    }
}

/// Root of `ouvidoria.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OuvidoriaToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub lifecycle: LifecycleSection,
    #[serde(default)]
    pub query: QuerySection,
    #[serde(default)]
    pub protocol: ProtocolSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl OuvidoriaToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse ouvidoria.toml")
    }

    /// Load `<config_dir>/ouvidoria.toml`, or defaults when it doesn't exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize ouvidoria.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `OUVIDORIA_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("OUVIDORIA_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("OUVIDORIA_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid OUVIDORIA_PORT '{}'", port))?;
        }
        if let Some(path) = lookup("OUVIDORIA_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = lookup("OUVIDORIA_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("OUVIDORIA_LOG_JSON") {
            self.logging.json = matches!(json.trim(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            conflict_attempts: self.lifecycle.conflict_attempts.max(1),
            page_limits: PageLimits {
                default_size: self.query.default_page_size,
                max_size: self.query.max_page_size,
            },
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            db_path: self.database.path.clone(),
            db_pool_size: self.database.pool_size.max(1),
            dev_mode: self.server.dev_mode,
            utc_offset_hours: self.protocol.utc_offset_hours,
            gateway: self.gateway_settings(),
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0: the OS will pick a random port".to_string());
        }
        if self.database.pool_size == 0 {
            warnings.push("database.pool_size is 0: one connection will be used".to_string());
        }
        if self.lifecycle.conflict_attempts == 0 {
            warnings.push(
                "lifecycle.conflict_attempts is 0: writes will be attempted once".to_string(),
            );
        }
        if self.query.default_page_size == 0 {
            warnings.push("query.default_page_size is 0: pages will hold one item".to_string());
        }
        if self.query.default_page_size > self.query.max_page_size {
            warnings.push(format!(
                "query.default_page_size ({}) exceeds query.max_page_size ({})",
                self.query.default_page_size, self.query.max_page_size
            ));
        }
        if !(-12..=14).contains(&self.protocol.utc_offset_hours) {
            warnings.push(format!(
                "protocol.utc_offset_hours ({}) must be between -12 and 14",
                self.protocol.utc_offset_hours
            ));
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!(
                "logging.level '{}' is not a valid filter directive",
                self.logging.level
            ));
        }

        warnings
    }
}
