//! Server and database commands: `ouvidoria serve`, `ouvidoria init`.

use anyhow::Result;
use std::path::PathBuf;

use ouvidoria::config::OuvidoriaToml;
use ouvidoria::ombudsman::server::{self, ServerConfig};

/// CLI flags that win over file and environment settings.
#[derive(Debug, Default, Clone)]
pub struct ServeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub dev: bool,
}

impl ServeOverrides {
    pub fn apply(&self, mut config: ServerConfig) -> ServerConfig {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(db_path) = &self.db_path {
            config.db_path = db_path.clone();
        }
        if self.dev {
            config.dev_mode = true;
        }
        config
    }
}

pub async fn cmd_serve(toml: &OuvidoriaToml, overrides: &ServeOverrides) -> Result<()> {
    for warning in toml.validate() {
        tracing::warn!(%warning, "Configuration warning");
    }
    let config = overrides.apply(toml.server_config());
    server::start_server(config).await
}

pub fn cmd_init(toml: &OuvidoriaToml, db_path: Option<PathBuf>) -> Result<()> {
    let db_path = db_path.unwrap_or_else(|| toml.database.path.clone());
    server::open_database(&db_path, toml.database.pool_size)?;
    tracing::info!(db_path = %db_path.display(), "Database initialized");
    println!("Ouvidoria database initialized at {}", db_path.display());
    Ok(())
}
