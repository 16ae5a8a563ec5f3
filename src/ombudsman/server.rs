use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState};
use super::clock::SystemClock;
use super::db::{DEFAULT_POOL_SIZE, DbHandle, ManifestationDb};
use super::gateway::{GatewaySettings, QueryGateway};
use super::protocol::ProtocolGenerator;

/// Configuration for the ombudsman server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub db_pool_size: u32,
    pub dev_mode: bool,
    pub utc_offset_hours: i32,
    pub gateway: GatewaySettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            db_path: PathBuf::from(".ouvidoria/ouvidoria.db"),
            db_pool_size: DEFAULT_POOL_SIZE,
            dev_mode: false,
            utc_offset_hours: 0,
            gateway: GatewaySettings::default(),
        }
    }
}

/// Build the full application router with request tracing.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let app = api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Open the database (creating its directory) and run migrations.
pub fn open_database(db_path: &std::path::Path, pool_size: u32) -> Result<ManifestationDb> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    ManifestationDb::with_pool_size(db_path, pool_size)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))
}

/// Start the ombudsman server.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let db = open_database(&config.db_path, config.db_pool_size)?;
    let protocol = ProtocolGenerator::with_utc_offset_hours(config.utc_offset_hours)
        .context("Invalid protocol configuration")?;
    let gateway = QueryGateway::new(
        DbHandle::new(db),
        Arc::new(SystemClock),
        protocol,
        config.gateway,
    );
    let app = build_router(Arc::new(AppState { gateway }), config.dev_mode);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        address = %local_addr,
        db_path = %config.db_path.display(),
        dev_mode = config.dev_mode,
        "Ouvidoria server listening"
    );
    println!("Ouvidoria running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
