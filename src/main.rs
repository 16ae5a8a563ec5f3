use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ouvidoria::config::{DEFAULT_CONFIG_DIR, OuvidoriaToml};

mod cmd;

#[derive(Parser)]
#[command(name = "ouvidoria")]
#[command(version, about = "Ombudsman manifestation lifecycle and query server")]
pub struct Cli {
    /// Directory holding ouvidoria.toml
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_DIR)]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (CORS permissive for a local front-end dev server)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and run migrations
    Init {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default ouvidoria.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let mut toml = OuvidoriaToml::load_or_default(&cli.config_dir)?;
    toml.apply_env().context("Invalid environment configuration")?;
    let _log_guard = ouvidoria::telemetry::init_tracing(&toml.logging)?;

    match &cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
        } => {
            let overrides = cmd::ServeOverrides {
                host: host.clone(),
                port: *port,
                db_path: db_path.clone(),
                dev: *dev,
            };
            cmd::cmd_serve(&toml, &overrides).await?;
        }
        Commands::Init { db_path } => cmd::cmd_init(&toml, db_path.clone())?,
        Commands::Config { command } => {
            cmd::cmd_config(&cli.config_dir, &toml, command.clone())?
        }
    }

    Ok(())
}
