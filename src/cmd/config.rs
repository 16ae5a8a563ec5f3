//! Configuration view and validation commands: `ouvidoria config`.

use anyhow::Result;
use std::path::Path;

use ouvidoria::config::{CONFIG_FILE_NAME, OuvidoriaToml};

use super::super::ConfigCommands;

pub fn cmd_config(
    config_dir: &Path,
    effective: &OuvidoriaToml,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = config_dir.join(CONFIG_FILE_NAME);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Ouvidoria Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No ouvidoria.toml found at {}", config_path.display());
                println!("Using defaults. Run 'ouvidoria config init' to create one.");
            }
            println!();

            println!("Effective values (with env overrides):");
            println!("[server]");
            println!("  host = \"{}\"", effective.server.host);
            println!("  port = {}", effective.server.port);
            println!("  dev_mode = {}", effective.server.dev_mode);
            println!("[database]");
            println!("  path = \"{}\"", effective.database.path.display());
            println!("[lifecycle]");
            println!("  conflict_attempts = {}", effective.lifecycle.conflict_attempts);
            println!("[query]");
            println!("  default_page_size = {}", effective.query.default_page_size);
            println!("  max_page_size = {}", effective.query.max_page_size);
            println!("[protocol]");
            println!("  utc_offset_hours = {}", effective.protocol.utc_offset_hours);
            println!("[logging]");
            println!("  level = \"{}\"", effective.logging.level);
            println!("  json = {}", effective.logging.json);
            println!("  file = \"{}\"", effective.logging.file);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No ouvidoria.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = OuvidoriaToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("ouvidoria.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }

            OuvidoriaToml::default().save(&config_path)?;

            println!("Created ouvidoria.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, dev_mode");
            println!("  - [database] path");
            println!("  - [lifecycle] conflict_attempts");
            println!("  - [query] default_page_size, max_page_size");
            println!("  - [protocol] utc_offset_hours");
            println!("  - [logging] level, json, file");
            println!();
        }
    }

    Ok(())
}
