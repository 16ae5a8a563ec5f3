//! Integration tests for the ouvidoria CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create an ouvidoria Command isolated from the caller's environment
fn ouvidoria(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("ouvidoria");
    cmd.current_dir(dir.path())
        .env_remove("OUVIDORIA_HOST")
        .env_remove("OUVIDORIA_PORT")
        .env_remove("OUVIDORIA_DB_PATH")
        .env_remove("OUVIDORIA_LOG_LEVEL")
        .env_remove("OUVIDORIA_LOG_JSON")
        .env_remove("RUST_LOG");
    cmd
}

fn create_temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = create_temp_dir();
        ouvidoria(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"));
    }

    #[test]
    fn test_version() {
        let dir = create_temp_dir();
        ouvidoria(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_command_fails() {
        let dir = create_temp_dir();
        ouvidoria(&dir).arg("deploy").assert().failure();
    }
}

// =============================================================================
// Database Init Tests
// =============================================================================

mod init {
    use super::*;

    #[test]
    fn test_init_creates_default_database() {
        let dir = create_temp_dir();
        ouvidoria(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("database initialized"));

        assert!(dir.path().join(".ouvidoria/ouvidoria.db").exists());
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = create_temp_dir();
        ouvidoria(&dir).arg("init").assert().success();
        ouvidoria(&dir).arg("init").assert().success();
    }

    #[test]
    fn test_init_with_db_path_flag() {
        let dir = create_temp_dir();
        ouvidoria(&dir)
            .args(["init", "--db-path", "data/custom.db"])
            .assert()
            .success();
        assert!(dir.path().join("data/custom.db").exists());
    }

    #[test]
    fn test_init_db_path_from_environment() {
        let dir = create_temp_dir();
        ouvidoria(&dir)
            .env("OUVIDORIA_DB_PATH", "env/ouvidoria.db")
            .arg("init")
            .assert()
            .success();
        assert!(dir.path().join("env/ouvidoria.db").exists());
    }

    #[test]
    fn test_init_db_path_from_config_file() {
        let dir = create_temp_dir();
        fs::create_dir_all(dir.path().join(".ouvidoria")).unwrap();
        fs::write(
            dir.path().join(".ouvidoria/ouvidoria.toml"),
            "[database]\npath = \"from-toml.db\"\n",
        )
        .unwrap();

        ouvidoria(&dir).arg("init").assert().success();
        assert!(dir.path().join("from-toml.db").exists());
    }
}

// =============================================================================
// Config Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_dir();
        ouvidoria(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No ouvidoria.toml found"))
            .stdout(predicate::str::contains("port = 8080"));
    }

    #[test]
    fn test_config_show_reflects_env_override() {
        let dir = create_temp_dir();
        ouvidoria(&dir)
            .env("OUVIDORIA_PORT", "9999")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9999"));
    }

    #[test]
    fn test_config_invalid_env_port_fails() {
        let dir = create_temp_dir();
        ouvidoria(&dir)
            .env("OUVIDORIA_PORT", "not-a-port")
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("OUVIDORIA_PORT"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = create_temp_dir();
        ouvidoria(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created ouvidoria.toml"));

        let content = fs::read_to_string(dir.path().join(".ouvidoria/ouvidoria.toml")).unwrap();
        assert!(content.contains("[server]"));
        assert!(content.contains("conflict_attempts = 3"));
    }

    #[test]
    fn test_config_init_does_not_overwrite() {
        let dir = create_temp_dir();
        ouvidoria(&dir).args(["config", "init"]).assert().success();
        ouvidoria(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_no_config() {
        let dir = create_temp_dir();
        ouvidoria(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_dir();
        fs::create_dir_all(dir.path().join(".ouvidoria")).unwrap();
        fs::write(
            dir.path().join(".ouvidoria/ouvidoria.toml"),
            "[query]\ndefault_page_size = 500\nmax_page_size = 100\n",
        )
        .unwrap();

        ouvidoria(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"))
            .stdout(predicate::str::contains("max_page_size"));
    }

    #[test]
    fn test_custom_config_dir() {
        let dir = create_temp_dir();
        ouvidoria(&dir)
            .args(["--config-dir", "etc", "config", "init"])
            .assert()
            .success();
        assert!(dir.path().join("etc/ouvidoria.toml").exists());
    }
}
