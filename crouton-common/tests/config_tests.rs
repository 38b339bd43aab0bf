//! Configuration resolution tests
//!
//! Tests that read or write `CROUTON_CONFIG` / `CROUTON_SIGNING_SECRET`
//! are marked `#[serial]` so they never race each other.

use crouton_common::config::{TomlConfig, CONFIG_ENV_VAR, SECRET_ENV_VAR};
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
#[serial]
fn test_env_var_config_path_is_used() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "port = 6001\n[logging]\nlevel = \"debug\"\n").unwrap();

    env::set_var(CONFIG_ENV_VAR, &path);
    let config = TomlConfig::resolve(None);
    env::remove_var(CONFIG_ENV_VAR);

    let config = config.unwrap();
    assert_eq!(config.port, 6001);
    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn test_cli_path_beats_env_var() {
    let dir = TempDir::new().unwrap();
    let cli = dir.path().join("cli.toml");
    let from_env = dir.path().join("env.toml");
    fs::write(&cli, "port = 7001\n").unwrap();
    fs::write(&from_env, "port = 7002\n").unwrap();

    env::set_var(CONFIG_ENV_VAR, &from_env);
    let config = TomlConfig::resolve(Some(&cli));
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.unwrap().port, 7001);
}

#[test]
#[serial]
fn test_named_but_missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    assert!(TomlConfig::resolve(Some(&missing)).is_err());
}

#[test]
#[serial]
fn test_secret_env_overrides_toml() {
    let config = TomlConfig::from_toml_str("signing_secret = \"from-toml\"\n").unwrap();

    env::remove_var(SECRET_ENV_VAR);
    assert_eq!(config.resolve_signing_secret().unwrap(), "from-toml");

    env::set_var(SECRET_ENV_VAR, "from-env");
    let secret = config.resolve_signing_secret();
    env::remove_var(SECRET_ENV_VAR);
    assert_eq!(secret.unwrap(), "from-env");
}

#[test]
#[serial]
fn test_missing_or_empty_secret_is_fatal() {
    env::remove_var(SECRET_ENV_VAR);

    let unset = TomlConfig::default();
    assert!(unset.resolve_signing_secret().is_err());

    let empty = TomlConfig::from_toml_str("signing_secret = \"\"\n").unwrap();
    assert!(empty.resolve_signing_secret().is_err());

    env::set_var(SECRET_ENV_VAR, "");
    let result = empty.resolve_signing_secret();
    env::remove_var(SECRET_ENV_VAR);
    assert!(result.is_err());
}
