//! Tests for config file discovery and TOML helpers
//!
//! Tests that set SITEPLAN_* environment variables are marked #[serial]
//! so they never observe each other's values.

use serde::{Deserialize, Serialize};
use serial_test::serial;
use siteplan_common::config::{
    default_data_dir, env_override, load_toml_file, resolve_config_path, write_toml_file,
};
use siteplan_common::Error;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
struct ServerSection {
    bind: String,
    #[serde(default)]
    workers: u32,
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
struct SampleConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    tags: Vec<String>,
}

#[test]
#[serial]
fn test_env_var_used_when_no_cli_arg() {
    env::set_var("SITEPLAN_TEST_CONFIG", "/tmp/from-env.toml");

    let path = resolve_config_path(None, "SITEPLAN_TEST_CONFIG", "siteplan.toml");
    assert_eq!(path, Some(PathBuf::from("/tmp/from-env.toml")));

    env::remove_var("SITEPLAN_TEST_CONFIG");
}

#[test]
#[serial]
fn test_cli_arg_beats_env_var() {
    env::set_var("SITEPLAN_TEST_CONFIG", "/tmp/from-env.toml");

    let path = resolve_config_path(
        Some(Path::new("/tmp/from-cli.toml")),
        "SITEPLAN_TEST_CONFIG",
        "siteplan.toml",
    );
    assert_eq!(path, Some(PathBuf::from("/tmp/from-cli.toml")));

    env::remove_var("SITEPLAN_TEST_CONFIG");
}

#[test]
#[serial]
fn test_blank_env_var_is_ignored() {
    env::set_var("SITEPLAN_TEST_CONFIG", "   ");

    // Falls through to the platform dir, which has no file with this name
    let path = resolve_config_path(
        None,
        "SITEPLAN_TEST_CONFIG",
        "siteplan-config-test-does-not-exist.toml",
    );
    assert_eq!(path, None);
    assert_eq!(env_override("SITEPLAN_TEST_CONFIG"), None);

    env::remove_var("SITEPLAN_TEST_CONFIG");
}

#[test]
#[serial]
fn test_env_override_returns_value() {
    env::set_var("SITEPLAN_TEST_BIND", "0.0.0.0:9000");
    assert_eq!(
        env_override("SITEPLAN_TEST_BIND"),
        Some("0.0.0.0:9000".to_string())
    );
    env::remove_var("SITEPLAN_TEST_BIND");
    assert_eq!(env_override("SITEPLAN_TEST_BIND"), None);
}

#[test]
fn test_default_data_dir_is_siteplan_folder() {
    let dir = default_data_dir();
    assert!(dir.ends_with("siteplan") || dir.ends_with("siteplan_data"));
}

#[test]
fn test_partial_toml_uses_serde_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("siteplan.toml");
    std::fs::write(&path, "[server]\nbind = \"127.0.0.1:5800\"\n").unwrap();

    let loaded: SampleConfig = load_toml_file(&path).unwrap();
    assert_eq!(loaded.server.bind, "127.0.0.1:5800");
    assert_eq!(loaded.server.workers, 0);
    assert!(loaded.tags.is_empty());
}

#[test]
fn test_malformed_toml_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "[server\nbind = ").unwrap();

    let result: siteplan_common::Result<SampleConfig> = load_toml_file(&path);
    match result {
        Err(Error::Config(message)) => assert!(message.contains("Parse TOML failed")),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_write_replaces_existing_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("siteplan.toml");

    let first = SampleConfig {
        server: ServerSection {
            bind: "127.0.0.1:1".to_string(),
            workers: 1,
        },
        tags: vec!["old".to_string()],
    };
    let second = SampleConfig {
        server: ServerSection {
            bind: "127.0.0.1:2".to_string(),
            workers: 4,
        },
        tags: vec![],
    };

    write_toml_file(&first, &path).unwrap();
    write_toml_file(&second, &path).unwrap();

    let loaded: SampleConfig = load_toml_file(&path).unwrap();
    assert_eq!(loaded, second);
    assert!(!path.with_extension("toml.tmp").exists());
}
