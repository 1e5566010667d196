//! Config file resolution tests
//!
//! Uses serial_test because the tests manipulate AVSYNC_CONFIG.

use avsync_common::config::{load_or_default, resolve_config_path, ConfigSource, CONFIG_ENV_VAR};
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Deserialize, PartialEq)]
struct Bootstrap {
    #[serde(default = "default_level")]
    level: String,
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self { level: default_level() }
    }
}

fn default_level() -> String {
    "info".to_string()
}

#[test]
#[serial]
fn test_env_var_used_when_no_cli_arg() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/avsync-test-env.toml");

    let (path, source) = resolve_config_path(None, CONFIG_ENV_VAR).unwrap();
    assert_eq!(path, Path::new("/tmp/avsync-test-env.toml"));
    assert_eq!(source, ConfigSource::Environment);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_cli_arg_overrides_env_var() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/avsync-test-env.toml");

    let (path, source) =
        resolve_config_path(Some(Path::new("/tmp/cli.toml")), CONFIG_ENV_VAR).unwrap();
    assert_eq!(path, Path::new("/tmp/cli.toml"));
    assert_eq!(source, ConfigSource::CommandLine);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_load_or_default_reads_env_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "level = \"trace\"").unwrap();
    env::set_var(CONFIG_ENV_VAR, file.path());

    let config: Bootstrap = load_or_default(None).unwrap();
    assert_eq!(config.level, "trace");

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_load_or_default_empty_file_uses_field_defaults() {
    let file = tempfile::NamedTempFile::new().unwrap();

    let config: Bootstrap = load_or_default(Some(file.path())).unwrap();
    assert_eq!(config, Bootstrap::default());
}
