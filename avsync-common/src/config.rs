//! Configuration file resolution and TOML loading
//!
//! Config file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`~/.config/avsync/config.toml` on Linux)
//! 4. System config file (`/etc/avsync/config.toml`, Linux only)
//!
//! When no file is found the caller falls back to built-in defaults. A missing
//! config file is never fatal; a file that exists but does not parse is.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "AVSYNC_CONFIG";

/// Application directory name used under the platform config dir
const APP_DIR: &str = "avsync";

/// Config file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Where the resolved config path came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine,
    Environment,
    UserFile,
    SystemFile,
}

/// Resolve the config file path.
///
/// A command-line or environment path is returned even if it does not exist,
/// so that the caller can report the typo. Default locations are only returned
/// when the file is present.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
) -> Option<(PathBuf, ConfigSource)> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some((path.to_path_buf(), ConfigSource::CommandLine));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some((PathBuf::from(path), ConfigSource::Environment));
        }
    }

    // Priority 3: per-user config
    if let Some(path) = user_config_path() {
        if path.exists() {
            return Some((path, ConfigSource::UserFile));
        }
    }

    // Priority 4: system config (Linux only)
    if cfg!(target_os = "linux") {
        let path = PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILE_NAME);
        if path.exists() {
            return Some((path, ConfigSource::SystemFile));
        }
    }

    None
}

/// Per-user config file location for the current platform
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE_NAME))
}

/// Load and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    let value = toml::from_str(&content)?;
    debug!("Parsed config file {}", path.display());
    Ok(value)
}

/// Resolve and load a config, falling back to `T::default()` when no file is found
pub fn load_or_default<T>(cli_arg: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match resolve_config_path(cli_arg, CONFIG_ENV_VAR) {
        Some((path, source)) => {
            info!("Loading config from {} ({:?})", path.display(), source);
            load_toml(&path)
        }
        None => {
            info!("No config file found, using built-in defaults");
            Ok(T::default())
        }
    }
}
