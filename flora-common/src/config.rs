//! Configuration file discovery and root folder resolution
//!
//! Both follow the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file / standard config locations
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing configuration file is never fatal: callers get compiled
//! defaults and a warning.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Application directory name under the platform config/data dirs
pub const APP_DIR: &str = "flora";

/// Logging section shared by every Flora TOML file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive (overridden by `RUST_LOG`)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Locate the TOML configuration file for a service
///
/// Priority: CLI argument → `env_var_name` → `~/.config/flora/<file_name>`
/// → `/etc/flora/<file_name>`. Returns `None` when nothing exists.
pub fn locate_config_file(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join(file_name));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc").join(APP_DIR).join(file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load a TOML file into `T`, falling back to `T::default()` when absent
///
/// An explicitly named file that cannot be read is still a warning, not an
/// error; a file that exists but fails to parse IS an error, since silently
/// ignoring a broken config would run the service with unexpected values.
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        warn!("No configuration file found, using compiled defaults");
        return Ok(T::default());
    };

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(
                "Configuration file {} unreadable ({}), using compiled defaults",
                path.display(),
                e
            );
            return Ok(T::default());
        }
    };

    let parsed = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Configuration loaded from {}", path.display());
    Ok(parsed)
}

/// Resolve the root folder holding the service database
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    default_root_folder()
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./flora_data"))
}

/// Create the root folder if missing and return the database path inside it
pub fn ensure_root_folder(root: &Path, db_file_name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(root).map_err(|e| {
        Error::Config(format!(
            "Failed to create root folder {}: {}",
            root.display(),
            e
        ))
    })?;
    Ok(root.join(db_file_name))
}
