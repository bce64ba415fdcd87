//! Configuration loading for Cosmos applications
//!
//! Provides utilities for loading configuration files from the shared
//! Cosmos config directory (~/.config/cosmos/). Set `COSMOS_CONFIG_DIR` to
//! use another directory (containers, tests).
//!
//! Call [`init`] at application startup to bootstrap the config directory.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Initialize the Cosmos config directory.
///
/// Creates ~/.config/cosmos/ if it doesn't exist.
/// Call this once at application startup.
pub fn init() -> Result<PathBuf> {
    ensure_config_dir()
}

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "COSMOS_CONFIG_DIR";

/// Get the Cosmos config directory (`$COSMOS_CONFIG_DIR` or ~/.config/cosmos/)
pub fn config_dir() -> Option<PathBuf> {
    resolve_config_dir(std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from))
}

fn resolve_config_dir(override_dir: Option<PathBuf>) -> Option<PathBuf> {
    match override_dir {
        Some(dir) if !dir.as_os_str().is_empty() => Some(dir),
        _ => dirs::config_dir().map(|p| p.join("cosmos")),
    }
}

/// Get the path to a config file within the Cosmos config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Load and parse a JSON config file from the Cosmos config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Check if a config file exists in the Cosmos config directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Ensure the Cosmos config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_dir() {
        let dir = resolve_config_dir(None);
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("cosmos"));

        let dir = resolve_config_dir(Some(PathBuf::new()));
        assert!(dir.unwrap().ends_with("cosmos"));
    }

    #[test]
    fn test_config_dir_override() {
        let dir = resolve_config_dir(Some(PathBuf::from("/etc/vega")));
        assert_eq!(dir, Some(PathBuf::from("/etc/vega")));
    }

    #[test]
    fn test_load_json_file() {
        #[derive(Debug, serde::Deserialize)]
        struct Settings {
            name: String,
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"name": "vega"}"#).unwrap();
        let settings: Settings = load_json_file(&path).unwrap();
        assert_eq!(settings.name, "vega");

        let err = load_json_file::<Settings>(&dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("missing.json"));
    }
}
