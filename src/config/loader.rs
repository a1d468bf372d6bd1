// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in the working
//! directory or the global config directory.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::BridgeConfig;

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[
    "mcp_config.json",
    ".toolbridge.json",
    ".toolbridge.yaml",
    ".toolbridge/config.json",
];

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".toolbridge";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Find a config file in `dir`, falling back to the global config path.
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .or_else(|| get_global_config_path().filter(|path| path.is_file()))
}

/// Load a configuration file (JSON or YAML, chosen by extension).
pub fn load_config_file(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    let config = match extension.to_lowercase().as_str() {
        "yaml" | "yml" => BridgeConfig::from_yaml(&content)?,
        _ => BridgeConfig::from_json(&content)?,
    };

    tracing::debug!(
        path = %path.display(),
        providers = config.providers.len(),
        "loaded provider configuration"
    );
    Ok(config)
}

/// Load and validate configuration from an explicit path or the search path.
pub fn load_config(explicit: Option<&Path>, workspace_root: &Path) -> Result<BridgeConfig, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => find_config_file(workspace_root).ok_or_else(|| {
            ConfigError::NotFound(format!(
                "no config file found in {} (looked for {})",
                workspace_root.display(),
                CONFIG_FILES.join(", ")
            ))
        })?,
    };

    let config = load_config_file(&path)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration as pretty JSON.
pub fn save_config(path: &Path, config: &BridgeConfig) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use tempfile::TempDir;

    #[test]
    fn test_global_config_dir() {
        if let Some(dir) = get_global_config_dir() {
            assert!(dir.ends_with(".toolbridge"));
        }
    }

    #[test]
    fn test_load_json_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mcp_config.json");
        std::fs::write(
            &path,
            r#"{"mcpServers": {"browser": {"url": "http://localhost:8931/mcp"}}}"#,
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(
            config.provider("browser").unwrap().url.as_deref(),
            Some("http://localhost:8931/mcp")
        );
    }

    #[test]
    fn test_load_yaml_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".toolbridge.yaml");
        std::fs::write(
            &path,
            "mcpServers:\n  fs:\n    command: npx\n    args: [\"-y\", \"server-filesystem\"]\n",
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        let fs = config.provider("fs").unwrap();
        assert_eq!(fs.command.as_deref(), Some("npx"));
        assert_eq!(fs.args.len(), 2);
    }

    #[test]
    fn test_find_config_file_order() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(".toolbridge.json"), "{}").unwrap();
        std::fs::write(temp.path().join("mcp_config.json"), "{}").unwrap();

        let found = find_config_file(temp.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "mcp_config.json");
    }

    #[test]
    fn test_load_config_validates() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.json");
        std::fs::write(&path, r#"{"mcpServers": {"x": {"transport": "stdio"}}}"#).unwrap();

        let err = load_config(Some(&path), temp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_config_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = load_config(Some(&temp.path().join("absent.json")), temp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.json");
        let config = BridgeConfig::new()
            .with_provider("b", ProviderConfig::http("http://b"))
            .with_provider("a", ProviderConfig::stdio("server").with_args(["--flag"]));

        save_config(&path, &config).unwrap();
        let reloaded = load_config(Some(&path), temp.path()).unwrap();
        assert_eq!(reloaded, config);
    }
}
