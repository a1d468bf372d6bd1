// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for tool providers.
//!
//! Configuration is a mapping of provider name to connection parameters,
//! read from JSON or YAML. Lookup order when no explicit path is given:
//! `mcp_config.json`, `.toolbridge.json`, `.toolbridge.yaml`,
//! `.toolbridge/config.json` in the working directory, then
//! `~/.toolbridge/config.json`.

mod loader;
mod types;

pub use loader::{
    find_config_file, get_global_config_dir, get_global_config_path, load_config,
    load_config_file, save_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE,
};

pub use types::{
    expand_env_vars, BridgeConfig, ProviderConfig, TransportType, DEFAULT_STARTUP_TIMEOUT_SEC,
    DEFAULT_TOOL_TIMEOUT_SEC,
};
