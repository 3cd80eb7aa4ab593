//! CLI utilities for binaries
//!
//! Handles configuration path lookup and command line arguments.

use std::path::PathBuf;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// Used when `CONFIG_PATH` is not set
pub const DEFAULT_CONFIG_PATH: &str = "config/hub_client.yaml";

/// Load configuration path from environment or use default
///
/// # Examples
/// ```
/// use hub_client::bin_common::load_config_from_env;
///
/// let path = load_config_from_env();
/// ```
pub fn load_config_from_env() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
        .into()
}

/// Parse command line arguments for a binary
///
/// Returns a vector of arguments (excluding the program name)
pub fn parse_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}
