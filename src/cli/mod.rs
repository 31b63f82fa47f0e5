pub mod completions;
pub mod config;
pub mod inspect;
pub mod run;
pub mod sample;
pub mod serve;

use anyhow::{anyhow, Result};
use std::path::Path;

use naclbox::config::Config;

/// Parses a decimal or `0x`-prefixed address.
pub fn parse_address(value: &str) -> std::result::Result<usize, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(&hex.replace('_', ""), 16),
        None => value.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", value, e))
}

/// Loads `path` if given, otherwise the default configuration file.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) if !path.exists() => {
            return Err(anyhow!(
                "Configuration file not found: {}\n\n\
                 Suggestions:\n\
                 • Check the path passed to --config\n\
                 • Create a default one: naclbox config init",
                path.display()
            ))
        }
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}
