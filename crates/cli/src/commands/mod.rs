pub mod classify;
pub mod config_cmd;
pub mod doctor;
pub mod run;

use std::path::Path;

use rvm_config::RvmConfig;

/// Load the config from `--config` or the default location.
pub fn load_config(path: Option<&Path>) -> Result<RvmConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => RvmConfig::load_at(path),
        None => RvmConfig::load(),
    };
    config.map_err(|e| format!("Failed to load config: {e}").into())
}
