//! `rvm config` — configuration management commands.

use std::path::{Path, PathBuf};

use rvm_config::{PositioningStrategy, RvmConfig};

use super::load_config;

pub fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn default() {
    println!("{}", RvmConfig::default_toml());
}

pub fn path(config_path: Option<&Path>) {
    println!("{}", resolve_path(config_path).display());
}

pub fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating {}", resolve_path(config_path).display());

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ {e}");
            return Err(e);
        }
    };
    println!("   ✅ Config parsed and validated");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Device:     {}", config.device.id);
    println!("   Local API:  {}", config.local_api.base_url);
    println!("   Event feed: {}", config.local_api.ws_url);
    println!(
        "   Operator:   {}:{} ({})",
        config.operator.host,
        config.operator.port,
        if config.operator.enabled { "enabled" } else { "disabled" }
    );
    println!("   Motion:     {:?}", config.positioning.strategy);

    Ok(())
}

fn resolve_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(RvmConfig::config_path)
}

/// Settings that load fine but are probably not what the operator meant.
fn warnings(config: &RvmConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.operator.enabled && config.operator.host == "0.0.0.0" {
        warnings.push("Operator API bound to 0.0.0.0; it has no authentication".to_string());
    }

    if config.compactor.grace_ms >= config.compactor.idle_stop_ms {
        warnings.push(format!(
            "compactor.grace_ms ({}) is not shorter than idle_stop_ms ({})",
            config.compactor.grace_ms, config.compactor.idle_stop_ms
        ));
    }

    if config.session.inactivity_ms >= config.session.max_duration_ms {
        warnings.push("session.inactivity_ms never fires before max_duration_ms".to_string());
    }

    if config.positioning.strategy == PositioningStrategy::HardwareSignal
        && config.positioning.signal_timeout_ms < config.timing.belt_to_sorter_ms
    {
        warnings.push(
            "positioning.signal_timeout_ms is shorter than the fixed belt travel time".to_string(),
        );
    }

    if config.timing.capture_expiry_ms <= config.timing.photo_timeout_ms {
        warnings.push(
            "timing.capture_expiry_ms should exceed photo_timeout_ms so late answers are recognized"
                .to_string(),
        );
    }

    if config.detection.max_retries == 0 {
        warnings.push("detection.max_retries = 0 rejects every unrecognized item at once".into());
    }

    warnings
}
