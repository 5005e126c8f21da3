//! `rvm doctor` — check the configuration and the local hardware API.

use std::path::Path;

use rvm_core::HardwareGateway;
use rvm_hardware::LocalApiGateway;

use super::load_config;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 RVM Doctor — System Diagnostics");
    println!("==================================\n");

    let mut issues = 0;

    let config = match load_config(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ {e}");
            println!("\n  ⚠️  Fix the config before checking hardware.");
            return Err(e);
        }
    };

    match LocalApiGateway::from_config(&config.local_api) {
        Ok(gateway) => match gateway.health_check().await {
            Ok(true) => println!("  ✅ Local API reachable at {}", gateway.base_url()),
            Ok(false) => {
                println!("  ⚠️  Local API at {} answered unhealthy", gateway.base_url());
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ Local API unreachable: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ Local API client: {e}");
            issues += 1;
        }
    }

    println!("  ℹ️  Event feed: {}", config.local_api.ws_url);

    if config.operator.enabled {
        let addr = format!("{}:{}", config.operator.host, config.operator.port);
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(_) => println!("  ✅ Operator port {addr} is free"),
            Err(e) => {
                println!("  ⚠️  Cannot bind operator API on {addr}: {e}");
                issues += 1;
            }
        }
    } else {
        println!("  ℹ️  Operator API disabled");
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
