//! `sheetsmith health`

use crate::GlobalArgs;
use anyhow::Result;
use sheetsmith_pipeline::{ComfyClient, InferenceService, ServiceStatus, StubService};

pub fn run(global: &GlobalArgs) -> Result<()> {
    let config = super::load_config(global)?;
    let service: Box<dyn InferenceService> = if global.offline {
        Box::new(StubService::new())
    } else {
        Box::new(ComfyClient::from_config(&config))
    };

    println!(
        "Checking {}...",
        check_target(service.name(), global.offline, &config.service.endpoint)
    );
    match service.health_check().map_err(|e| anyhow::anyhow!("{}", e))? {
        ServiceStatus::Available => {
            println!("  available");
            Ok(())
        }
        ServiceStatus::Unavailable(reason) => {
            anyhow::bail!("{} unavailable: {}", service.name(), reason)
        }
    }
}

/// What the check talks to; the in-process stub has no endpoint
fn check_target(service: &str, offline: bool, endpoint: &str) -> String {
    if offline {
        format!("{} (in-process)", service)
    } else {
        format!("{} at {}", service, endpoint)
    }
}
