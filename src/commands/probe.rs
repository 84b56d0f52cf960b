use crate::commands::CommandError;
use crate::pve::{EnvironmentProbe, PlatformControl, PveManager};
use serde::Serialize;

/// Defaults `create` would use when the matching flags are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostDefaults {
    pub storage_pool: String,
    pub network_bridge: String,
    pub next_container_id: u32,
}

pub async fn detect_defaults(platform: &dyn PlatformControl) -> HostDefaults {
    let probe = EnvironmentProbe::new(platform);
    HostDefaults {
        storage_pool: probe.detect_storage_pool().await,
        network_bridge: probe.detect_network_bridge().await,
        next_container_id: probe.next_container_id().await,
    }
}

pub async fn probe() -> Result<(), CommandError> {
    let host = PveManager::new();
    let defaults = detect_defaults(&host).await;
    println!("{}", serde_json::to_string_pretty(&defaults)?);
    Ok(())
}
