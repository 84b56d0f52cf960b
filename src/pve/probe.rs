// Environment probe - host defaults, falling back when the host reports nothing usable

use crate::pve::manager::{PlatformControl, PveError};

pub const FALLBACK_STORAGE: &str = "local-lvm";
pub const FALLBACK_BRIDGE: &str = "vmbr0";
pub const FALLBACK_CONTAINER_ID: u32 = 100;

/// Storage that holds downloaded OS templates.
pub const TEMPLATE_STORAGE: &str = "local";
pub const TEMPLATE_PREFIX: &str = "debian-12-standard";

pub struct EnvironmentProbe<'a> {
    platform: &'a dyn PlatformControl,
}

impl<'a> EnvironmentProbe<'a> {
    pub fn new(platform: &'a dyn PlatformControl) -> Self {
        Self { platform }
    }

    pub async fn detect_storage_pool(&self) -> String {
        match self.platform.list_storage().await {
            Ok(pools) => prefer(pools, FALLBACK_STORAGE),
            Err(e) => {
                tracing::debug!("Storage probe failed: {}", e);
                FALLBACK_STORAGE.to_string()
            }
        }
    }

    pub async fn detect_network_bridge(&self) -> String {
        match self.platform.list_bridges().await {
            Ok(bridges) => prefer(bridges, FALLBACK_BRIDGE),
            Err(e) => {
                tracing::debug!("Bridge probe failed: {}", e);
                FALLBACK_BRIDGE.to_string()
            }
        }
    }

    pub async fn next_container_id(&self) -> u32 {
        self.platform.next_free_id().await.unwrap_or_else(|e| {
            tracing::debug!("Next id probe failed: {}", e);
            FALLBACK_CONTAINER_ID
        })
    }

    /// Resolve the OS template volume id, downloading the newest Debian 12 image if needed.
    pub async fn resolve_template(&self, explicit: Option<&str>) -> Result<String, PveError> {
        if let Some(template) = explicit {
            return Ok(template.to_string());
        }

        let local = self.platform.local_templates(TEMPLATE_STORAGE).await?;
        if let Some(volid) = newest_matching(&local, TEMPLATE_PREFIX) {
            tracing::info!("Using cached template {}", volid);
            return Ok(volid.to_string());
        }

        if let Err(e) = self.platform.refresh_templates().await {
            tracing::warn!("Template index refresh failed, using cached index: {}", e);
        }

        let available = self.platform.available_templates().await?;
        let name = newest_matching(&available, TEMPLATE_PREFIX)
            .ok_or_else(|| PveError::TemplateUnavailable(TEMPLATE_PREFIX.to_string()))?
            .to_string();

        self.platform
            .download_template(TEMPLATE_STORAGE, &name)
            .await?;
        Ok(format!("{}:vztmpl/{}", TEMPLATE_STORAGE, name))
    }
}

/// The fallback if the host reports it, else the first reported entry, else the fallback.
fn prefer(found: Vec<String>, fallback: &str) -> String {
    if found.iter().any(|f| f == fallback) {
        return fallback.to_string();
    }
    found
        .into_iter()
        .next()
        .unwrap_or_else(|| fallback.to_string())
}

/// Newest template whose file name starts with `prefix`, compared by embedded version numbers.
pub fn newest_matching<'n>(names: &'n [String], prefix: &str) -> Option<&'n str> {
    names
        .iter()
        .filter(|n| file_name(n).starts_with(prefix))
        .max_by_key(|n| version_key(file_name(n)))
        .map(String::as_str)
}

fn file_name(volid: &str) -> &str {
    volid.rsplit('/').next().unwrap_or(volid)
}

fn version_key(name: &str) -> Vec<u32> {
    name.split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}
