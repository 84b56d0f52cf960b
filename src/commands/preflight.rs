use crate::commands::CommandError;
use crate::pve::{
    newest_matching, EnvironmentProbe, PlatformControl, PveManager, TEMPLATE_PREFIX,
    TEMPLATE_STORAGE,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub outcome: Result<String, String>,
}

impl Check {
    fn passed(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Read-only host checks. Nothing is created or downloaded.
pub async fn run_checks(platform: &dyn PlatformControl) -> Vec<Check> {
    let mut checks = Vec::new();

    checks.push(Check {
        name: "Root and Proxmox tools",
        outcome: platform
            .check_prerequisites()
            .await
            .map(|_| "available".to_string())
            .map_err(|e| e.to_string()),
    });

    checks.push(Check {
        name: "Container storage",
        outcome: match platform.list_storage().await {
            Ok(pools) if pools.is_empty() => Err("no active storage accepts rootdir".to_string()),
            Ok(pools) => Ok(pools.join(", ")),
            Err(e) => Err(e.to_string()),
        },
    });

    checks.push(Check {
        name: "Network bridge",
        outcome: match platform.list_bridges().await {
            Ok(bridges) if bridges.is_empty() => Err("no Linux bridge found".to_string()),
            Ok(bridges) => Ok(bridges.join(", ")),
            Err(e) => Err(e.to_string()),
        },
    });

    checks.push(Check {
        name: "Debian 12 template",
        outcome: template_status(platform).await,
    });

    checks
}

async fn template_status(platform: &dyn PlatformControl) -> Result<String, String> {
    let local = platform
        .local_templates(TEMPLATE_STORAGE)
        .await
        .map_err(|e| e.to_string())?;
    if let Some(volid) = newest_matching(&local, TEMPLATE_PREFIX) {
        return Ok(format!("{} (cached)", volid));
    }

    let available = platform
        .available_templates()
        .await
        .map_err(|e| e.to_string())?;
    match newest_matching(&available, TEMPLATE_PREFIX) {
        Some(name) => Ok(format!("{} (will be downloaded)", name)),
        None => Err(format!("no {} template cached or listed", TEMPLATE_PREFIX)),
    }
}

pub async fn preflight() -> Result<(), CommandError> {
    println!("🔍 Checking Proxmox host...\n");

    let host = PveManager::new();
    let checks = run_checks(&host).await;
    for check in &checks {
        match &check.outcome {
            Ok(detail) => println!("  {} ... ✓ {}", check.name, detail),
            Err(detail) => println!("  {} ... ✗ {}", check.name, detail),
        }
    }

    let next_id = EnvironmentProbe::new(&host).next_container_id().await;
    println!("\n  Next free container id: {}", next_id);

    let failed = checks.iter().filter(|c| !c.passed()).count();
    println!();
    if failed > 0 {
        return Err(CommandError::Preflight(failed));
    }
    println!("✅ All checks passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::testing::FakeHost;

    #[tokio::test]
    async fn test_healthy_host_passes_every_check() {
        let host = FakeHost::new();
        let checks = run_checks(&host).await;
        assert_eq!(checks.len(), 4);
        assert!(checks.iter().all(Check::passed), "{:?}", checks);
        assert_eq!(
            checks[3].outcome,
            Ok("debian-12-standard_12.7-1_amd64.tar.zst (will be downloaded)".to_string())
        );
    }

    #[tokio::test]
    async fn test_failures_are_reported_per_check() {
        let host = FakeHost::new()
            .failing_prerequisites()
            .with_inventory(vec![], vec!["vmbr0".to_string()], None)
            .with_templates(vec![], vec![]);
        let checks = run_checks(&host).await;

        let failed: Vec<&str> = checks
            .iter()
            .filter(|c| !c.passed())
            .map(|c| c.name)
            .collect();
        assert_eq!(
            failed,
            vec!["Root and Proxmox tools", "Container storage", "Debian 12 template"]
        );
    }

    #[tokio::test]
    async fn test_cached_template_is_preferred() {
        let host = FakeHost::new().with_templates(
            vec!["local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst".to_string()],
            vec!["debian-12-standard_12.7-1_amd64.tar.zst".to_string()],
        );
        let checks = run_checks(&host).await;
        assert_eq!(
            checks[3].outcome,
            Ok("local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst (cached)".to_string())
        );
    }
}
