// Container lifecycle: create, rebind, start and stop LXC containers

use crate::provision::ProvisionRequest;
use crate::pve::manager::{PlatformControl, PveError};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Time given to a freshly started container before anything is executed in it.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    NotCreated,
    Stopped,
    Running,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::NotCreated => "not created",
            ContainerState::Stopped => "stopped",
            ContainerState::Running => "running",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerHandle {
    id: u32,
    state: ContainerState,
}

impl ContainerHandle {
    /// Handle for a container that has not been created or observed yet.
    pub fn unbound(id: u32) -> Self {
        Self {
            id,
            state: ContainerState::NotCreated,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }
}

/// Root credential for a new container. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct RootPassword(String);

impl RootPassword {
    /// 64 hex characters drawn from two random v4 UUIDs.
    pub fn generate() -> Self {
        Self(format!(
            "{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        ))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RootPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootPassword(***)")
    }
}

#[derive(Debug, Clone)]
pub struct ContainerCreateSpec {
    pub id: u32,
    pub hostname: String,
    pub template: String,
    pub storage: String,
    pub disk_gb: u32,
    pub cores: u32,
    pub memory_mb: u32,
    pub bridge: String,
    pub address_cidr: String,
    pub gateway: String,
    pub unprivileged: bool,
    pub root_password: RootPassword,
}

impl ContainerCreateSpec {
    pub fn from_request(request: &ProvisionRequest, template: String) -> Self {
        Self {
            id: request.container_id,
            hostname: request.container_name.clone(),
            template,
            storage: request.storage_pool.clone(),
            disk_gb: request.disk_gb,
            cores: request.cpu_cores,
            memory_mb: request.memory_mb,
            bridge: request.network_bridge.clone(),
            address_cidr: request.static_address_cidr.to_string(),
            gateway: request.gateway.to_string(),
            unprivileged: request.unprivileged,
            root_password: RootPassword::generate(),
        }
    }

    /// Arguments for `pct create`.
    pub fn pct_args(&self) -> Vec<String> {
        vec![
            "create".to_string(),
            self.id.to_string(),
            self.template.clone(),
            "--hostname".to_string(),
            self.hostname.clone(),
            "--cores".to_string(),
            self.cores.to_string(),
            "--memory".to_string(),
            self.memory_mb.to_string(),
            "--swap".to_string(),
            "0".to_string(),
            "--rootfs".to_string(),
            format!("{}:{}", self.storage, self.disk_gb),
            "--net0".to_string(),
            format!(
                "name=eth0,bridge={},ip={},gw={}",
                self.bridge, self.address_cidr, self.gateway
            ),
            "--features".to_string(),
            "nesting=1".to_string(),
            "--unprivileged".to_string(),
            u8::from(self.unprivileged).to_string(),
            "--onboot".to_string(),
            "1".to_string(),
            "--ostype".to_string(),
            "debian".to_string(),
            // pct reads the password from argv only; it shows in the host process list
            // while pct runs.
            "--password".to_string(),
            self.root_password.expose().to_string(),
        ]
    }
}

pub struct ContainerManager<'a> {
    platform: &'a dyn PlatformControl,
    settle_delay: Duration,
}

impl<'a> ContainerManager<'a> {
    pub fn new(platform: &'a dyn PlatformControl, settle_delay: Duration) -> Self {
        Self {
            platform,
            settle_delay,
        }
    }

    /// Create a new container. Platform rejection is returned as-is; nothing is rolled back.
    pub async fn create(&self, spec: &ContainerCreateSpec) -> Result<ContainerHandle, PveError> {
        if self.platform.container_status(spec.id).await? != ContainerState::NotCreated {
            return Err(PveError::ContainerExists(spec.id));
        }

        self.platform.create_container(spec).await?;
        tracing::info!(
            "Container {} created; a random root password was set (use `pct enter {}` for a shell)",
            spec.id,
            spec.id
        );

        Ok(ContainerHandle {
            id: spec.id,
            state: ContainerState::Stopped,
        })
    }

    /// Bind to an existing container without touching its configuration.
    pub async fn validate_existing(&self, id: u32) -> Result<ContainerHandle, PveError> {
        match self.platform.container_status(id).await? {
            ContainerState::NotCreated => Err(PveError::ContainerNotFound(id)),
            state => {
                tracing::info!("Found existing container {} ({})", id, state);
                Ok(ContainerHandle { id, state })
            }
        }
    }

    /// Start the container if needed, then wait for it to settle.
    pub async fn start(&self, handle: &mut ContainerHandle) -> Result<(), PveError> {
        let state = self.platform.container_status(handle.id).await?;
        match state {
            ContainerState::NotCreated => return Err(PveError::ContainerNotFound(handle.id)),
            ContainerState::Running => {
                tracing::info!("Container {} already running", handle.id);
            }
            ContainerState::Stopped => {
                tracing::info!("Starting container {}", handle.id);
                self.platform.start_container(handle.id).await?;
            }
        }
        handle.state = ContainerState::Running;

        if !self.settle_delay.is_zero() {
            tracing::debug!("Waiting {:?} for container {} to settle", self.settle_delay, handle.id);
            tokio::time::sleep(self.settle_delay).await;
        }
        Ok(())
    }

    /// Best-effort stop; failures are logged and ignored.
    pub async fn stop(&self, handle: &mut ContainerHandle) {
        if handle.state == ContainerState::NotCreated {
            return;
        }
        match self.platform.stop_container(handle.id).await {
            Ok(()) => tracing::info!("Stopped container {}", handle.id),
            Err(e) => tracing::warn!("Stopping container {} failed (ignored): {}", handle.id, e),
        }
        handle.state = ContainerState::Stopped;
    }
}
