// Mount manager - persistent host storage bound into the container

use crate::provision::request::{Mode, ProvisionRequest};
use crate::pve::{ContainerHandle, ContainerManager, ContainerState, PlatformControl, PveError};
use std::path::PathBuf;

/// Server install tree inside the container.
pub const SERVER_MOUNT: &str = "/srv/server";
/// Save data tree inside the container.
pub const SAVES_MOUNT: &str = "/srv/saves";

/// Host uid/gid owning a bind-mounted directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOwner {
    pub uid: u32,
    pub gid: u32,
}

impl HostOwner {
    /// Container root of an unprivileged container under the default Proxmox id map.
    pub const MAPPED_ROOT: HostOwner = HostOwner {
        uid: 100000,
        gid: 100000,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub host_path: PathBuf,
    pub container_path: String,
    /// Applied after creation; `None` leaves the directory to host root.
    pub owner: Option<HostOwner>,
}

/// Server tree and save tree, in mount slot order. In an unprivileged container both
/// belong to `container_root`, the host identity of container root.
pub fn mounts_owned_by(request: &ProvisionRequest, container_root: HostOwner) -> Vec<MountSpec> {
    let base = request.host_dir();
    let owner = request.unprivileged.then_some(container_root);
    vec![
        MountSpec {
            host_path: base.join("server"),
            container_path: SERVER_MOUNT.to_string(),
            owner,
        },
        MountSpec {
            host_path: base.join("saves"),
            container_path: SAVES_MOUNT.to_string(),
            owner,
        },
    ]
}

pub struct MountManager<'a> {
    platform: &'a dyn PlatformControl,
    containers: &'a ContainerManager<'a>,
}

impl<'a> MountManager<'a> {
    pub fn new(platform: &'a dyn PlatformControl, containers: &'a ContainerManager<'a>) -> Self {
        Self {
            platform,
            containers,
        }
    }

    /// Create: host dirs then bind each into the container.
    /// Repair: host dirs only, best-effort, existing bindings untouched.
    pub async fn ensure_mounts(
        &self,
        handle: &mut ContainerHandle,
        specs: &[MountSpec],
        mode: Mode,
    ) -> Result<(), PveError> {
        match mode {
            Mode::Create => {
                ensure_host_dirs(specs).await?;
                self.bind(handle, specs).await
            }
            Mode::Repair => {
                ensure_host_dirs_best_effort(specs).await;
                Ok(())
            }
        }
    }

    /// Bind every spec to slot `mp{index}`. A running container is stopped first.
    pub async fn bind(
        &self,
        handle: &mut ContainerHandle,
        specs: &[MountSpec],
    ) -> Result<(), PveError> {
        if handle.state() == ContainerState::Running {
            self.containers.stop(handle).await;
        }
        for (slot, spec) in specs.iter().enumerate() {
            self.platform
                .set_mount_point(handle.id(), slot, &spec.host_path, &spec.container_path)
                .await?;
        }
        Ok(())
    }
}

/// `mkdir -p` every host path, then hand it to its owner if one is set.
pub async fn ensure_host_dirs(specs: &[MountSpec]) -> Result<(), PveError> {
    for spec in specs {
        let io_error = |e| PveError::Io {
            path: spec.host_path.display().to_string(),
            source: e,
        };
        tokio::fs::create_dir_all(&spec.host_path)
            .await
            .map_err(io_error)?;
        if let Some(owner) = spec.owner {
            std::os::unix::fs::chown(&spec.host_path, Some(owner.uid), Some(owner.gid))
                .map_err(io_error)?;
        }
        tracing::info!("Host directory ready: {}", spec.host_path.display());
    }
    Ok(())
}

pub async fn ensure_host_dirs_best_effort(specs: &[MountSpec]) {
    if let Err(e) = ensure_host_dirs(specs).await {
        tracing::warn!("Could not prepare host directories (continuing): {}", e);
    }
}
