// Orchestration driver - the create/repair state machine

use crate::games::GameProfile;
use crate::provision::error::ProvisionError;
use crate::provision::mounts::{
    ensure_host_dirs_best_effort, mounts_owned_by, HostOwner, MountManager,
};
use crate::provision::request::{Mode, ProvisionRequest};
use crate::provision::steps::Provisioner;
use crate::pve::{
    ContainerCreateSpec, ContainerExec, ContainerHandle, ContainerManager, EnvironmentProbe,
    PlatformControl, DEFAULT_SETTLE_DELAY,
};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    AllocateContainer,
    Mount,
    ValidateContainer,
    EnsureHostDirs,
    Start,
    InstallDependencies,
    InstallUpdateClient,
    WriteStartupScript,
    RegisterService,
    Done,
}

impl Stage {
    pub fn next(self, mode: Mode) -> Stage {
        match (self, mode) {
            (Stage::Init, Mode::Create) => Stage::AllocateContainer,
            (Stage::Init, Mode::Repair) => Stage::ValidateContainer,
            (Stage::AllocateContainer, _) => Stage::Mount,
            (Stage::Mount, _) => Stage::Start,
            (Stage::ValidateContainer, _) => Stage::EnsureHostDirs,
            (Stage::EnsureHostDirs, _) => Stage::Start,
            (Stage::Start, _) => Stage::InstallDependencies,
            (Stage::InstallDependencies, _) => Stage::InstallUpdateClient,
            (Stage::InstallUpdateClient, _) => Stage::WriteStartupScript,
            (Stage::WriteStartupScript, _) => Stage::RegisterService,
            (Stage::RegisterService, _) | (Stage::Done, _) => Stage::Done,
        }
    }

    /// Every stage a successful run passes through, in order.
    pub fn sequence(mode: Mode) -> Vec<Stage> {
        let mut stages = vec![Stage::Init];
        let mut stage = Stage::Init;
        while stage != Stage::Done {
            stage = stage.next(mode);
            stages.push(stage);
        }
        stages
    }

    /// Whether a container exists once this stage has been reached in create mode.
    pub fn container_allocated(self) -> bool {
        self > Stage::AllocateContainer
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Init => "preflight",
            Stage::AllocateContainer => "container creation",
            Stage::Mount => "mount setup",
            Stage::ValidateContainer => "container lookup",
            Stage::EnsureHostDirs => "host directory setup",
            Stage::Start => "container start",
            Stage::InstallDependencies => "dependency installation",
            Stage::InstallUpdateClient => "SteamCMD installation",
            Stage::WriteStartupScript => "startup script generation",
            Stage::RegisterService => "service registration",
            Stage::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub mode: Mode,
    pub handle: ContainerHandle,
    pub stages: Vec<Stage>,
    pub service_unit: String,
    pub launch_arguments: Vec<String>,
}

pub struct Orchestrator<'a> {
    platform: &'a dyn PlatformControl,
    exec: &'a dyn ContainerExec,
    settle_delay: Duration,
    container_root: HostOwner,
}

impl<'a> Orchestrator<'a> {
    pub fn new(platform: &'a dyn PlatformControl, exec: &'a dyn ContainerExec) -> Self {
        Self {
            platform,
            exec,
            settle_delay: DEFAULT_SETTLE_DELAY,
            container_root: HostOwner::MAPPED_ROOT,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Host identity of container root for unprivileged containers; host
    /// directories are chowned to it.
    pub fn with_container_root(mut self, owner: HostOwner) -> Self {
        self.container_root = owner;
        self
    }

    /// Drive one request from `Init` to `Done`. The first failing stage aborts the run;
    /// completed stages are left in place.
    pub async fn run(
        &self,
        request: &ProvisionRequest,
        profile: &GameProfile,
    ) -> Result<ProvisionReport, ProvisionError> {
        request.validate()?;
        profile.check_paths()?;

        let containers = ContainerManager::new(self.platform, self.settle_delay);
        let mounts = MountManager::new(self.platform, &containers);
        let provisioner = Provisioner::new(self.exec, request, profile);
        let mount_specs = mounts_owned_by(request, self.container_root);

        let mut handle = ContainerHandle::unbound(request.container_id);
        let mut report = ProvisionReport {
            mode: request.mode,
            handle: handle.clone(),
            stages: Vec::new(),
            service_unit: String::new(),
            launch_arguments: Vec::new(),
        };

        let mut stage = Stage::Init;
        while stage != Stage::Done {
            tracing::info!("[{}] {}", request.container_id, stage);
            match stage {
                Stage::Init => {
                    self.platform
                        .check_prerequisites()
                        .await
                        .map_err(ProvisionError::platform(stage))?;
                }
                Stage::AllocateContainer => {
                    let probe = EnvironmentProbe::new(self.platform);
                    let template = probe
                        .resolve_template(request.template.as_deref())
                        .await
                        .map_err(ProvisionError::platform(stage))?;
                    let spec = ContainerCreateSpec::from_request(request, template);
                    handle = containers
                        .create(&spec)
                        .await
                        .map_err(ProvisionError::platform(stage))?;
                }
                Stage::Mount => {
                    mounts
                        .ensure_mounts(&mut handle, &mount_specs, Mode::Create)
                        .await
                        .map_err(ProvisionError::platform(stage))?;
                }
                Stage::ValidateContainer => {
                    handle = containers
                        .validate_existing(request.container_id)
                        .await
                        .map_err(ProvisionError::platform(stage))?;
                }
                Stage::EnsureHostDirs => {
                    ensure_host_dirs_best_effort(&mount_specs).await;
                }
                Stage::Start => {
                    containers
                        .start(&mut handle)
                        .await
                        .map_err(ProvisionError::platform(stage))?;
                }
                Stage::InstallDependencies => provisioner.install_dependencies(&handle).await?,
                Stage::InstallUpdateClient => provisioner.install_update_client(&handle).await?,
                Stage::WriteStartupScript => {
                    let script = provisioner.write_startup_script(&handle).await?;
                    report.launch_arguments = script
                        .launch()
                        .map(|launch| launch.arguments.clone())
                        .unwrap_or_default();
                }
                Stage::RegisterService => {
                    let unit = provisioner.register_service(&handle).await?;
                    report.service_unit = unit.unit_file_name();
                }
                Stage::Done => {}
            }
            report.stages.push(stage);
            stage = stage.next(request.mode);
        }

        report.stages.push(Stage::Done);
        report.handle = handle;
        tracing::info!(
            "Container {} provisioned; {} is active",
            request.container_id,
            report.service_unit
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::get_builtin_profiles;
    use crate::provision::script::STARTUP_SCRIPT_PATH;
    use crate::provision::testing::{current_owner, sample_request, FakeHost};
    use crate::pve::ContainerState;
    use std::os::unix::fs::MetadataExt;

    fn request_in(dir: &std::path::Path, mode: Mode) -> ProvisionRequest {
        let mut request = sample_request();
        request.host_root = dir.to_path_buf();
        request.mode = mode;
        request
    }

    fn host_with_template() -> FakeHost {
        FakeHost::new().with_templates(
            vec!["local:vztmpl/debian-12-standard_12.7-1_amd64.tar.zst".into()],
            vec![],
        )
    }

    #[test]
    fn test_stage_sequences() {
        assert_eq!(
            Stage::sequence(Mode::Create),
            vec![
                Stage::Init,
                Stage::AllocateContainer,
                Stage::Mount,
                Stage::Start,
                Stage::InstallDependencies,
                Stage::InstallUpdateClient,
                Stage::WriteStartupScript,
                Stage::RegisterService,
                Stage::Done,
            ]
        );
        assert_eq!(
            Stage::sequence(Mode::Repair)[..4],
            [
                Stage::Init,
                Stage::ValidateContainer,
                Stage::EnsureHostDirs,
                Stage::Start
            ]
        );
    }

    #[tokio::test]
    async fn test_create_example_request_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with_template();
        let request = request_in(dir.path(), Mode::Create);
        let profile = get_builtin_profiles().remove(0);

        let report = Orchestrator::new(&host, &host)
            .with_settle_delay(Duration::ZERO)
            .with_container_root(current_owner())
            .run(&request, &profile)
            .await
            .unwrap();

        assert_eq!(report.stages, Stage::sequence(Mode::Create));
        assert_eq!(report.handle.id(), 105);
        assert_eq!(report.handle.state(), ContainerState::Running);
        assert_eq!(report.launch_arguments, vec!["-port=7777", "-multihome=10.0.0.5"]);

        let created = host.created_spec(105).unwrap();
        assert_eq!(created.cores, 2);
        assert_eq!(created.memory_mb, 4096);
        assert_eq!(created.disk_gb, 16);
        assert_eq!(created.address_cidr, "10.0.0.5/24");

        assert_eq!(host.mounts(105).len(), 2);
        assert!(dir.path().join("105/server").is_dir());
        assert!(dir.path().join("105/saves").is_dir());
        let owner = current_owner();
        let saves = std::fs::metadata(dir.path().join("105/saves")).unwrap();
        assert_eq!((saves.uid(), saves.gid()), (owner.uid, owner.gid));
        assert!(host.active_services(105).contains(&report.service_unit));
        assert_eq!(report.service_unit, "abiotic-factor-server.service");
    }

    #[tokio::test]
    async fn test_repair_of_missing_container_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::new();
        let request = request_in(dir.path(), Mode::Repair);
        let profile = get_builtin_profiles().remove(0);

        let err = Orchestrator::new(&host, &host)
            .with_settle_delay(Duration::ZERO)
            .with_container_root(current_owner())
            .run(&request, &profile)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::ValidateContainer));
        assert!(!dir.path().join("105").exists());
        assert!(host.executed(105).is_empty());
        assert!(host.active_services(105).is_empty());
    }

    #[tokio::test]
    async fn test_rerun_converges_to_same_state() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with_template();
        let profile = get_builtin_profiles().remove(0);
        let orchestrator = Orchestrator::new(&host, &host)
            .with_settle_delay(Duration::ZERO)
            .with_container_root(current_owner());

        orchestrator
            .run(&request_in(dir.path(), Mode::Create), &profile)
            .await
            .unwrap();
        let files_once = host.files(105);
        let mounts_once = host.mounts(105);
        let services_once = host.active_services(105);

        let report = orchestrator
            .run(&request_in(dir.path(), Mode::Repair), &profile)
            .await
            .unwrap();

        assert_eq!(report.stages, Stage::sequence(Mode::Repair));
        assert_eq!(host.files(105), files_once);
        assert_eq!(host.mounts(105), mounts_once);
        assert_eq!(host.active_services(105), services_once);
        assert_eq!(host.creations(), 1);
    }

    #[tokio::test]
    async fn test_update_disabled_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with_template();
        let mut request = request_in(dir.path(), Mode::Create);
        request.update_on_start = false;
        let profile = get_builtin_profiles().remove(0);

        let report = Orchestrator::new(&host, &host)
            .with_settle_delay(Duration::ZERO)
            .with_container_root(current_owner())
            .run(&request, &profile)
            .await
            .unwrap();

        assert_eq!(report.stages.last(), Some(&Stage::Done));
        let (script, _) = host.files(105).remove(STARTUP_SCRIPT_PATH).unwrap();
        assert!(script.contains("UPDATE_ON_START=\"${UPDATE_ON_START:-0}\""));
    }

    #[tokio::test]
    async fn test_step_failure_stops_the_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with_template().failing_exec("steamcmd_linux.tar.gz");
        let request = request_in(dir.path(), Mode::Create);
        let profile = get_builtin_profiles().remove(0);

        let err = Orchestrator::new(&host, &host)
            .with_settle_delay(Duration::ZERO)
            .with_container_root(current_owner())
            .run(&request, &profile)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::InstallUpdateClient));
        // No rollback: the container and its mounts stay.
        assert_eq!(host.state(105), ContainerState::Running);
        assert_eq!(host.mounts(105).len(), 2);
        assert!(host.files(105).is_empty());
        assert!(host.active_services(105).is_empty());
    }

    #[tokio::test]
    async fn test_unowned_host_dirs_fail_the_mount_stage() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with_template();
        let request = request_in(dir.path(), Mode::Create);
        let profile = get_builtin_profiles().remove(0);
        let mut foreign = current_owner();
        if foreign.uid == 0 {
            // root may chown anywhere
            return;
        }
        foreign.uid += 1;

        let err = Orchestrator::new(&host, &host)
            .with_settle_delay(Duration::ZERO)
            .with_container_root(foreign)
            .run(&request, &profile)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Mount));
        assert!(host.mounts(105).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with_template();
        let mut request = request_in(dir.path(), Mode::Create);
        request.cpu_cores = 0;
        let profile = get_builtin_profiles().remove(0);

        let err = Orchestrator::new(&host, &host)
            .run(&request, &profile)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Invalid(_)));
        assert_eq!(err.stage(), None);
        assert_eq!(host.creations(), 0);
        assert!(!dir.path().join("105").exists());
    }

    #[tokio::test]
    async fn test_unsafe_save_dir_is_refused_before_anything_runs() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with_template();
        let request = request_in(dir.path(), Mode::Create);
        let mut profile = get_builtin_profiles().remove(0);
        profile.save_dir = "../saves".to_string();

        let err = Orchestrator::new(&host, &host)
            .run(&request, &profile)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Profile(_)));
        assert_eq!(err.stage(), None);
        assert_eq!(host.creations(), 0);
        assert!(host.files(105).is_empty());
    }

    #[tokio::test]
    async fn test_failed_preflight_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with_template().failing_prerequisites();
        let request = request_in(dir.path(), Mode::Create);
        let profile = get_builtin_profiles().remove(0);

        let err = Orchestrator::new(&host, &host)
            .run(&request, &profile)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Init));
        assert_eq!(host.creations(), 0);
    }
}
