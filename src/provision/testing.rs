// Test host - in-memory stand-in for the Proxmox tools

use crate::provision::mounts::HostOwner;
use crate::provision::request::{Mode, ProvisionRequest, DEFAULT_GAME, DEFAULT_HOST_ROOT};
use crate::pve::{
    CommandOutput, ContainerCreateSpec, ContainerExec, ContainerState, PlatformControl, PveError,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The worked example: container 105, 2 cores, 4 GiB, 16 GB, 10.0.0.5:7777.
pub fn sample_request() -> ProvisionRequest {
    ProvisionRequest {
        mode: Mode::Create,
        container_id: 105,
        container_name: "abiotic".to_string(),
        storage_pool: "local-lvm".to_string(),
        network_bridge: "vmbr0".to_string(),
        cpu_cores: 2,
        memory_mb: 4096,
        disk_gb: 16,
        static_address_cidr: "10.0.0.5/24".parse().unwrap(),
        gateway: "10.0.0.1".parse().unwrap(),
        unprivileged: true,
        server_bind_address: "10.0.0.5".parse().unwrap(),
        server_port: 7777,
        optional_ports: None,
        update_on_start: true,
        restart_interval_seconds: 10,
        game: DEFAULT_GAME.to_string(),
        host_root: PathBuf::from(DEFAULT_HOST_ROOT),
        template: None,
    }
}

/// Identity of the test process, so host directories can be chowned without root.
pub fn current_owner() -> HostOwner {
    use std::os::unix::fs::MetadataExt;

    let dir = tempfile::tempdir().unwrap();
    let meta = std::fs::metadata(dir.path()).unwrap();
    HostOwner {
        uid: meta.uid(),
        gid: meta.gid(),
    }
}

#[derive(Default)]
struct Container {
    state: Option<ContainerState>,
    spec: Option<ContainerCreateSpec>,
    mounts: BTreeMap<usize, (PathBuf, String)>,
    files: BTreeMap<String, (String, u32)>,
    services: BTreeSet<String>,
    executed: Vec<String>,
}

#[derive(Default)]
struct State {
    containers: HashMap<u32, Container>,
    storage: Vec<String>,
    bridges: Vec<String>,
    next_id: Option<u32>,
    local_templates: Vec<String>,
    available_templates: Vec<String>,
    downloads: Vec<String>,
    creations: usize,
    starts: usize,
    fail_exec: Option<String>,
    fail_stop: bool,
    fail_prerequisites: bool,
}

pub struct FakeHost {
    state: Mutex<State>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                storage: vec!["local".to_string(), "local-lvm".to_string()],
                bridges: vec!["vmbr0".to_string()],
                next_id: Some(105),
                available_templates: vec!["debian-12-standard_12.7-1_amd64.tar.zst".to_string()],
                ..State::default()
            }),
        }
    }

    fn with(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_container(self, id: u32, state: ContainerState) -> Self {
        self.with(|s| s.containers.entry(id).or_default().state = Some(state))
    }

    pub fn with_inventory(
        self,
        storage: Vec<String>,
        bridges: Vec<String>,
        next_id: Option<u32>,
    ) -> Self {
        self.with(|s| {
            s.storage = storage;
            s.bridges = bridges;
            s.next_id = next_id;
        })
    }

    pub fn with_templates(self, local: Vec<String>, available: Vec<String>) -> Self {
        self.with(|s| {
            s.local_templates = local;
            s.available_templates = available;
        })
    }

    /// Any exec whose command contains `needle` exits 100.
    pub fn failing_exec(self, needle: &str) -> Self {
        self.with(|s| s.fail_exec = Some(needle.to_string()))
    }

    pub fn failing_stop(self) -> Self {
        self.with(|s| s.fail_stop = true)
    }

    pub fn failing_prerequisites(self) -> Self {
        self.with(|s| s.fail_prerequisites = true)
    }

    pub fn creations(&self) -> usize {
        self.state.lock().unwrap().creations
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn downloads(&self) -> Vec<String> {
        self.state.lock().unwrap().downloads.clone()
    }

    pub fn state(&self, id: u32) -> ContainerState {
        self.read(id, |c| c.state).flatten().unwrap_or(ContainerState::NotCreated)
    }

    pub fn created_spec(&self, id: u32) -> Option<ContainerCreateSpec> {
        self.read(id, |c| c.spec.clone()).flatten()
    }

    pub fn mounts(&self, id: u32) -> Vec<(usize, PathBuf, String)> {
        self.read(id, |c| {
            c.mounts
                .iter()
                .map(|(slot, (host, guest))| (*slot, host.clone(), guest.clone()))
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn files(&self, id: u32) -> BTreeMap<String, (String, u32)> {
        self.read(id, |c| c.files.clone()).unwrap_or_default()
    }

    pub fn active_services(&self, id: u32) -> BTreeSet<String> {
        self.read(id, |c| c.services.clone()).unwrap_or_default()
    }

    pub fn executed(&self, id: u32) -> Vec<String> {
        self.read(id, |c| c.executed.clone()).unwrap_or_default()
    }

    fn read<T>(&self, id: u32, f: impl FnOnce(&Container) -> T) -> Option<T> {
        self.state.lock().unwrap().containers.get(&id).map(f)
    }
}

/// Shared exec bookkeeping; returns the failure to report, if any.
fn begin_exec(state: &mut State, id: u32, command: &str) -> Option<CommandOutput> {
    let fail = state
        .fail_exec
        .as_deref()
        .is_some_and(|needle| command.contains(needle));
    let container = state.containers.entry(id).or_default();
    container.executed.push(command.to_string());

    if container.state != Some(ContainerState::Running) {
        return Some(CommandOutput {
            exit_code: 255,
            output: format!("container {} is not running", id),
        });
    }
    if fail {
        return Some(CommandOutput {
            exit_code: 100,
            output: "E: simulated failure".to_string(),
        });
    }
    None
}

fn ok() -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        output: String::new(),
    }
}

#[async_trait]
impl PlatformControl for FakeHost {
    async fn check_prerequisites(&self) -> Result<(), PveError> {
        if self.state.lock().unwrap().fail_prerequisites {
            return Err(PveError::MissingTool("pct".to_string()));
        }
        Ok(())
    }

    async fn list_storage(&self) -> Result<Vec<String>, PveError> {
        Ok(self.state.lock().unwrap().storage.clone())
    }

    async fn list_bridges(&self) -> Result<Vec<String>, PveError> {
        Ok(self.state.lock().unwrap().bridges.clone())
    }

    async fn next_free_id(&self) -> Result<u32, PveError> {
        self.state
            .lock()
            .unwrap()
            .next_id
            .ok_or_else(|| PveError::UnexpectedOutput {
                command: "pvesh get /cluster/nextid".to_string(),
                output: String::new(),
            })
    }

    async fn refresh_templates(&self) -> Result<(), PveError> {
        Ok(())
    }

    async fn local_templates(&self, _storage: &str) -> Result<Vec<String>, PveError> {
        Ok(self.state.lock().unwrap().local_templates.clone())
    }

    async fn available_templates(&self) -> Result<Vec<String>, PveError> {
        Ok(self.state.lock().unwrap().available_templates.clone())
    }

    async fn download_template(&self, storage: &str, name: &str) -> Result<(), PveError> {
        let mut state = self.state.lock().unwrap();
        state.downloads.push(name.to_string());
        state
            .local_templates
            .push(format!("{}:vztmpl/{}", storage, name));
        Ok(())
    }

    async fn container_status(&self, id: u32) -> Result<ContainerState, PveError> {
        Ok(self.state(id))
    }

    async fn create_container(&self, spec: &ContainerCreateSpec) -> Result<(), PveError> {
        let mut state = self.state.lock().unwrap();
        let container = state.containers.entry(spec.id).or_default();
        if container.state.is_some() {
            return Err(PveError::CommandFailed {
                command: format!("pct create {}", spec.id),
                exit_code: 255,
                detail: "CT already exists".to_string(),
            });
        }
        container.state = Some(ContainerState::Stopped);
        container.spec = Some(spec.clone());
        state.creations += 1;
        Ok(())
    }

    async fn start_container(&self, id: u32) -> Result<(), PveError> {
        let mut state = self.state.lock().unwrap();
        match state.containers.get_mut(&id) {
            Some(c) if c.state.is_some() => c.state = Some(ContainerState::Running),
            _ => return Err(PveError::ContainerNotFound(id)),
        }
        state.starts += 1;
        Ok(())
    }

    async fn stop_container(&self, id: u32) -> Result<(), PveError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_stop {
            return Err(PveError::CommandFailed {
                command: format!("pct stop {}", id),
                exit_code: 2,
                detail: "simulated".to_string(),
            });
        }
        match state.containers.get_mut(&id) {
            Some(c) if c.state.is_some() => c.state = Some(ContainerState::Stopped),
            _ => return Err(PveError::ContainerNotFound(id)),
        }
        Ok(())
    }

    async fn set_mount_point(
        &self,
        id: u32,
        slot: usize,
        host_path: &Path,
        container_path: &str,
    ) -> Result<(), PveError> {
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(&id)
            .ok_or(PveError::ContainerNotFound(id))?;
        container
            .mounts
            .insert(slot, (host_path.to_path_buf(), container_path.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ContainerExec for FakeHost {
    async fn exec(&self, id: u32, command: &str) -> Result<CommandOutput, PveError> {
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = begin_exec(&mut state, id, command) {
            return Ok(failure);
        }

        if let Some(rest) = command.split("systemctl restart ").nth(1) {
            if let Some(unit) = rest.split_whitespace().next() {
                if let Some(c) = state.containers.get_mut(&id) {
                    c.services.insert(unit.to_string());
                }
            }
        }
        Ok(ok())
    }

    async fn write_file(
        &self,
        id: u32,
        path: &str,
        content: &str,
        mode: u32,
    ) -> Result<CommandOutput, PveError> {
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = begin_exec(&mut state, id, &format!("write {}", path)) {
            return Ok(failure);
        }
        if let Some(c) = state.containers.get_mut(&id) {
            c.files.insert(path.to_string(), (content.to_string(), mode));
        }
        Ok(ok())
    }
}
