// PVE Manager - Handles all Proxmox host operations

use crate::pve::lifecycle::{ContainerCreateSpec, ContainerState};
use async_trait::async_trait;
use base64::Engine;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Tools the provisioner shells out to on the host.
pub const REQUIRED_TOOLS: &[&str] = &["pct", "pvesm", "pveam", "pvesh", "ip"];

#[derive(Error, Debug)]
pub enum PveError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {exit_code}: {detail}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        detail: String,
    },

    #[error("container {0} does not exist")]
    ContainerNotFound(u32),

    #[error("container {0} already exists")]
    ContainerExists(u32),

    #[error("no usable OS template found ({0})")]
    TemplateUnavailable(String),

    #[error("must run as root (current uid {0})")]
    NotRoot(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("unexpected output from {command}: {output}")]
    UnexpectedOutput { command: String, output: String },

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Exit status plus combined stdout/stderr of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty output line, used for one-line diagnostics.
    pub fn last_line(&self) -> &str {
        self.output
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no output")
    }
}

/// Control plane of the virtualization host.
#[async_trait]
pub trait PlatformControl: Send + Sync {
    /// Verify privileges and tooling before anything is mutated.
    async fn check_prerequisites(&self) -> Result<(), PveError>;

    async fn list_storage(&self) -> Result<Vec<String>, PveError>;

    async fn list_bridges(&self) -> Result<Vec<String>, PveError>;

    async fn next_free_id(&self) -> Result<u32, PveError>;

    async fn refresh_templates(&self) -> Result<(), PveError>;

    /// Volume ids of templates already present on `storage`.
    async fn local_templates(&self, storage: &str) -> Result<Vec<String>, PveError>;

    /// File names of system templates offered for download.
    async fn available_templates(&self) -> Result<Vec<String>, PveError>;

    async fn download_template(&self, storage: &str, name: &str) -> Result<(), PveError>;

    async fn container_status(&self, id: u32) -> Result<ContainerState, PveError>;

    async fn create_container(&self, spec: &ContainerCreateSpec) -> Result<(), PveError>;

    async fn start_container(&self, id: u32) -> Result<(), PveError>;

    async fn stop_container(&self, id: u32) -> Result<(), PveError>;

    /// Bind `host_path` into the container at `container_path` using mount slot `mp{slot}`.
    async fn set_mount_point(
        &self,
        id: u32,
        slot: usize,
        host_path: &Path,
        container_path: &str,
    ) -> Result<(), PveError>;
}

/// "Run a shell command inside container N" channel.
#[async_trait]
pub trait ContainerExec: Send + Sync {
    async fn exec(&self, id: u32, command: &str) -> Result<CommandOutput, PveError>;

    /// Write `content` to `path` inside the container, replacing any previous file.
    async fn write_file(
        &self,
        id: u32,
        path: &str,
        content: &str,
        mode: u32,
    ) -> Result<CommandOutput, PveError> {
        self.exec(id, &write_file_command(path, content, mode)).await
    }
}

/// Build a shell command that materializes `content` at `path`.
///
/// Content travels base64-encoded so generated scripts never need escaping.
pub fn write_file_command(path: &str, content: &str, mode: u32) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(content);
    let target = shell_words::quote(path);
    let staging_path = format!("{}.tmp", path);
    let staging = shell_words::quote(&staging_path);
    format!(
        "set -e; mkdir -p \"$(dirname {target})\"; echo '{encoded}' | base64 -d > {staging}; chmod {mode:o} {staging}; mv -f {staging} {target}"
    )
}

/// Host adapter backed by the `pct`/`pvesm`/`pveam`/`pvesh` command line tools.
#[derive(Debug, Default, Clone)]
pub struct PveManager;

impl PveManager {
    pub fn new() -> Self {
        Self
    }

    /// Run `program` to completion. Only `label` is logged, never the arguments.
    async fn run(
        &self,
        label: &str,
        program: &str,
        args: &[String],
    ) -> Result<CommandOutput, PveError> {
        tracing::debug!("Running {}", label);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PveError::Spawn {
                program: program.to_string(),
                source: e,
            })?;

        let (stdout, stderr) = tokio::join!(
            collect_lines(child.stdout.take()),
            collect_lines(child.stderr.take())
        );

        let status = child.wait().await.map_err(|e| PveError::Spawn {
            program: program.to_string(),
            source: e,
        })?;

        let mut output = stdout;
        output.extend(stderr);

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            output: output.join("\n"),
        })
    }

    /// Like `run`, but a non-zero exit becomes an error labelled with `label`.
    ///
    /// The label stands in for the argument list so secrets never reach diagnostics.
    async fn run_checked(
        &self,
        label: &str,
        program: &str,
        args: &[String],
    ) -> Result<CommandOutput, PveError> {
        let output = self.run(label, program, args).await?;
        if !output.success() {
            return Err(PveError::CommandFailed {
                command: label.to_string(),
                exit_code: output.exit_code,
                detail: output.last_line().to_string(),
            });
        }
        Ok(output)
    }

    async fn tool_available(&self, tool: &str) -> bool {
        let probe = format!("command -v {}", tool);
        let args = vec!["-c".to_string(), probe.clone()];
        matches!(self.run(&probe, "sh", &args).await, Ok(out) if out.success())
    }
}

async fn collect_lines<R>(reader: Option<R>) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = Vec::new();
    let Some(reader) = reader else {
        return lines;
    };

    let mut reader = BufReader::new(reader).lines();
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                if !line.is_empty() {
                    tracing::debug!("  | {}", line);
                }
                lines.push(line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Error reading command output: {}", e);
                break;
            }
        }
    }
    lines
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl PlatformControl for PveManager {
    async fn check_prerequisites(&self) -> Result<(), PveError> {
        let uid = self.run_checked("id -u", "id", &strings(&["-u"])).await?;
        let uid = uid.output.trim().to_string();
        if uid != "0" {
            return Err(PveError::NotRoot(uid));
        }

        for tool in REQUIRED_TOOLS {
            if !self.tool_available(tool).await {
                return Err(PveError::MissingTool(tool.to_string()));
            }
        }
        Ok(())
    }

    async fn list_storage(&self) -> Result<Vec<String>, PveError> {
        let out = self
            .run_checked(
                "pvesm status",
                "pvesm",
                &strings(&["status", "--content", "rootdir"]),
            )
            .await?;
        Ok(parse_storage_status(&out.output))
    }

    async fn list_bridges(&self) -> Result<Vec<String>, PveError> {
        let out = self
            .run_checked(
                "ip link",
                "ip",
                &strings(&["-br", "link", "show", "type", "bridge"]),
            )
            .await?;
        Ok(parse_bridges(&out.output))
    }

    async fn next_free_id(&self) -> Result<u32, PveError> {
        let out = self
            .run_checked(
                "pvesh get /cluster/nextid",
                "pvesh",
                &strings(&["get", "/cluster/nextid"]),
            )
            .await?;
        parse_next_id(&out.output).ok_or_else(|| PveError::UnexpectedOutput {
            command: "pvesh get /cluster/nextid".to_string(),
            output: out.output.clone(),
        })
    }

    async fn refresh_templates(&self) -> Result<(), PveError> {
        self.run_checked("pveam update", "pveam", &strings(&["update"]))
            .await?;
        Ok(())
    }

    async fn local_templates(&self, storage: &str) -> Result<Vec<String>, PveError> {
        let out = self
            .run_checked("pveam list", "pveam", &strings(&["list", storage]))
            .await?;
        Ok(parse_pveam_list(&out.output))
    }

    async fn available_templates(&self) -> Result<Vec<String>, PveError> {
        let out = self
            .run_checked(
                "pveam available",
                "pveam",
                &strings(&["available", "--section", "system"]),
            )
            .await?;
        Ok(parse_pveam_available(&out.output))
    }

    async fn download_template(&self, storage: &str, name: &str) -> Result<(), PveError> {
        tracing::info!("Downloading template {} to {}", name, storage);
        self.run_checked("pveam download", "pveam", &strings(&["download", storage, name]))
            .await?;
        Ok(())
    }

    async fn container_status(&self, id: u32) -> Result<ContainerState, PveError> {
        let label = format!("pct status {}", id);
        let out = self
            .run(&label, "pct", &["status".to_string(), id.to_string()])
            .await?;
        if !out.success() {
            if out.output.contains("does not exist") {
                return Ok(ContainerState::NotCreated);
            }
            return Err(PveError::CommandFailed {
                command: format!("pct status {}", id),
                exit_code: out.exit_code,
                detail: out.last_line().to_string(),
            });
        }
        parse_pct_status(&out.output).ok_or_else(|| PveError::UnexpectedOutput {
            command: format!("pct status {}", id),
            output: out.output.clone(),
        })
    }

    async fn create_container(&self, spec: &ContainerCreateSpec) -> Result<(), PveError> {
        tracing::info!(
            "Creating container {} ({}) from {}",
            spec.id,
            spec.hostname,
            spec.template
        );
        self.run_checked(&format!("pct create {}", spec.id), "pct", &spec.pct_args())
            .await?;
        Ok(())
    }

    async fn start_container(&self, id: u32) -> Result<(), PveError> {
        self.run_checked(
            &format!("pct start {}", id),
            "pct",
            &["start".to_string(), id.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn stop_container(&self, id: u32) -> Result<(), PveError> {
        self.run_checked(
            &format!("pct stop {}", id),
            "pct",
            &["stop".to_string(), id.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn set_mount_point(
        &self,
        id: u32,
        slot: usize,
        host_path: &Path,
        container_path: &str,
    ) -> Result<(), PveError> {
        let value = format!("{},mp={}", host_path.display(), container_path);
        tracing::info!("Binding mp{} on container {}: {}", slot, id, value);
        self.run_checked(
            &format!("pct set {} -mp{}", id, slot),
            "pct",
            &[
                "set".to_string(),
                id.to_string(),
                format!("-mp{}", slot),
                value,
            ],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ContainerExec for PveManager {
    async fn exec(&self, id: u32, command: &str) -> Result<CommandOutput, PveError> {
        let args = vec![
            "exec".to_string(),
            id.to_string(),
            "--".to_string(),
            "bash".to_string(),
            "-lc".to_string(),
            command.to_string(),
        ];
        let output = self.run(&format!("pct exec {}", id), "pct", &args).await?;
        tracing::debug!("Exec in {} finished with exit code: {}", id, output.exit_code);
        Ok(output)
    }
}

/// Active storages from `pvesm status` output.
pub fn parse_storage_status(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            match cols.as_slice() {
                [name, _kind, status, ..] if *name != "Name" && *status == "active" => {
                    Some(name.to_string())
                }
                _ => None,
            }
        })
        .collect()
}

/// Bridge names from `ip -br link show type bridge` output.
pub fn parse_bridges(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(|name| name.split('@').next().unwrap_or(name).to_string())
        .collect()
}

pub fn parse_next_id(output: &str) -> Option<u32> {
    output.trim().trim_matches('"').parse().ok()
}

pub fn parse_pct_status(output: &str) -> Option<ContainerState> {
    let status = output
        .lines()
        .find_map(|line| line.trim().strip_prefix("status:"))?
        .trim();
    match status {
        "running" => Some(ContainerState::Running),
        "stopped" => Some(ContainerState::Stopped),
        _ => None,
    }
}

/// Volume ids from `pveam list <storage>` output.
pub fn parse_pveam_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|volid| volid.contains(":vztmpl/"))
        .map(str::to_string)
        .collect()
}

/// Template file names from `pveam available --section system` output.
pub fn parse_pveam_available(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            match (cols.next(), cols.next()) {
                (Some("system"), Some(name)) => Some(name.to_string()),
                _ => None,
            }
        })
        .collect()
}
