// Startup script - update with retry, save link, executable guard, launch

use crate::games::GameProfile;
use crate::provision::mounts::{SAVES_MOUNT, SERVER_MOUNT};
use crate::provision::request::ProvisionRequest;
use crate::provision::text::TextBuilder;
use std::time::Duration;

pub const STARTUP_SCRIPT_PATH: &str = "/usr/local/bin/start-gameserver.sh";
pub const STEAMCMD_DIR: &str = "/opt/steamcmd";
pub const STEAMCMD_PATH: &str = "/opt/steamcmd/steamcmd.sh";
pub const UPDATE_ENV_VAR: &str = "UPDATE_ON_START";

const SEARCH_DEPTH: u32 = 6;

/// Linear backoff: after failed attempt `n` wait `n * backoff_step_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            backoff_step_secs: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based); `None` once attempts are exhausted.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        Some(Duration::from_secs(
            self.backoff_step_secs * u64::from(attempt),
        ))
    }

    /// Every delay a run that never succeeds will wait through.
    pub fn delays(&self) -> Vec<Duration> {
        (1..self.max_attempts)
            .filter_map(|attempt| self.delay_after(attempt))
            .collect()
    }
}

/// Where the script looks for things inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLayout {
    pub install_dir: String,
    pub save_mount: String,
    pub update_client: String,
}

impl Default for ScriptLayout {
    fn default() -> Self {
        Self {
            install_dir: SERVER_MOUNT.to_string(),
            save_mount: SAVES_MOUNT.to_string(),
            update_client: STEAMCMD_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStep {
    pub client: String,
    pub install_dir: String,
    pub app_id: u32,
    /// Half-downloaded state cleared before every attempt.
    pub scratch_dirs: Vec<String>,
    pub retry: RetryPolicy,
}

impl UpdateStep {
    pub fn new(client: &str, install_dir: &str, app_id: u32) -> Self {
        let install = install_dir.trim_end_matches('/');
        Self {
            client: client.to_string(),
            install_dir: install.to_string(),
            app_id,
            scratch_dirs: vec![
                format!("{}/steamapps/downloading", install),
                format!("{}/steamapps/temp", install),
            ],
            retry: RetryPolicy::default(),
        }
    }

    pub fn command(&self) -> Vec<String> {
        vec![
            self.client.clone(),
            "+@sSteamCmdForcePlatformType".to_string(),
            "windows".to_string(),
            "+force_install_dir".to_string(),
            self.install_dir.clone(),
            "+login".to_string(),
            "anonymous".to_string(),
            "+app_update".to_string(),
            self.app_id.to_string(),
            "validate".to_string(),
            "+quit".to_string(),
        ]
    }

    fn render(&self, b: &mut TextBuilder) {
        let max = self.retry.max_attempts;
        let backoff: Vec<String> = self
            .retry
            .delays()
            .iter()
            .map(|d| d.as_secs().to_string())
            .collect();

        b.block("update_server() {", "}", |b| {
            b.line("local attempt delay");
            b.line(format!("local -a backoff=({})", backoff.join(" ")));
            b.block(
                format!("for ((attempt = 1; attempt <= {max}; attempt++)); do"),
                "done",
                |b| {
                    b.line(format!("rm -rf {}", shell_words::join(&self.scratch_dirs)));
                    b.line(format!(
                        "echo \"Updating server files (attempt ${{attempt}}/{max})\""
                    ));
                    b.block(
                        format!("if {}; then", shell_words::join(self.command())),
                        "fi",
                        |b| {
                            b.line("return 0");
                        },
                    );
                    b.block(format!("if (( attempt < {max} )); then"), "fi", |b| {
                        b.line("delay=${backoff[attempt - 1]}");
                        b.line(
                            "echo \"Update attempt ${attempt} failed, retrying in ${delay}s\" >&2",
                        );
                        b.line("sleep \"$delay\"");
                    });
                },
            );
            b.line(format!("echo \"Update failed after {max} attempts\" >&2"));
            b.line("return 1");
        });
        b.blank();
        b.line("if update_enabled; then");
        b.indented(|b| {
            b.line("update_server || exit 1");
        });
        b.line("else");
        b.indented(|b| {
            b.line(format!(
                "echo \"{UPDATE_ENV_VAR}=${{{UPDATE_ENV_VAR}}}, skipping update\""
            ));
        });
        b.line("fi");
    }
}

/// Replace the in-tree save directory with a symlink to the persistent mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveLinkStep {
    pub link_path: String,
    pub target: String,
}

impl SaveLinkStep {
    pub fn parent(&self) -> &str {
        match self.link_path.trim_end_matches('/').rsplit_once('/') {
            Some(("", _)) => "/",
            Some((parent, _)) => parent,
            None => ".",
        }
    }

    fn render(&self, b: &mut TextBuilder) {
        let link = shell_words::quote(self.link_path.trim_end_matches('/'));
        let target = shell_words::quote(&self.target);
        b.line(format!(
            "mkdir -p {} {}",
            shell_words::quote(self.parent()),
            target
        ));
        b.line(format!("rm -rf {}", link));
        b.line(format!("ln -s {} {}", target, link));
    }
}

/// Abort with a listing of candidates when the server binary is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableGuard {
    pub executable: String,
    pub search_root: String,
    pub file_name: String,
    pub max_depth: u32,
}

impl ExecutableGuard {
    fn render(&self, b: &mut TextBuilder) {
        let exe = shell_words::quote(&self.executable);
        b.block(format!("if [[ ! -f {} ]]; then", exe), "fi", |b| {
            b.line(format!(
                "echo {} >&2",
                shell_words::quote(&format!("Server executable not found: {}", self.executable))
            ));
            b.line(format!(
                "echo {} >&2",
                shell_words::quote(&format!(
                    "Files named {} under {}:",
                    self.file_name, self.search_root
                ))
            ));
            b.line(format!(
                "find {} -maxdepth {} -iname {} >&2 || true",
                shell_words::quote(&self.search_root),
                self.max_depth,
                shell_words::quote(&self.file_name)
            ));
            b.line("exit 1");
        });
    }
}

/// Final step: replace the shell with the server under Wine inside a virtual display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchStep {
    pub wrapper: Vec<String>,
    pub executable: String,
    pub arguments: Vec<String>,
}

impl LaunchStep {
    pub fn command_line(&self) -> Vec<String> {
        self.wrapper
            .iter()
            .cloned()
            .chain(std::iter::once(self.executable.clone()))
            .chain(self.arguments.iter().cloned())
            .collect()
    }

    fn working_dir(&self) -> &str {
        self.executable
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .filter(|dir| !dir.is_empty())
            .unwrap_or("/")
    }

    fn render(&self, b: &mut TextBuilder) {
        b.line(format!("cd {}", shell_words::quote(self.working_dir())));
        b.line(format!("exec {}", shell_words::join(self.command_line())));
    }
}

/// Server arguments: bind port and address always, query/beacon ports only when opted in.
pub fn launch_arguments(request: &ProvisionRequest, profile: &GameProfile) -> Vec<String> {
    let mut args = vec![
        format!("-port={}", request.server_port),
        format!("-multihome={}", request.server_bind_address),
    ];
    if let Some(ports) = request.optional_ports {
        args.push(format!("-queryport={}", ports.query_port));
        args.push(format!("-beaconport={}", ports.beacon_port));
    }
    args.extend(profile.extra_args.iter().cloned());
    args
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Update(UpdateStep),
    LinkSaves(SaveLinkStep),
    RequireExecutable(ExecutableGuard),
    Launch(LaunchStep),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupScript {
    pub title: String,
    /// Baked-in default; `UPDATE_ON_START` in the environment wins at runtime.
    pub update_on_start: bool,
    pub steps: Vec<ScriptStep>,
}

impl StartupScript {
    pub fn build(request: &ProvisionRequest, profile: &GameProfile) -> Self {
        Self::build_with(request, profile, &ScriptLayout::default())
    }

    pub fn build_with(
        request: &ProvisionRequest,
        profile: &GameProfile,
        layout: &ScriptLayout,
    ) -> Self {
        let install_dir = layout.install_dir.as_str();
        let executable = profile.executable_path(install_dir);

        Self {
            title: profile.name.clone(),
            update_on_start: request.update_on_start,
            steps: vec![
                ScriptStep::Update(UpdateStep::new(
                    &layout.update_client,
                    install_dir,
                    profile.steam_app_id,
                )),
                ScriptStep::LinkSaves(SaveLinkStep {
                    link_path: profile.save_path(install_dir),
                    target: layout.save_mount.clone(),
                }),
                ScriptStep::RequireExecutable(ExecutableGuard {
                    executable: executable.clone(),
                    search_root: install_dir.to_string(),
                    file_name: profile.executable_name().to_string(),
                    max_depth: SEARCH_DEPTH,
                }),
                ScriptStep::Launch(LaunchStep {
                    wrapper: vec![
                        "xvfb-run".to_string(),
                        "--auto-servernum".to_string(),
                        "wine".to_string(),
                    ],
                    executable,
                    arguments: launch_arguments(request, profile),
                }),
            ],
        }
    }

    pub fn launch(&self) -> Option<&LaunchStep> {
        self.steps.iter().find_map(|step| match step {
            ScriptStep::Launch(launch) => Some(launch),
            _ => None,
        })
    }

    pub fn render(&self) -> String {
        let mut b = TextBuilder::new();
        b.line("#!/usr/bin/env bash");
        b.line(format!(
            "# {} startup script, regenerated on every provisioning run.",
            self.title
        ));
        b.line("set -uo pipefail");
        b.blank();
        b.line(format!(
            "{UPDATE_ENV_VAR}=\"${{{UPDATE_ENV_VAR}:-{}}}\"",
            u8::from(self.update_on_start)
        ));
        b.line("export WINEDEBUG=\"${WINEDEBUG:--all}\"");
        b.blank();
        b.block("update_enabled() {", "}", |b| {
            b.block(format!("case \"${{{UPDATE_ENV_VAR},,}}\" in"), "esac", |b| {
                b.line("1|true|yes|on) return 0 ;;");
                b.line("*) return 1 ;;");
            });
        });

        for step in &self.steps {
            b.blank();
            match step {
                ScriptStep::Update(update) => update.render(&mut b),
                ScriptStep::LinkSaves(link) => link.render(&mut b),
                ScriptStep::RequireExecutable(guard) => guard.render(&mut b),
                ScriptStep::Launch(launch) => launch.render(&mut b),
            }
        }
        b.finish()
    }
}
