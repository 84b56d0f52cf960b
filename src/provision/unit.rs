// Service unit - systemd definition for the game server process

use crate::games::GameProfile;
use crate::provision::request::ProvisionRequest;
use crate::provision::script::{STARTUP_SCRIPT_PATH, UPDATE_ENV_VAR};
use crate::provision::mounts::SERVER_MOUNT;
use crate::provision::text::TextBuilder;
use std::collections::BTreeMap;
use std::fmt;

pub const UNIT_DIR: &str = "/etc/systemd/system";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Always,
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::Always => write!(f, "always"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnitSpec {
    pub name: String,
    pub description: String,
    pub executable_path: String,
    pub working_directory: String,
    pub environment: BTreeMap<String, String>,
    pub restart_policy: RestartPolicy,
    pub restart_delay_seconds: u32,
    pub shutdown_signal: String,
    pub shutdown_timeout_seconds: u32,
}

impl ServiceUnitSpec {
    pub fn build(request: &ProvisionRequest, profile: &GameProfile) -> Self {
        let mut environment = BTreeMap::new();
        environment.insert(
            UPDATE_ENV_VAR.to_string(),
            u8::from(request.update_on_start).to_string(),
        );

        Self {
            name: profile.service_name(),
            description: format!("{} dedicated server", profile.name),
            executable_path: STARTUP_SCRIPT_PATH.to_string(),
            working_directory: SERVER_MOUNT.to_string(),
            environment,
            restart_policy: RestartPolicy::Always,
            restart_delay_seconds: request.restart_interval_seconds,
            shutdown_signal: profile.shutdown_signal.clone(),
            shutdown_timeout_seconds: profile.shutdown_timeout_seconds,
        }
    }

    pub fn unit_file_name(&self) -> String {
        format!("{}.service", self.name)
    }

    pub fn unit_path(&self) -> String {
        format!("{}/{}", UNIT_DIR, self.unit_file_name())
    }

    pub fn render(&self) -> String {
        let mut b = TextBuilder::new();
        b.section(
            "Unit",
            [
                ("Description", self.description.clone()),
                ("Wants", "network-online.target".to_string()),
                ("After", "network-online.target".to_string()),
            ],
        );
        b.section(
            "Service",
            [
                ("Type", "simple".to_string()),
                ("WorkingDirectory", self.working_directory.clone()),
            ]
            .into_iter()
            .chain(
                self.environment
                    .iter()
                    .map(|(k, v)| ("Environment", format!("\"{}={}\"", k, v))),
            )
            .chain([
                ("ExecStart", self.executable_path.clone()),
                ("Restart", self.restart_policy.to_string()),
                ("RestartSec", self.restart_delay_seconds.to_string()),
                ("KillSignal", self.shutdown_signal.clone()),
                ("TimeoutStopSec", self.shutdown_timeout_seconds.to_string()),
            ]),
        );
        b.section("Install", [("WantedBy", "multi-user.target".to_string())]);
        b.finish()
    }

    /// Reload, enable at boot and (re)start; safe to repeat.
    pub fn activation_command(&self) -> String {
        let unit = self.unit_file_name();
        format!(
            "systemctl daemon-reload && systemctl enable {unit} && systemctl restart {unit}"
        )
    }
}
