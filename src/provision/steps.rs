// Provisioner - idempotent in-container install sequence

use crate::games::GameProfile;
use crate::provision::driver::Stage;
use crate::provision::error::ProvisionError;
use crate::provision::request::ProvisionRequest;
use crate::provision::script::{StartupScript, STARTUP_SCRIPT_PATH, STEAMCMD_DIR, STEAMCMD_PATH};
use crate::provision::unit::ServiceUnitSpec;
use crate::pve::{CommandOutput, ContainerExec, ContainerHandle};

pub const PACKAGES: &[&str] = &[
    "wine",
    "wine32",
    "wine64",
    "xvfb",
    "xauth",
    "lib32gcc-s1",
    "ca-certificates",
    "curl",
    "tar",
    "tmux",
];

pub const STEAMCMD_URL: &str =
    "https://steamcdn-a.akamaihd.net/client/installer/steamcmd_linux.tar.gz";

pub fn dependency_command() -> String {
    format!(
        "set -e; export DEBIAN_FRONTEND=noninteractive; \
         dpkg --add-architecture i386; \
         apt-get update; \
         apt-get install -y --no-install-recommends {}",
        PACKAGES.join(" ")
    )
}

/// Download with curl's own bounded retry, unpack, and let SteamCMD self-update once.
///
/// The first `+quit` run frequently exits non-zero after self-updating, so its status is ignored.
pub fn update_client_command() -> String {
    format!(
        "set -e; mkdir -p {dir}; \
         curl -fsSL --retry 5 --retry-delay 5 -o /tmp/steamcmd_linux.tar.gz {url}; \
         tar -xzf /tmp/steamcmd_linux.tar.gz -C {dir}; \
         rm -f /tmp/steamcmd_linux.tar.gz; \
         chmod +x {exe}; \
         {exe} +quit || true",
        dir = STEAMCMD_DIR,
        url = STEAMCMD_URL,
        exe = STEAMCMD_PATH,
    )
}

pub struct Provisioner<'a> {
    exec: &'a dyn ContainerExec,
    request: &'a ProvisionRequest,
    profile: &'a GameProfile,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        exec: &'a dyn ContainerExec,
        request: &'a ProvisionRequest,
        profile: &'a GameProfile,
    ) -> Self {
        Self {
            exec,
            request,
            profile,
        }
    }

    pub async fn install_dependencies(&self, handle: &ContainerHandle) -> Result<(), ProvisionError> {
        tracing::info!("Installing Wine, Xvfb and SteamCMD prerequisites");
        self.run(handle, Stage::InstallDependencies, &dependency_command())
            .await?;
        Ok(())
    }

    pub async fn install_update_client(&self, handle: &ContainerHandle) -> Result<(), ProvisionError> {
        tracing::info!("Installing SteamCMD into {}", STEAMCMD_DIR);
        self.run(handle, Stage::InstallUpdateClient, &update_client_command())
            .await?;
        Ok(())
    }

    pub async fn write_startup_script(
        &self,
        handle: &ContainerHandle,
    ) -> Result<StartupScript, ProvisionError> {
        let script = StartupScript::build(self.request, self.profile);
        tracing::info!("Writing startup script {}", STARTUP_SCRIPT_PATH);
        let output = self
            .exec
            .write_file(handle.id(), STARTUP_SCRIPT_PATH, &script.render(), 0o755)
            .await
            .map_err(ProvisionError::platform(Stage::WriteStartupScript))?;
        check(Stage::WriteStartupScript, output)?;
        Ok(script)
    }

    pub async fn register_service(
        &self,
        handle: &ContainerHandle,
    ) -> Result<ServiceUnitSpec, ProvisionError> {
        let unit = ServiceUnitSpec::build(self.request, self.profile);
        tracing::info!("Registering service {}", unit.unit_file_name());
        let output = self
            .exec
            .write_file(handle.id(), &unit.unit_path(), &unit.render(), 0o644)
            .await
            .map_err(ProvisionError::platform(Stage::RegisterService))?;
        check(Stage::RegisterService, output)?;

        self.run(handle, Stage::RegisterService, &unit.activation_command())
            .await?;
        Ok(unit)
    }

    async fn run(
        &self,
        handle: &ContainerHandle,
        stage: Stage,
        command: &str,
    ) -> Result<CommandOutput, ProvisionError> {
        let output = self
            .exec
            .exec(handle.id(), command)
            .await
            .map_err(ProvisionError::platform(stage))?;
        check(stage, output)
    }
}

fn check(stage: Stage, output: CommandOutput) -> Result<CommandOutput, ProvisionError> {
    if output.success() {
        return Ok(output);
    }
    tracing::error!("{} output:\n{}", stage, output.output);
    Err(ProvisionError::Command {
        stage,
        exit_code: output.exit_code,
        detail: output.last_line().to_string(),
    })
}
