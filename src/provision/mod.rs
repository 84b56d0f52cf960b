mod driver;
mod error;
mod mounts;
mod request;
mod script;
mod steps;
mod text;
mod unit;

#[cfg(test)]
pub(crate) mod testing;

pub use driver::{Orchestrator, ProvisionReport, Stage};
pub use error::ProvisionError;
pub use mounts::{mounts_owned_by, HostOwner, MountManager, MountSpec, SAVES_MOUNT, SERVER_MOUNT};
pub use request::{
    Cidr, Mode, OptionalPorts, ProvisionRequest, ValidationError, DEFAULT_GAME, DEFAULT_HOST_ROOT,
};
pub use script::{
    launch_arguments, RetryPolicy, ScriptLayout, ScriptStep, StartupScript, STARTUP_SCRIPT_PATH,
};
pub use steps::Provisioner;
pub use unit::{RestartPolicy, ServiceUnitSpec};
