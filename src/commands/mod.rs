pub mod games;
pub mod preflight;
pub mod probe;
pub mod provision;
pub mod records;
pub mod render;

use crate::cli::{Cli, Commands};
use crate::games::ProfileError;
use crate::provision::ProvisionError;
use crate::pve::PveError;
use records::RecordError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Platform(#[from] PveError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("{0} is required when --config is not given")]
    MissingArgument(&'static str),

    #[error("saved request is for container {found}, not {requested}")]
    RecordMismatch { requested: u32, found: u32 },

    #[error("{0} preflight check(s) failed")]
    Preflight(usize),

    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

pub async fn dispatch(cli: Cli) -> Result<(), CommandError> {
    match cli.cmd {
        Commands::Create(args) => provision::create(args).await,
        Commands::Repair(args) => provision::repair(args).await,
        Commands::Probe => probe::probe().await,
        Commands::Render(args) => render::render(args),
        Commands::Preflight => preflight::preflight().await,
        Commands::Games => games::games(),
    }
}
