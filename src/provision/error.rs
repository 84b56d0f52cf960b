use crate::games::ProfileError;
use crate::provision::driver::Stage;
use crate::provision::request::ValidationError;
use crate::pve::PveError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("invalid request: {0}")]
    Invalid(#[from] ValidationError),

    #[error("invalid game profile: {0}")]
    Profile(#[from] ProfileError),

    #[error("{stage} failed: {source}")]
    Platform {
        stage: Stage,
        #[source]
        source: PveError,
    },

    #[error("{stage} failed: command exited with status {exit_code}: {detail}")]
    Command {
        stage: Stage,
        exit_code: i32,
        detail: String,
    },
}

impl ProvisionError {
    pub fn platform(stage: Stage) -> impl FnOnce(PveError) -> Self {
        move |source| ProvisionError::Platform { stage, source }
    }

    /// Stage that failed; `None` for requests rejected before anything ran.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ProvisionError::Invalid(_) | ProvisionError::Profile(_) => None,
            ProvisionError::Platform { stage, .. } | ProvisionError::Command { stage, .. } => {
                Some(*stage)
            }
        }
    }
}
