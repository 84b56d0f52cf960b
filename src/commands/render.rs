use crate::cli::{Artifact, RenderArgs};
use crate::commands::records;
use crate::commands::CommandError;
use crate::games::{GameProfile, GamesManager};
use crate::provision::{ProvisionRequest, ServiceUnitSpec, StartupScript};

/// Print what would be written into the container without touching the host.
pub fn render(args: RenderArgs) -> Result<(), CommandError> {
    let request = records::load_request_file(&args.config)?;
    request
        .validate()
        .map_err(|e| CommandError::Provision(e.into()))?;
    let profile = GamesManager::load()?.get_profile(&request.game)?;
    profile.check_paths()?;
    print!("{}", render_artifact(&request, &profile, args.what));
    Ok(())
}

pub fn render_artifact(request: &ProvisionRequest, profile: &GameProfile, what: Artifact) -> String {
    match what {
        Artifact::Script => StartupScript::build(request, profile).render(),
        Artifact::Unit => ServiceUnitSpec::build(request, profile).render(),
    }
}
