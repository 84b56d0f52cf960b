mod lifecycle;
mod manager;
mod probe;

pub use lifecycle::{
    ContainerCreateSpec, ContainerHandle, ContainerManager, ContainerState, RootPassword,
    DEFAULT_SETTLE_DELAY,
};
pub use manager::{
    write_file_command, CommandOutput, ContainerExec, PlatformControl, PveError, PveManager,
    REQUIRED_TOOLS,
};
pub use probe::{
    newest_matching, EnvironmentProbe, FALLBACK_BRIDGE, FALLBACK_CONTAINER_ID, FALLBACK_STORAGE,
    TEMPLATE_PREFIX, TEMPLATE_STORAGE,
};
