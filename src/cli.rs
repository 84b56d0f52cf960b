use crate::provision::{Cidr, DEFAULT_GAME, DEFAULT_HOST_ROOT};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "gameserver-lxc",
    version,
    about = "Provision a Windows dedicated game server into a Proxmox LXC container"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new container and provision the server into it
    Create(CreateArgs),
    /// Re-run provisioning against an existing container
    Repair(RepairArgs),
    /// Show detected storage, bridge and next free container id
    Probe,
    /// Print the generated startup script or service unit
    Render(RenderArgs),
    /// Check privileges and required host tools
    Preflight,
    /// List built-in and custom game profiles
    Games,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// JSON request file; when given the remaining flags are ignored
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Container id (default: next free id)
    #[arg(long)]
    pub id: Option<u32>,

    /// Container hostname
    #[arg(long, default_value = "gameserver")]
    pub name: String,

    /// Storage pool for the root disk (default: detected)
    #[arg(long)]
    pub storage: Option<String>,

    /// Network bridge (default: detected)
    #[arg(long)]
    pub bridge: Option<String>,

    #[arg(long, default_value_t = 4)]
    pub cores: u32,

    /// Memory (MiB)
    #[arg(long, default_value_t = 8192)]
    pub memory: u32,

    /// Root disk size (GB)
    #[arg(long, default_value_t = 32)]
    pub disk: u32,

    /// Static address with prefix, e.g. 192.168.1.50/24
    #[arg(long, required_unless_present = "config")]
    pub ip: Option<Cidr>,

    #[arg(long, required_unless_present = "config")]
    pub gateway: Option<IpAddr>,

    /// Create an unprivileged container
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub unprivileged: bool,

    /// Address the server binds to (default: the container address)
    #[arg(long)]
    pub bind_address: Option<IpAddr>,

    /// Game port
    #[arg(long, default_value_t = 7777)]
    pub port: u16,

    /// Steam query port; requires --beacon-port
    #[arg(long, requires = "beacon_port")]
    pub query_port: Option<u16>,

    /// Beacon port; requires --query-port
    #[arg(long, requires = "query_port")]
    pub beacon_port: Option<u16>,

    /// Do not run SteamCMD when the service starts
    #[arg(long)]
    pub no_update_on_start: bool,

    /// Seconds systemd waits before restarting the server
    #[arg(long, default_value_t = 10)]
    pub restart_interval: u32,

    /// Game profile id
    #[arg(long, default_value = DEFAULT_GAME)]
    pub game: String,

    /// Host directory holding per-container server and save trees
    #[arg(long, default_value = DEFAULT_HOST_ROOT)]
    pub host_root: PathBuf,

    /// OS template volume id (default: newest Debian 12 standard)
    #[arg(long)]
    pub template: Option<String>,
}

#[derive(Args, Debug)]
pub struct RepairArgs {
    /// Container id to repair
    #[arg(long)]
    pub id: u32,

    /// JSON request file (default: the request saved when the container was created)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Artifact {
    Script,
    Unit,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// JSON request file
    #[arg(long, value_name = "FILE")]
    pub config: PathBuf,

    #[arg(long, value_enum, default_value_t = Artifact::Script)]
    pub what: Artifact,
}
