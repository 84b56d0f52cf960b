use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_GAME: &str = "abiotic-factor";
pub const DEFAULT_HOST_ROOT: &str = "/srv/gameserver-lxc";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("invalid CIDR address '{0}'")]
    InvalidCidr(String),

    #[error("gateway {gateway} is not in the same address family as {cidr}")]
    GatewayFamily { gateway: IpAddr, cidr: Cidr },

    #[error("invalid container name '{0}': use letters, digits and '-' (max 63)")]
    InvalidName(String),

    #[error("query port and beacon port must differ from the game port {0}")]
    PortClash(u16),

    #[error("host root must be an absolute path: {0}")]
    RelativeHostRoot(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Create,
    Repair,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Create => write!(f, "create"),
            Mode::Repair => write!(f, "repair"),
        }
    }
}

/// An address with prefix length, e.g. `10.0.0.5/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    pub address: IpAddr,
    pub prefix: u8,
}

impl FromStr for Cidr {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidCidr(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let address: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        let max = if address.is_ipv4() { 32 } else { 128 };
        if prefix == 0 || prefix > max {
            return Err(invalid());
        }
        Ok(Self { address, prefix })
    }
}

impl TryFrom<String> for Cidr {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cidr> for String {
    fn from(value: Cidr) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionalPorts {
    pub query_port: u16,
    pub beacon_port: u16,
}

/// One fully-populated provisioning run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub mode: Mode,
    pub container_id: u32,
    pub container_name: String,
    pub storage_pool: String,
    pub network_bridge: String,
    pub cpu_cores: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
    pub static_address_cidr: Cidr,
    pub gateway: IpAddr,
    pub unprivileged: bool,
    pub server_bind_address: IpAddr,
    pub server_port: u16,
    #[serde(default)]
    pub optional_ports: Option<OptionalPorts>,
    pub update_on_start: bool,
    pub restart_interval_seconds: u32,
    #[serde(default = "default_game")]
    pub game: String,
    #[serde(default = "default_host_root")]
    pub host_root: PathBuf,
    #[serde(default)]
    pub template: Option<String>,
}

fn default_game() -> String {
    DEFAULT_GAME.to_string()
}

fn default_host_root() -> PathBuf {
    PathBuf::from(DEFAULT_HOST_ROOT)
}

impl ProvisionRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let positive = [
            ("container id", self.container_id),
            ("cpu cores", self.cpu_cores),
            ("memory", self.memory_mb),
            ("disk size", self.disk_gb),
            ("server port", u32::from(self.server_port)),
            ("restart interval", self.restart_interval_seconds),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ValidationError::NotPositive(*field));
        }

        if !is_valid_hostname(&self.container_name) {
            return Err(ValidationError::InvalidName(self.container_name.clone()));
        }

        if self.gateway.is_ipv4() != self.static_address_cidr.address.is_ipv4() {
            return Err(ValidationError::GatewayFamily {
                gateway: self.gateway,
                cidr: self.static_address_cidr,
            });
        }

        if let Some(ports) = self.optional_ports {
            if ports.query_port == 0 {
                return Err(ValidationError::NotPositive("query port"));
            }
            if ports.beacon_port == 0 {
                return Err(ValidationError::NotPositive("beacon port"));
            }
            if ports.query_port == self.server_port || ports.beacon_port == self.server_port {
                return Err(ValidationError::PortClash(self.server_port));
            }
        }

        if !self.host_root.is_absolute() {
            return Err(ValidationError::RelativeHostRoot(self.host_root.clone()));
        }
        Ok(())
    }

    /// Host directory holding this container's server and save trees.
    pub fn host_dir(&self) -> PathBuf {
        self.host_root.join(self.container_id.to_string())
    }
}

fn is_valid_hostname(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}
