// GameServer LXC - provision Windows dedicated game servers into Proxmox containers

pub mod cli;
pub mod commands;
pub mod games;
pub mod provision;
pub mod pve;
