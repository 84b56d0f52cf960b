mod config;
mod manager;

pub use config::{get_builtin_profiles, GameProfile};
pub use manager::{get_games_config_path, GamesManager, ProfileError};
