// Games manager - resolves game profiles from built-ins and user overrides

use crate::games::config::{get_builtin_profiles, GameProfile};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("unknown game profile '{0}'")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("game profile '{id}': {field} {reason}")]
    InvalidPath {
        id: String,
        field: &'static str,
        reason: String,
    },

    #[error("invalid game profiles in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub struct GamesManager {
    builtin_profiles: HashMap<String, GameProfile>,
    custom_profiles: HashMap<String, GameProfile>,
}

impl GamesManager {
    /// Built-ins plus the overrides in the default games file, if present.
    pub fn load() -> Result<Self, ProfileError> {
        Self::load_from(&get_games_config_path())
    }

    pub fn load_from(custom_path: &Path) -> Result<Self, ProfileError> {
        let mut manager = Self::builtin_only();

        let content = match std::fs::read_to_string(custom_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(manager),
            Err(e) => {
                return Err(ProfileError::Read {
                    path: custom_path.to_path_buf(),
                    source: e,
                })
            }
        };

        let custom: Vec<GameProfile> =
            serde_json::from_str(&content).map_err(|e| ProfileError::Parse {
                path: custom_path.to_path_buf(),
                source: e,
            })?;

        for mut profile in custom {
            profile.check_paths()?;
            profile.is_custom = true;
            manager.custom_profiles.insert(profile.id.clone(), profile);
        }
        tracing::debug!(
            "Loaded {} custom game profiles from {}",
            manager.custom_profiles.len(),
            custom_path.display()
        );
        Ok(manager)
    }

    pub fn builtin_only() -> Self {
        let builtin_profiles = get_builtin_profiles()
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        Self {
            builtin_profiles,
            custom_profiles: HashMap::new(),
        }
    }

    pub fn get_profile(&self, id: &str) -> Result<GameProfile, ProfileError> {
        // Custom profiles take precedence (overrides)
        self.custom_profiles
            .get(id)
            .or_else(|| self.builtin_profiles.get(id))
            .cloned()
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))
    }

    pub fn get_all_profiles(&self) -> Vec<GameProfile> {
        let mut profiles: Vec<GameProfile> = self
            .builtin_profiles
            .iter()
            .filter(|(id, _)| !self.custom_profiles.contains_key(*id))
            .map(|(_, p)| p.clone())
            .chain(self.custom_profiles.values().cloned())
            .collect();

        // Sort: built-in first, then custom, alphabetically
        profiles.sort_by(|a, b| match (a.is_custom, b.is_custom) {
            (false, true) => std::cmp::Ordering::Less,
            (true, false) => std::cmp::Ordering::Greater,
            _ => a.name.cmp(&b.name),
        });
        profiles
    }
}

pub fn get_games_config_path() -> PathBuf {
    crate::commands::records::config_dir().join("games.json")
}
