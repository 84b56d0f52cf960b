use crate::games::manager::ProfileError;
use serde::{Deserialize, Serialize};

/// Everything that differs between one Windows dedicated server and another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameProfile {
    pub id: String,
    pub name: String,
    pub steam_app_id: u32,
    /// Server executable, relative to the server install tree.
    pub executable: String,
    /// Save directory, relative to the server install tree. Replaced by a symlink.
    pub save_dir: String,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default = "default_shutdown_signal")]
    pub shutdown_signal: String,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u32,
    /// Appended after the bind/port arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub is_custom: bool,
}

fn default_shutdown_signal() -> String {
    "SIGINT".to_string()
}

fn default_shutdown_timeout() -> u32 {
    60
}

impl GameProfile {
    /// systemd unit name without the `.service` suffix.
    pub fn service_name(&self) -> String {
        self.service_name
            .clone()
            .unwrap_or_else(|| format!("{}-server", self.id))
    }

    /// File name of the server executable, used when searching for it.
    pub fn executable_name(&self) -> &str {
        self.executable
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(&self.executable)
    }

    pub fn executable_path(&self, install_dir: &str) -> String {
        join(install_dir, &self.executable)
    }

    pub fn save_path(&self, install_dir: &str) -> String {
        join(install_dir, &self.save_dir)
    }

    /// Reject paths the startup script must not touch.
    ///
    /// `save_dir` is removed with `rm -rf` on every start, so it has to name a
    /// real subdirectory of the server tree that does not hold the executable.
    pub fn check_paths(&self) -> Result<(), ProfileError> {
        let invalid = |field: &'static str, reason: &str| ProfileError::InvalidPath {
            id: self.id.clone(),
            field,
            reason: reason.to_string(),
        };

        let executable =
            tree_segments(&self.executable).map_err(|reason| invalid("executable", reason))?;
        let save_dir =
            tree_segments(&self.save_dir).map_err(|reason| invalid("save_dir", reason))?;
        if executable.starts_with(&save_dir) {
            return Err(invalid("save_dir", "contains the server executable"));
        }

        let unit = self.service_name();
        let unit_ok = !unit.is_empty()
            && unit
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
            && !unit.starts_with('.');
        if !unit_ok {
            return Err(invalid("service_name", "is not a valid systemd unit name"));
        }
        Ok(())
    }
}

/// Segments of a path relative to the server tree.
fn tree_segments(path: &str) -> Result<Vec<&str>, &'static str> {
    let path = path.trim();
    if path.starts_with('/') || path.starts_with('\\') || path.contains(':') {
        return Err("must be relative to the server tree");
    }
    let segments: Vec<&str> = path
        .split(|c| c == '/' || c == '\\')
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        return Err("must not be empty");
    }
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return Err("must not contain '.' or '..' segments");
    }
    Ok(segments)
}

fn join(root: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        root.trim_end_matches('/'),
        relative.trim_start_matches('/').replace('\\', "/")
    )
}

pub fn get_builtin_profiles() -> Vec<GameProfile> {
    vec![GameProfile {
        id: "abiotic-factor".to_string(),
        name: "Abiotic Factor".to_string(),
        steam_app_id: 2857200,
        executable: "AbioticFactor/Binaries/Win64/AbioticFactorServer-Win64-Shipping.exe"
            .to_string(),
        save_dir: "AbioticFactor/Saved/SaveGames".to_string(),
        service_name: None,
        shutdown_signal: default_shutdown_signal(),
        shutdown_timeout_seconds: default_shutdown_timeout(),
        extra_args: Vec::new(),
        is_custom: false,
    }]
}
