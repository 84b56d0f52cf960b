use crate::commands::CommandError;
use crate::games::{get_games_config_path, GameProfile, GamesManager};

pub fn games() -> Result<(), CommandError> {
    let manager = GamesManager::load()?;
    for line in profile_lines(&manager.get_all_profiles()) {
        println!("{}", line);
    }
    println!();
    println!("Custom profiles: {}", get_games_config_path().display());
    Ok(())
}

/// One line per profile: id, Steam app id, unit name, and a marker for overrides.
pub fn profile_lines(profiles: &[GameProfile]) -> Vec<String> {
    let width = profiles.iter().map(|p| p.id.len()).max().unwrap_or(0);
    profiles
        .iter()
        .map(|p| {
            format!(
                "{:<width$}  app {:<8}  {}.service  {}{}",
                p.id,
                p.steam_app_id,
                p.service_name(),
                p.name,
                if p.is_custom { " (custom)" } else { "" },
                width = width
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_profiles_are_listed_after_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("games.json");
        std::fs::write(
            &path,
            r#"[{
                "id": "vrising",
                "name": "V Rising",
                "steam_app_id": 1829350,
                "executable": "VRisingServer.exe",
                "save_dir": "save-data"
            }]"#,
        )
        .unwrap();

        let manager = GamesManager::load_from(&path).unwrap();
        let lines = profile_lines(&manager.get_all_profiles());

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("abiotic-factor  app 2857200"));
        assert!(lines[0].contains("abiotic-factor-server.service"));
        assert!(lines[1].starts_with("vrising         app 1829350"));
        assert!(lines[1].ends_with("V Rising (custom)"));
    }
}
