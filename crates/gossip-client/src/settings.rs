//! Client settings persisted as `gossip_settings.json` in the system temp
//! directory. Created with defaults when missing.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

const SETTINGS_FILE: &str = "gossip_settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub selected_theme: String,
    pub default_username: String,
    pub default_host: String,
    pub default_port: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            selected_theme: "wintry".to_owned(),
            default_username: String::new(),
            default_host: String::new(),
            default_port: "1720".to_owned(),
        }
    }
}

pub fn load() -> anyhow::Result<Settings> {
    load_from(&std::env::temp_dir())
}

pub fn save(settings: &Settings) -> anyhow::Result<()> {
    save_to(&std::env::temp_dir(), settings)
}

fn load_from(dir: &Path) -> anyhow::Result<Settings> {
    let path: PathBuf = dir.join(SETTINGS_FILE);

    if !path.exists() {
        let defaults = Settings::default();
        save_to(dir, &defaults)?;
        return Ok(defaults);
    }

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("malformed settings in {}", path.display()))
}

fn save_to(dir: &Path, settings: &Settings) -> anyhow::Result<()> {
    let path: PathBuf = dir.join(SETTINGS_FILE);
    let contents = serde_json::to_string(settings)?;
    fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("gossip-client-test-{label}-{nanos}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_file_yields_defaults_and_creates_it() {
        let dir = scratch_dir("defaults");
        let settings = load_from(&dir).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(dir.join(SETTINGS_FILE).exists());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = scratch_dir("round-trip");
        let settings = Settings {
            selected_theme: "gold-nouveau".to_owned(),
            default_username: "mallory".to_owned(),
            default_host: "example.org".to_owned(),
            default_port: "1999".to_owned(),
        };
        save_to(&dir, &settings).unwrap();
        assert_eq!(load_from(&dir).unwrap(), settings);
    }

    #[test]
    fn uses_camel_case_keys() {
        let dir = scratch_dir("keys");
        save_to(&dir, &Settings::default()).unwrap();
        let raw = fs::read_to_string(dir.join(SETTINGS_FILE)).unwrap();
        for key in [
            "selectedTheme",
            "defaultUsername",
            "defaultHost",
            "defaultPort",
        ] {
            assert!(raw.contains(key), "missing key {key} in {raw}");
        }
    }
}
