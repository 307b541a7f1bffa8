//! Hub state persisted in the system temp directory: the advertised
//! server name and the channel list. Both files are created with defaults
//! on first start so the hub runs with zero configuration.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;

const SERVER_NAME_FILE: &str = "gossip_server.name";
const CHANNELS_FILE: &str = "gossip_channels.list";

/// Longest accepted server name.
const MAX_NAME_LEN: usize = 64;

const DEFAULT_CHANNEL: &str = "general";

/// First line of `gossip_server.name`, created with a versioned default
/// when missing.
pub fn load_server_name() -> anyhow::Result<String> {
    load_server_name_from(&std::env::temp_dir())
}

/// One channel per line from `gossip_channels.list`, created with
/// `general` when missing.
pub fn load_channels() -> anyhow::Result<Vec<String>> {
    load_channels_from(&std::env::temp_dir())
}

fn load_server_name_from(dir: &Path) -> anyhow::Result<String> {
    let path: PathBuf = dir.join(SERVER_NAME_FILE);

    if !path.exists() {
        let default = format!("Generic Gossip Server v{}", env!("CARGO_PKG_VERSION"));
        fs::write(&path, format!("{default}\n"))
            .with_context(|| format!("failed to create {}", path.display()))?;
        info!(name = %default, "server name file created with default");
        return Ok(default);
    }

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut name = contents.lines().next().unwrap_or_default().to_owned();
    name.truncate(MAX_NAME_LEN);
    Ok(name)
}

fn load_channels_from(dir: &Path) -> anyhow::Result<Vec<String>> {
    let path: PathBuf = dir.join(CHANNELS_FILE);

    if !path.exists() {
        fs::write(&path, DEFAULT_CHANNEL)
            .with_context(|| format!("failed to create {}", path.display()))?;
        info!("channel list created with default channel");
        return Ok(vec![DEFAULT_CHANNEL.to_owned()]);
    }

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let channels: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();
    Ok(channels)
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
        let dir = std::env::temp_dir().join(format!("gossip-hub-test-{label}-{nanos}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn server_name_created_with_default() {
        let dir = scratch_dir("name-default");
        let name = load_server_name_from(&dir).unwrap();
        assert!(name.starts_with("Generic Gossip Server v"));
        // A second load reads the file it just wrote.
        assert_eq!(load_server_name_from(&dir).unwrap(), name);
    }

    #[test]
    fn server_name_truncated_to_first_line_and_64_chars() {
        let dir = scratch_dir("name-long");
        let long = "x".repeat(100);
        fs::write(dir.join(SERVER_NAME_FILE), format!("{long}\nsecond line")).unwrap();
        let name = load_server_name_from(&dir).unwrap();
        assert_eq!(name.len(), MAX_NAME_LEN);
        assert!(name.chars().all(|c| c == 'x'));
    }

    #[test]
    fn channels_created_with_general() {
        let dir = scratch_dir("channels-default");
        assert_eq!(load_channels_from(&dir).unwrap(), vec!["general"]);
    }

    #[test]
    fn channels_read_one_per_line() {
        let dir = scratch_dir("channels-list");
        fs::write(dir.join(CHANNELS_FILE), "general\nrandom\n\nops\n").unwrap();
        assert_eq!(
            load_channels_from(&dir).unwrap(),
            vec!["general", "random", "ops"]
        );
    }
}
