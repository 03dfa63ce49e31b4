//! Show the effective configuration.

use anyhow::{Context, Result};
use selfsync_manager::SelfSyncConfig;
use std::path::Path;

/// Load a configuration, or the defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<SelfSyncConfig> {
    let config = match path {
        Some(path) => SelfSyncConfig::from_file(path)?,
        None => SelfSyncConfig::default(),
    };
    config.validate().context("Configuration rejected")?;
    Ok(config)
}

/// Run the config command.
pub fn run(path: Option<&Path>) -> Result<()> {
    let config = load(path)?;
    let source = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in defaults".to_string());

    println!("# source: {}", source);
    print!(
        "{}",
        toml::to_string_pretty(&config).context("Failed to render configuration")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_without_path() {
        let config = load(None).unwrap();
        assert_eq!(config, SelfSyncConfig::default());
        assert!(run(None).is_ok());
    }

    #[test]
    fn loads_and_validates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("selfsync.toml");
        std::fs::write(&path, "[table]\ncapacity = 3\n").unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.table.capacity, 3);
        assert!(run(Some(&path)).is_ok());
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("selfsync.toml");
        let contents = "[liveness]\nping_interval_secs = 10\ntimeout_secs = 5\n";
        std::fs::write(&path, contents).unwrap();

        let err = load(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("liveness.timeout_secs"));
    }
}
