//! Daemon configuration
//!
//! Only what is needed before the vault can be opened lives here; every
//! setting that can change at runtime is kept in the vault instead.

use std::{
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
};

use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_VAR: &str = "MAILBRIDGE_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// Root for settings, data and cache directories
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Address both endpoints bind to
    ///
    /// Ports come from the vault, since they can be changed while running.
    #[serde(default = "default_host")]
    pub host: IpAddr,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/var/lib/mailbridge")
}

const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            host: default_host(),
        }
    }
}

impl Config {
    /// Locate and parse the configuration file.
    ///
    /// # Errors
    /// If no file is found, or it cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        let path = find_config_file(
            std::env::var(CONFIG_VAR).ok(),
            &[
                PathBuf::from("./mailbridge.config.ron"),
                PathBuf::from("/etc/mailbridge/mailbridge.config.ron"),
            ],
        )?;

        Self::from_file(&path)
    }

    /// # Errors
    /// If the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e))?;

        Ok(ron::from_str(&content)?)
    }
}

/// Find the configuration file using the following precedence:
/// 1. `MAILBRIDGE_CONFIG` environment variable
/// 2. each of `defaults`, in order
fn find_config_file(env_path: Option<String>, defaults: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(env_path) = env_path {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_VAR} points to non-existent file: {}", path.display());
    }

    if let Some(path) = defaults.iter().find(|p| p.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_VAR} environment variable\n{paths_tried}"
    )
}
