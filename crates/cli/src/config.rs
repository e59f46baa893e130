//! Configuration management for the CLI

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Agent image used when neither the flag nor the config file sets one
pub const DEFAULT_IMAGE: &str = concat!("kubectl-flame/flame-agent:", env!("CARGO_PKG_VERSION"));

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Agent image
    pub default_image: Option<String>,
    /// Namespace of the target pod
    pub default_namespace: Option<String>,
    /// Namespace profiling jobs are created in
    pub job_namespace: Option<String>,
}

impl Config {
    /// Load configuration from the default location, if present
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Get the configuration file path
    fn config_path() -> Option<PathBuf> {
        let home = dirs_next::home_dir()?;
        Some(home.join(".config").join("kubectl-flame").join("config.json"))
    }

    pub fn image(&self) -> String {
        self.default_image
            .clone()
            .unwrap_or_else(|| DEFAULT_IMAGE.to_string())
    }

    pub fn namespace(&self) -> String {
        self.default_namespace
            .clone()
            .unwrap_or_else(|| "default".to_string())
    }
}

/// Expand a leading `~/` in a kubeconfig path
pub fn kubeconfig_path(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs_next::home_dir().context("Could not determine home directory")?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Parse durations such as `90s`, `2m`, `1h` or a bare number of seconds
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);

    if digits.is_empty() {
        bail!("invalid duration {input:?}: expected a number followed by s, m or h");
    }
    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid duration {input:?}"))?;

    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        other => bail!("invalid duration unit {other:?} in {input:?}"),
    };
    let seconds = value
        .checked_mul(multiplier)
        .with_context(|| format!("duration {input:?} is too large"))?;

    if seconds == 0 {
        bail!("duration must be positive");
    }
    Ok(Duration::from_secs(seconds))
}
