use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_STAGING_DIR: &str = "/data/local/tmp";
pub const DEFAULT_LOG_RETENTION: usize = 10;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct InstallerConfig {
    pub su_binary: String,
    /// Device-side directory the package manager can read staged files from.
    pub staging_dir: String,
    /// Zero waits forever.
    pub command_timeout_secs: u64,
    pub log_dir: Option<PathBuf>,
    pub log_retention: usize,
    pub preflight_probes: bool,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            su_binary: "su".to_string(),
            staging_dir: DEFAULT_STAGING_DIR.to_string(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            log_dir: None,
            log_retention: DEFAULT_LOG_RETENTION,
            preflight_probes: false,
        }
    }
}

impl InstallerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse apkroot config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config: {}", path.display()));
            }
        };
        Self::from_toml_str(&raw)
            .with_context(|| format!("failed to load config: {}", path.display()))
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }

    pub fn log_dir_or(&self, fallback: PathBuf) -> PathBuf {
        self.log_dir.clone().unwrap_or(fallback)
    }

    fn validate(&self) -> Result<()> {
        if self.su_binary.trim().is_empty() {
            return Err(anyhow!("su_binary must not be empty"));
        }
        if !self.staging_dir.starts_with('/') {
            return Err(anyhow!(
                "staging_dir must be an absolute device path: {}",
                self.staging_dir
            ));
        }
        if self.log_retention == 0 {
            return Err(anyhow!("log_retention must be at least 1"));
        }
        Ok(())
    }
}
