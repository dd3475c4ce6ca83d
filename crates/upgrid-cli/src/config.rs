//! upgrid.toml configuration parser.
//!
//! ```toml
//! [registry]
//! path = "/var/lib/upgrid/registry.redb"
//!
//! [upgrade]
//! batch_size = 2
//! interval_ms = 2000
//! update_links = true
//! retry_attempts = 3
//! retry_backoff_ms = 500
//! retry_max_backoff_ms = 5000
//! health_timeout_secs = 60
//! completion_timeout_secs = 300
//! poll_interval_ms = 1000
//! ```
//!
//! Every key is optional. Command-line flags override the file, and the
//! file overrides built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use upgrid_rollout::UpgradeOptions;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "upgrid.toml";

/// Registry database used when neither flag nor file names one.
pub const DEFAULT_REGISTRY_FILE: &str = "upgrid.redb";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpgridConfig {
    pub registry: Option<RegistryConfig>,
    pub upgrade: Option<UpgradeConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    pub path: Option<PathBuf>,
}

/// Defaults for `upgrid upgrade`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpgradeConfig {
    pub batch_size: Option<u32>,
    pub interval_ms: Option<u64>,
    pub update_links: Option<bool>,
    pub retry_attempts: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    /// Cap on the retry delay. `retry_backoff_ms` above it is clamped.
    pub retry_max_backoff_ms: Option<u64>,
    /// Per-batch health gate. Absent means batches are paced by time only.
    pub health_timeout_secs: Option<u64>,
    pub completion_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

impl UpgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: UpgridConfig = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Load `explicit` if given, else `upgrid.toml` if present, else defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Registry database path: `flag`, then the file, then the default.
    pub fn registry_path(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| self.registry.as_ref().and_then(|r| r.path.clone()))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_FILE))
    }

    /// Built-in upgrade defaults with the file's `[upgrade]` table applied.
    pub fn upgrade_options(&self) -> UpgradeOptions {
        let mut opts = UpgradeOptions::default();
        let Some(file) = &self.upgrade else {
            return opts;
        };

        if let Some(n) = file.batch_size {
            opts.batch_size = n;
        }
        if let Some(ms) = file.interval_ms {
            opts.interval = Duration::from_millis(ms);
        }
        if let Some(update) = file.update_links {
            opts.update_links = update;
        }
        if let Some(n) = file.retry_attempts {
            opts.retry.max_attempts = n;
        }
        if let Some(ms) = file.retry_backoff_ms {
            opts.retry.backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = file.retry_max_backoff_ms {
            opts.retry.max_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = file.health_timeout_secs {
            opts.health_gate = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = file.completion_timeout_secs {
            opts.completion_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = file.poll_interval_ms {
            opts.poll_interval = Duration::from_millis(ms);
        }
        opts
    }
}
