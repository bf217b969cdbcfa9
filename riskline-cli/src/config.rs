//! CLI configuration management
//!
//! Runtime settings come from the environment and may be overridden by
//! command-line flags. Pipeline settings live in the pipeline config file;
//! the runtime settings here take precedence over the file.

use anyhow::{bail, Context, Result};
use riskline_monitor::DriftConfig;
use riskline_runtime::ExecutorConfig;
use std::path::PathBuf;
use std::str::FromStr;

pub const ENV_STORE_DIR: &str = "RISKLINE_STORE_DIR";
pub const ENV_MAX_PARALLEL: &str = "RISKLINE_MAX_PARALLEL";
pub const ENV_STAGE_TIMEOUT_SECS: &str = "RISKLINE_STAGE_TIMEOUT_SECS";
pub const ENV_DRIFT_THRESHOLD: &str = "RISKLINE_DRIFT_THRESHOLD";
pub const ENV_DRIFT_MIN_SAMPLES: &str = "RISKLINE_DRIFT_MIN_SAMPLES";

const DEFAULT_STORE_DIR: &str = ".riskline";

/// Process-level settings shared by every command
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Root of the filesystem object store
    pub store_dir: PathBuf,
    pub max_parallel: Option<usize>,
    pub stage_timeout_secs: Option<u64>,
    pub drift: DriftConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            max_parallel: None,
            stage_timeout_secs: None,
            drift: DriftConfig::default(),
        }
    }
}

/// Flags that override the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub store_dir: Option<PathBuf>,
    pub max_parallel: Option<usize>,
    pub stage_timeout_secs: Option<u64>,
}

impl RuntimeConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_STORE_DIR).filter(|d| !d.trim().is_empty()) {
            config.store_dir = PathBuf::from(dir);
        }
        config.max_parallel = parse_var(&lookup, ENV_MAX_PARALLEL)?;
        config.stage_timeout_secs = parse_var(&lookup, ENV_STAGE_TIMEOUT_SECS)?;
        if let Some(threshold) = parse_var(&lookup, ENV_DRIFT_THRESHOLD)? {
            config.drift.threshold = threshold;
        }
        if let Some(min_samples) = parse_var(&lookup, ENV_DRIFT_MIN_SAMPLES)? {
            config.drift.min_samples = min_samples;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Result<Self> {
        if let Some(dir) = overrides.store_dir {
            self.store_dir = dir;
        }
        if overrides.max_parallel.is_some() {
            self.max_parallel = overrides.max_parallel;
        }
        if overrides.stage_timeout_secs.is_some() {
            self.stage_timeout_secs = overrides.stage_timeout_secs;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == Some(0) {
            bail!("{ENV_MAX_PARALLEL} must be at least 1");
        }
        if self.stage_timeout_secs == Some(0) {
            bail!("{ENV_STAGE_TIMEOUT_SECS} must be at least 1");
        }
        self.drift
            .validate()
            .context("invalid drift settings")?;
        Ok(())
    }

    /// Apply the runtime limits on top of a pipeline's executor settings
    pub fn apply(&self, executor: &mut ExecutorConfig) {
        if self.max_parallel.is_some() {
            executor.max_parallel = self.max_parallel;
        }
        if let Some(secs) = self.stage_timeout_secs {
            executor.stage_timeout_secs = secs;
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {key}='{raw}': {e}")),
        _ => Ok(None),
    }
}
