//! CLI configuration: state directory, worker count, retry limits.
//!
//! Loaded from `~/.config/atoll/config.toml` when present, then
//! overridden by command-line flags. The engine never reads config or
//! environment on its own; everything is resolved here and passed in.

use anyhow::{Context, Result};
use reconciler::{ExecuteOptions, FailureMode, RetryConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolved configuration for a run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding per-resource state records
    pub state_dir: PathBuf,
    /// File backing the local provider
    pub world_file: PathBuf,
    pub jobs: usize,
    pub failure_mode: FailureMode,
    pub retry: RetryConfig,
}

/// On-disk shape of `config.toml`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    state_dir: Option<PathBuf>,
    jobs: Option<usize>,
    fail_fast: Option<bool>,
    #[serde(default)]
    retry: RetryFile,
}

#[derive(Debug, Default, Deserialize)]
struct RetryFile {
    max_attempts: Option<u32>,
    base_delay_secs: Option<u64>,
    max_delay_secs: Option<u64>,
}

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine config directory")?;
    Ok(base.join("atoll"))
}

fn default_state_dir() -> Result<PathBuf> {
    let base = dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .context("Could not determine state directory")?;
    Ok(base.join("atoll"))
}

impl Config {
    /// Load config.toml (if present) and apply flag overrides.
    pub fn load(state_dir_flag: Option<&Path>, jobs_flag: Option<usize>) -> Result<Self> {
        let path = config_dir()?.join("config.toml");
        let file = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Could not read {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Invalid config in {}", path.display()))?
        } else {
            ConfigFile::default()
        };
        Self::resolve(file, state_dir_flag, jobs_flag)
    }

    fn resolve(
        file: ConfigFile,
        state_dir_flag: Option<&Path>,
        jobs_flag: Option<usize>,
    ) -> Result<Self> {
        let state_dir = state_dir_flag
            .map(Path::to_path_buf)
            .or(file.state_dir)
            .map_or_else(default_state_dir, Ok)?;
        let world_file = state_dir.join("world.toml");

        let defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_attempts: file.retry.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: file
                .retry
                .base_delay_secs
                .map_or(defaults.base_delay, Duration::from_secs),
            max_delay: file
                .retry
                .max_delay_secs
                .map_or(defaults.max_delay, Duration::from_secs),
            ..defaults
        };

        Ok(Self {
            state_dir,
            world_file,
            jobs: jobs_flag.or(file.jobs).unwrap_or(4),
            failure_mode: if file.fail_fast == Some(true) {
                FailureMode::FailFast
            } else {
                FailureMode::BestEffort
            },
            retry,
        })
    }

    /// Engine options for this configuration.
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            jobs: self.jobs,
            failure_mode: self.failure_mode,
            retry: self.retry.clone(),
            prune: true,
        }
    }
}
