//! Configuration file handling for the distro pipeline.
//!
//! Loads a `.distro.toml` file with support for merging with CLI
//! overrides and sane defaults for every tunable in the orchestrator,
//! retry, circuit breaker, cache, and retention subsystems.
//!
//! # Example
//!
//! ```
//! use distro_config::{DistroConfig, load_config};
//! use std::path::Path;
//!
//! let config = load_config(Path::new(".")).expect("load config");
//! assert!(config.max_concurrent_jobs() > 0);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use distro_cache::Tier;
use distro_circuit::CircuitConfig;
use distro_retry::{PerChannelRetryConfig, RetryStrategyConfig};
use distro_types::{Channel, DryRunSettings};
use serde::{Deserialize, Serialize};

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".distro.toml";

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Complete distro pipeline configuration (§6.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistroConfig {
    #[serde(default)]
    pub dry_run: DryRunSettings,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub circuit: CircuitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl DistroConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.job.max_concurrent_jobs
    }

    pub fn default_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.job.default_deadline_ms)
    }

    pub fn effective_dry_run(&self, job_dry_run: bool) -> bool {
        self.dry_run.effective(job_dry_run)
    }

    pub fn rate_limit_for(&self, channel: Channel) -> u64 {
        self.channels
            .rate_limits_per_hour
            .get(channel.as_str())
            .copied()
            .unwrap_or(self.channels.default_rate_limit_per_hour)
    }

    pub fn retry_config_for(&self, channel: Channel) -> RetryStrategyConfig {
        self.retry
            .per_channel
            .config_for(&self.retry.default, channel.as_str())
    }

    /// Merge this config with another (`other` takes precedence field by
    /// field, falling back to `self` when `other` carries the built-in
    /// default — the standard precedence rule for CLI-over-file overrides).
    pub fn merge(&self, other: &DistroConfig) -> DistroConfig {
        DistroConfig {
            dry_run: DryRunSettings {
                global: other.dry_run.global || self.dry_run.global,
            },
            job: JobConfig {
                max_concurrent_jobs: if other.job.max_concurrent_jobs != default_max_concurrent_jobs() {
                    other.job.max_concurrent_jobs
                } else {
                    self.job.max_concurrent_jobs
                },
                default_deadline_ms: if other.job.default_deadline_ms != default_deadline_ms() {
                    other.job.default_deadline_ms
                } else {
                    self.job.default_deadline_ms
                },
            },
            channels: ChannelsConfig {
                default_rate_limit_per_hour: if other.channels.default_rate_limit_per_hour
                    != default_rate_limit()
                {
                    other.channels.default_rate_limit_per_hour
                } else {
                    self.channels.default_rate_limit_per_hour
                },
                rate_limits_per_hour: if other.channels.rate_limits_per_hour.is_empty() {
                    self.channels.rate_limits_per_hour.clone()
                } else {
                    other.channels.rate_limits_per_hour.clone()
                },
            },
            retry: other.retry.clone(),
            circuit: other.circuit,
            cache: other.cache.clone(),
            retention: other.retention,
            scheduler: other.scheduler.clone(),
        }
    }
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_deadline_ms() -> u64 {
    30_000
}

/// Job orchestration limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Deadline applied to a job when the caller doesn't specify one.
    #[serde(default = "default_deadline_ms")]
    pub default_deadline_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            default_deadline_ms: default_deadline_ms(),
        }
    }
}

fn default_rate_limit() -> u64 {
    100
}

/// Per-channel rate limits, keyed by `Channel::as_str()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_rate_limit")]
    pub default_rate_limit_per_hour: u64,
    #[serde(default)]
    pub rate_limits_per_hour: BTreeMap<String, u64>,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            default_rate_limit_per_hour: default_rate_limit(),
            rate_limits_per_hour: BTreeMap::new(),
        }
    }
}

/// Retry settings: a default policy plus per-channel overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default)]
    pub default: RetryStrategyConfig,
    #[serde(default)]
    pub per_channel: PerChannelRetryConfig,
}

fn default_tiers_enabled() -> Vec<Tier> {
    vec![Tier::Local, Tier::Shared, Tier::Cdn, Tier::Api]
}

fn default_cache_ttl_s() -> u64 {
    300
}

/// Cache invalidation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_tiers_enabled")]
    pub tiers_enabled: Vec<Tier>,
    #[serde(default = "default_cache_ttl_s")]
    pub default_ttl_s: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tiers_enabled: default_tiers_enabled(),
            default_ttl_s: default_cache_ttl_s(),
        }
    }
}

fn default_terminal_job_retention_days() -> u64 {
    30
}

/// Job retention window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_terminal_job_retention_days")]
    pub terminal_jobs_days: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            terminal_jobs_days: default_terminal_job_retention_days(),
        }
    }
}

/// Rules for the weekly batch planner's content selection (§4.8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Section names considered for round-robin batch selection, in
    /// priority order. Empty means "greedy by content priority only".
    #[serde(default)]
    pub batch_rules: Vec<String>,
}

/// Load configuration from a directory, returning defaults if no config
/// file is present.
pub fn load_config(dir: &Path) -> Result<DistroConfig> {
    load_config_from_file(&config_path(dir))
}

pub fn load_config_from_file(path: &Path) -> Result<DistroConfig> {
    if !path.exists() {
        return Ok(DistroConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: DistroConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    Ok(config)
}

pub fn save_config(dir: &Path, config: &DistroConfig) -> Result<()> {
    let path = config_path(dir);

    let content = toml::to_string_pretty(config).context("failed to serialize config to TOML")?;

    std::fs::write(&path, content)
        .with_context(|| format!("failed to write config file: {}", path.display()))?;

    Ok(())
}

pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;

    loop {
        let config_file = current.join(CONFIG_FILE);
        if config_file.exists() {
            return Some(config_file);
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_sane_values() {
        let config = DistroConfig::new();
        assert_eq!(config.max_concurrent_jobs(), 8);
        assert_eq!(config.default_deadline(), std::time::Duration::from_millis(30_000));
        assert_eq!(config.rate_limit_for(Channel::Email), 100);
    }

    #[test]
    fn load_missing_config_returns_default() {
        let td = tempdir().expect("tempdir");
        let config = load_config(td.path()).expect("load");
        assert_eq!(config.max_concurrent_jobs(), 8);
    }

    #[test]
    fn save_and_load_config_roundtrips() {
        let td = tempdir().expect("tempdir");

        let mut config = DistroConfig::new();
        config.job.max_concurrent_jobs = 16;
        config
            .channels
            .rate_limits_per_hour
            .insert(Channel::SocialTwitter.as_str().to_string(), 50);

        save_config(td.path(), &config).expect("save");

        let loaded = load_config(td.path()).expect("load");
        assert_eq!(loaded.max_concurrent_jobs(), 16);
        assert_eq!(loaded.rate_limit_for(Channel::SocialTwitter), 50);
    }

    #[test]
    fn load_config_from_toml_overrides_nested_sections() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join(CONFIG_FILE);

        let content = r#"
[dry_run]
global = true

[job]
max_concurrent_jobs = 4
default_deadline_ms = 5000

[retry.default]
strategy = "linear"
max_attempts = 5
base_delay = "2s"
max_delay = "20s"
jitter = 0.1

[circuit]
consecutive_failure_threshold = 3
failure_rate_threshold = 0.6
min_samples_for_rate = 10
rate_window = "30s"
recovery_timeout = "45s"

[cache]
tiers_enabled = ["local", "cdn"]
default_ttl_s = 120

[retention]
terminal_jobs_days = 7
"#;
        std::fs::write(&path, content).expect("write");

        let config = load_config(td.path()).expect("load");
        assert!(config.dry_run.global);
        assert_eq!(config.max_concurrent_jobs(), 4);
        assert_eq!(config.retry.default.max_attempts, 5);
        assert_eq!(config.circuit.consecutive_failure_threshold, 3);
        assert_eq!(config.cache.tiers_enabled, vec![Tier::Local, Tier::Cdn]);
        assert_eq!(config.retention.terminal_jobs_days, 7);
    }

    #[test]
    fn merge_prefers_non_default_override_values() {
        let base = DistroConfig::new();
        let mut override_config = DistroConfig::new();
        override_config.job.max_concurrent_jobs = 32;

        let merged = base.merge(&override_config);
        assert_eq!(merged.max_concurrent_jobs(), 32);
    }

    #[test]
    fn find_config_walks_up_directory_tree() {
        let td = tempdir().expect("tempdir");
        let nested = td.path().join("a").join("b").join("c");
        std::fs::create_dir_all(&nested).expect("create dirs");

        let config_path_at_root = td.path().join(CONFIG_FILE);
        std::fs::write(&config_path_at_root, "[job]\nmax_concurrent_jobs = 2").expect("write");

        let found = find_config(&nested);
        assert_eq!(found, Some(config_path_at_root));
    }

    #[test]
    fn find_config_returns_none_if_not_found() {
        let td = tempdir().expect("tempdir");
        let nested = td.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("create dirs");

        assert!(find_config(&nested).is_none());
    }

    #[test]
    fn config_path_helper() {
        let dir = PathBuf::from("/project");
        assert_eq!(config_path(&dir), PathBuf::from("/project/.distro.toml"));
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join(CONFIG_FILE);

        std::fs::write(&path, "[job]\nmax_concurrent_jobs = 2\n").expect("write");

        let config = load_config(td.path()).expect("load");
        assert_eq!(config.max_concurrent_jobs(), 2);
        assert_eq!(config.default_deadline(), std::time::Duration::from_millis(30_000));
    }
}
