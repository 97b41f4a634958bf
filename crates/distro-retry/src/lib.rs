//! Retry strategies and backoff policies for channel publishes.
//!
//! This crate provides the backoff math behind `ResilientPublisher`
//! (exponential backoff with jitter by default, per §4.3 of the publishing
//! contract), plus a `RetryExecutor` for the common "retry until attempts
//! exhausted" loop.
//!
//! # Example
//!
//! ```
//! use distro_retry::{RetryPolicy, RetryStrategyConfig, calculate_delay};
//!
//! let config = RetryPolicy::Default.to_config();
//! let delay = calculate_delay(&config, 2);
//! println!("retry after: {:?}", delay);
//! ```

use std::time::Duration;

use distro_types::ErrorKind;
use serde::{Deserialize, Serialize};

/// Strategy type for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// No delay between retries.
    Immediate,
    /// Exponential backoff: delay doubles each attempt (default).
    #[default]
    Exponential,
    /// Linear backoff: delay increases linearly each attempt.
    Linear,
    /// Constant delay: same delay every attempt.
    Constant,
}

/// Predefined retry policies. `Default` is the fixed baseline contract:
/// exponential, 4s base, 10s cap, ±20% jitter, 3 attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    #[default]
    Default,
    Aggressive,
    Conservative,
    /// Fully custom configuration via `retry.*` settings.
    Custom,
}

impl RetryPolicy {
    pub fn to_config(self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::Default => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 3,
                base_delay: Duration::from_secs(4),
                max_delay: Duration::from_secs(10),
                jitter: 0.2,
            },
            RetryPolicy::Aggressive => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 6,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                jitter: 0.3,
            },
            RetryPolicy::Conservative => RetryStrategyConfig {
                strategy: RetryStrategyType::Linear,
                max_attempts: 2,
                base_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(60),
                jitter: 0.1,
            },
            RetryPolicy::Custom => RetryStrategyConfig::default(),
        }
    }
}

/// Configuration for a retry strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    #[serde(default)]
    pub strategy: RetryStrategyType,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor (0.0 = no jitter, 1.0 = full jitter). Spec default 0.2
    /// (±20%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(4)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategyType::Exponential,
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

/// Per-channel override of the default retry configuration, keyed by
/// `distro_types::Channel::as_str()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerChannelRetryConfig(pub std::collections::BTreeMap<String, RetryStrategyConfig>);

impl PerChannelRetryConfig {
    pub fn config_for(&self, default: &RetryStrategyConfig, channel: &str) -> RetryStrategyConfig {
        self.0.get(channel).cloned().unwrap_or_else(|| default.clone())
    }
}

/// Calculate the delay for the next retry attempt (1-indexed).
///
/// ```
/// use distro_retry::{RetryStrategyConfig, RetryStrategyType, calculate_delay};
/// use std::time::Duration;
///
/// let config = RetryStrategyConfig {
///     strategy: RetryStrategyType::Exponential,
///     base_delay: Duration::from_secs(1),
///     max_delay: Duration::from_secs(60),
///     jitter: 0.0,
///     max_attempts: 10,
/// };
///
/// assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
/// assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
/// ```
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt),
        RetryStrategyType::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);

    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

/// Delay for the next attempt, honoring a server-provided `Retry-After`
/// duration when present (§4.3: "respect Retry-After when present,
/// otherwise apply backoff").
pub fn calculate_delay_with_retry_after(
    config: &RetryStrategyConfig,
    attempt: u32,
    retry_after: Option<Duration>,
) -> Duration {
    retry_after.unwrap_or_else(|| calculate_delay(config, attempt))
}

/// Apply jitter to a delay value. Jitter factor of 0.2 means delay * (0.8 to 1.2).
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    use rand::RngExt;

    let jitter_range = 2.0 * jitter;
    let mut rng = rand::rng();
    let random_value: f64 = rng.random();
    let random_factor = 1.0 - jitter + (random_value * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

/// Whether an error class should be retried at all, independent of backoff
/// timing — this is the non-retryable/retryable split from §4.3 and §7.
pub fn should_retry(kind: ErrorKind) -> bool {
    kind.is_retryable()
}

/// A retry executor that runs a fallible operation with configured retry
/// behavior, sleeping between attempts via `std::thread::sleep`.
pub struct RetryExecutor {
    config: RetryStrategyConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryStrategyConfig) -> Self {
        Self { config }
    }

    pub fn from_policy(policy: RetryPolicy) -> Self {
        Self::new(policy.to_config())
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Execute a fallible operation. `operation` receives the attempt number
    /// (starting at 1) and the previous error's retry-after hint, if any.
    /// Returns `Err((last_error, attempts))` once attempts are exhausted or
    /// the error is classified non-retryable by `classify`.
    pub fn run<T, F>(
        &self,
        mut operation: F,
        classify: impl Fn(&distro_types::ChannelError) -> bool,
    ) -> Result<T, (distro_types::ChannelError, u32)>
    where
        F: FnMut(u32) -> Result<T, distro_types::ChannelError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation(attempt) {
                Ok(result) => return Ok(result),
                Err(e) => {
                    let retryable = classify(&e);
                    if !retryable || attempt >= self.config.max_attempts {
                        return Err((e, attempt));
                    }
                    let delay =
                        calculate_delay_with_retry_after(&self.config, attempt, e.retry_after);
                    std::thread::sleep(delay);
                }
            }
        }
    }
}
