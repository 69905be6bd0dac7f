//! Pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Upper bound for control loop intervals
///
/// Keeps tick deadlines (`now + interval`) within the clock's range.
pub const MAX_LOOP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Where a failed task goes when it is retried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPlacement {
    /// Ahead of every queued task, regardless of priority
    #[default]
    Front,
    /// Through the normal ordered insert, using the boosted priority
    ByPriority,
}

/// Recognition pool configuration
///
/// Setters store values as given; [`PoolConfig::validate`] rejects invalid
/// combinations instead of clamping them.
///
/// # Example
///
/// ```
/// use lumen_pool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::default()
///     .with_min_workers(2)
///     .with_max_workers(8)
///     .with_task_timeout(Duration::from_secs(10))
///     .with_language("deu");
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Workers kept alive at all times
    pub min_workers: usize,

    /// Upper bound on workers, including those being created
    pub max_workers: usize,

    /// Idle workers unused for longer than this are evicted (down to `min_workers`)
    #[serde(with = "duration_millis")]
    pub idle_timeout: Duration,

    /// Default deadline for a single attempt
    #[serde(with = "duration_millis")]
    pub task_timeout: Duration,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Health check cadence
    #[serde(with = "duration_millis")]
    pub health_check_interval: Duration,

    /// Auto-scale cadence
    #[serde(with = "duration_millis")]
    pub scale_interval: Duration,

    /// Dispatch loop tick
    #[serde(with = "duration_millis")]
    pub dispatch_interval: Duration,

    /// A worker is quarantined once its error count exceeds this
    pub unhealthy_threshold: u32,

    /// Language passed to the recognizer factory
    pub language: String,

    /// Requeue position for retried tasks
    #[serde(default)]
    pub retry_placement: RetryPlacement,

    /// How long shutdown waits for an in-progress loop tick to finish
    #[serde(default = "default_shutdown_timeout", with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 4,
            idle_timeout: Duration::from_secs(300),
            task_timeout: Duration::from_secs(30),
            max_retries: 2,
            health_check_interval: Duration::from_secs(30),
            scale_interval: Duration::from_secs(5),
            dispatch_interval: Duration::from_millis(100),
            unhealthy_threshold: 3,
            language: "eng".to_string(),
            retry_placement: RetryPlacement::Front,
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Unset or unparsable variables keep their default value.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            min_workers: env_parse("LUMEN_POOL_MIN_WORKERS").unwrap_or(defaults.min_workers),
            max_workers: env_parse("LUMEN_POOL_MAX_WORKERS").unwrap_or(defaults.max_workers),
            idle_timeout: env_millis("LUMEN_POOL_IDLE_TIMEOUT_MS").unwrap_or(defaults.idle_timeout),
            task_timeout: env_millis("LUMEN_POOL_TASK_TIMEOUT_MS").unwrap_or(defaults.task_timeout),
            max_retries: env_parse("LUMEN_POOL_MAX_RETRIES").unwrap_or(defaults.max_retries),
            health_check_interval: env_millis("LUMEN_POOL_HEALTH_CHECK_INTERVAL_MS")
                .unwrap_or(defaults.health_check_interval),
            scale_interval: env_millis("LUMEN_POOL_SCALE_INTERVAL_MS")
                .unwrap_or(defaults.scale_interval),
            shutdown_timeout: env_millis("LUMEN_POOL_SHUTDOWN_TIMEOUT_MS")
                .unwrap_or(defaults.shutdown_timeout),
            language: std::env::var("LUMEN_POOL_LANGUAGE").unwrap_or(defaults.language),
            ..Self::default()
        }
    }

    pub fn with_min_workers(mut self, min: usize) -> Self {
        self.min_workers = min;
        self
    }

    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_scale_interval(mut self, interval: Duration) -> Self {
        self.scale_interval = interval;
        self
    }

    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    pub fn with_unhealthy_threshold(mut self, threshold: u32) -> Self {
        self.unhealthy_threshold = threshold;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_retry_placement(mut self, placement: RetryPlacement) -> Self {
        self.retry_placement = placement;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.min_workers < 1 {
            return Err(PoolError::InvalidConfig(
                "min_workers must be at least 1".into(),
            ));
        }
        if self.max_workers < self.min_workers {
            return Err(PoolError::InvalidConfig(format!(
                "max_workers ({}) must be >= min_workers ({})",
                self.max_workers, self.min_workers
            )));
        }
        for (name, value) in [
            ("task_timeout", self.task_timeout),
            ("health_check_interval", self.health_check_interval),
            ("scale_interval", self.scale_interval),
            ("dispatch_interval", self.dispatch_interval),
        ] {
            if value.is_zero() {
                return Err(PoolError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        for (name, value) in [
            ("health_check_interval", self.health_check_interval),
            ("scale_interval", self.scale_interval),
            ("dispatch_interval", self.dispatch_interval),
        ] {
            if value > MAX_LOOP_INTERVAL {
                return Err(PoolError::InvalidConfig(format!(
                    "{name} must not exceed {MAX_LOOP_INTERVAL:?}"
                )));
            }
        }
        if self.language.trim().is_empty() {
            return Err(PoolError::InvalidConfig("language must not be empty".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_workers, 1);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.unhealthy_threshold, 3);
        assert_eq!(config.language, "eng");
        assert_eq!(config.retry_placement, RetryPlacement::Front);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PoolConfig::new()
            .with_min_workers(2)
            .with_max_workers(6)
            .with_idle_timeout(Duration::from_secs(60))
            .with_task_timeout(Duration::from_secs(5))
            .with_max_retries(4)
            .with_language("fra")
            .with_retry_placement(RetryPlacement::ByPriority);

        assert_eq!(config.min_workers, 2);
        assert_eq!(config.max_workers, 6);
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.task_timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.language, "fra");
        assert_eq!(config.retry_placement, RetryPlacement::ByPriority);
    }

    #[test]
    fn test_zero_min_workers_rejected() {
        let err = PoolConfig::new().with_min_workers(0).validate().unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }

    #[test]
    fn test_max_below_min_rejected() {
        let err = PoolConfig::new()
            .with_min_workers(3)
            .with_max_workers(2)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("max_workers (2)"));
    }

    #[test]
    fn test_zero_durations_rejected() {
        assert!(PoolConfig::new()
            .with_task_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(PoolConfig::new()
            .with_scale_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_oversized_loop_interval_rejected() {
        let err = PoolConfig::new()
            .with_health_check_interval(Duration::MAX)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("health_check_interval"));

        assert!(PoolConfig::new()
            .with_dispatch_interval(MAX_LOOP_INTERVAL + Duration::from_millis(1))
            .validate()
            .is_err());
        assert!(PoolConfig::new()
            .with_scale_interval(MAX_LOOP_INTERVAL)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_shutdown_timeout_defaults_when_absent() {
        let mut json = serde_json::to_value(PoolConfig::default()).unwrap();
        json.as_object_mut().unwrap().remove("shutdown_timeout");
        let parsed: PoolConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_empty_language_rejected() {
        assert!(PoolConfig::new().with_language("  ").validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = PoolConfig::new()
            .with_max_workers(3)
            .with_task_timeout(Duration::from_millis(1500));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["task_timeout"], 1500);

        let parsed: PoolConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config, parsed);
    }
}
