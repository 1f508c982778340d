//! Consumer configuration.

use atlas_sleep_cache::ConfigError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default time a consumer keeps trying to resolve its tag (250ms).
pub const DEFAULT_RESOLVE_DEADLINE: Duration = Duration::from_millis(250);

/// When a consumer takes its first reference after resolving a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquirePolicy {
    /// Acquire as soon as the tag resolves, if the consumer is visible
    #[default]
    Eager,
    /// Acquire only on the next explicit wake
    Deferred,
}

impl FromStr for AcquirePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eager" => Ok(Self::Eager),
            "deferred" => Ok(Self::Deferred),
            _ => Err(ConfigError::InvalidValue(format!("acquire policy '{s}'"))),
        }
    }
}

impl fmt::Display for AcquirePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eager => f.write_str("eager"),
            Self::Deferred => f.write_str("deferred"),
        }
    }
}

/// Configuration shared by the consumers of one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// How long an unresolved consumer keeps retrying before giving up
    pub resolve_deadline: Duration,
    pub policy: AcquirePolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            resolve_deadline: DEFAULT_RESOLVE_DEADLINE,
            policy: AcquirePolicy::default(),
        }
    }
}

impl ConsumerConfig {
    /// Sets the resolve deadline.
    pub fn with_resolve_deadline(mut self, deadline: Duration) -> Self {
        self.resolve_deadline = deadline;
        self
    }

    /// Sets the acquire policy.
    pub fn with_policy(mut self, policy: AcquirePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ATLAS_SLEEP_RESOLVE_DEADLINE_MS`: resolve deadline in milliseconds (default: 250)
    /// - `ATLAS_SLEEP_ACQUIRE_POLICY`: `eager` or `deferred` (default: eager)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ATLAS_SLEEP_RESOLVE_DEADLINE_MS") {
            let millis = val.parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue("ATLAS_SLEEP_RESOLVE_DEADLINE_MS".to_string())
            })?;
            config.resolve_deadline = Duration::from_millis(millis);
        }

        if let Ok(val) = std::env::var("ATLAS_SLEEP_ACQUIRE_POLICY") {
            config.policy = val.parse().map_err(|_| {
                ConfigError::InvalidValue("ATLAS_SLEEP_ACQUIRE_POLICY".to_string())
            })?;
        }

        Ok(config)
    }
}
