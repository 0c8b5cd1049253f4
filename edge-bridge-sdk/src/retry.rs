use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect policy of upstream connections: exponential backoff plus an
/// optional attempt limit.
///
/// Whichever of `max_attempts` and `max_elapsed_time_ms` is reached first
/// stops retries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of connection attempts (None or 0 = unlimited)
    #[serde(default = "RetryPolicy::default_max_attempts")]
    pub max_attempts: Option<u32>,

    /// Initial retry interval in milliseconds
    #[serde(default = "RetryPolicy::default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Maximum retry interval cap in milliseconds
    #[serde(default = "RetryPolicy::default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Randomization factor in range [0.0, 1.0]. Example: 0.2 means ±20% jitter
    #[serde(default = "RetryPolicy::default_randomization_factor")]
    pub randomization_factor: f64,

    /// Multiplicative factor for each retry step
    #[serde(default = "RetryPolicy::default_multiplier")]
    pub multiplier: f64,

    /// Optional maximum total elapsed time in milliseconds (None = no time limit)
    #[serde(default)]
    pub max_elapsed_time_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_interval_ms: Self::default_initial_interval_ms(),
            max_interval_ms: Self::default_max_interval_ms(),
            randomization_factor: Self::default_randomization_factor(),
            multiplier: Self::default_multiplier(),
            max_elapsed_time_ms: None,
        }
    }
}

impl RetryPolicy {
    fn default_max_attempts() -> Option<u32> {
        None
    }

    fn default_initial_interval_ms() -> u64 {
        1_000
    }

    fn default_max_interval_ms() -> u64 {
        60_000
    }

    fn default_randomization_factor() -> f64 {
        0.2
    }

    fn default_multiplier() -> f64 {
        2.0
    }

    /// Only one attempt, never reconnect
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Default::default()
        }
    }

    /// Whether another attempt is allowed after `attempts` attempts were made
    #[inline]
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        match self.max_attempts {
            None | Some(0) => true,
            Some(max) => attempts < max,
        }
    }
}

/// Build an ExponentialBackoff from RetryPolicy.
///
/// Callers check `max_attempts` separately via [`RetryPolicy::allows_attempt`].
pub fn build_exponential_backoff(policy: &RetryPolicy) -> ExponentialBackoff {
    let initial_interval = Duration::from_millis(policy.initial_interval_ms.max(1));
    ExponentialBackoff {
        current_interval: initial_interval,
        initial_interval,
        max_interval: Duration::from_millis(
            policy
                .max_interval_ms
                .max(policy.initial_interval_ms)
                .max(1),
        ),
        randomization_factor: policy.randomization_factor.clamp(0.0, 1.0),
        multiplier: policy.multiplier.max(1.0),
        max_elapsed_time: policy.max_elapsed_time_ms.map(Duration::from_millis),
        ..ExponentialBackoff::default()
    }
}
