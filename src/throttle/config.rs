//! Throttle Configuration
//!
//! Window length, freeze policy and role quotas for a
//! [`RequestThrottle`](super::RequestThrottle).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::quota::QuotaTable;

/// Default counting window (5 minutes, rolling)
pub const DEFAULT_WINDOW_SECS: u64 = 300;
/// Default cooldown after quota exhaustion (2 minutes)
pub const DEFAULT_FREEZE_SECS: u64 = 120;
/// Default polling interval for `wait_for_available_slot`
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
/// Default upper bound for `wait_for_available_slot`
pub const DEFAULT_MAX_WAIT_MS: u64 = 5_000;
/// Default storage key prefix
pub const DEFAULT_KEY_PREFIX: &str = "rate_limit";

/// What happens to a key once it exhausts its quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezePolicy {
    /// Deny unconditionally for this long
    Cooldown(Duration),
    /// Deny until the window drains on its own
    None,
}

/// Throttle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Enable throttling; when false every call is admitted
    pub enabled: bool,

    /// Counting window in seconds
    pub window_secs: u64,

    /// Freeze duration in seconds (0 disables freezing)
    pub freeze_secs: u64,

    /// Wait-loop polling interval in milliseconds
    pub poll_interval_ms: u64,

    /// Default wait bound in milliseconds
    pub max_wait_ms: u64,

    /// Prefix for every storage key the throttle owns
    pub key_prefix: String,

    /// Per-role ceilings
    pub quotas: QuotaTable,

    /// Sub-second window override, used by tests
    #[serde(skip)]
    pub window_override: Option<Duration>,

    /// Sub-second freeze override, used by tests
    #[serde(skip)]
    pub freeze_override: Option<Duration>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: DEFAULT_WINDOW_SECS,
            freeze_secs: DEFAULT_FREEZE_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            quotas: QuotaTable::default(),
            window_override: None,
            freeze_override: None,
        }
    }
}

impl ThrottleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style window override with millisecond precision
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_override = Some(window);
        self
    }

    /// Builder-style freeze policy
    pub fn with_freeze(mut self, policy: FreezePolicy) -> Self {
        match policy {
            FreezePolicy::Cooldown(duration) => self.freeze_override = Some(duration),
            FreezePolicy::None => {
                self.freeze_override = None;
                self.freeze_secs = 0;
            }
        }
        self
    }

    pub fn with_quotas(mut self, quotas: QuotaTable) -> Self {
        self.quotas = quotas;
        self
    }

    /// Disable throttling (for testing)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Load overrides from environment variables
    pub fn from_env() -> Self {
        Self::default().apply_env_overrides()
    }

    pub(crate) fn apply_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("REQUEST_THROTTLE_ENABLED") {
            self.enabled = val.parse().unwrap_or(self.enabled);
        }

        if let Ok(val) = std::env::var("REQUEST_THROTTLE_WINDOW_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                if secs > 0 {
                    self.window_secs = secs;
                }
            }
        }

        if let Ok(val) = std::env::var("REQUEST_THROTTLE_FREEZE_SECS") {
            if let Ok(secs) = val.parse() {
                self.freeze_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("REQUEST_THROTTLE_KEY_PREFIX") {
            if !val.is_empty() {
                self.key_prefix = val;
            }
        }

        self
    }

    /// Counting window
    pub fn window(&self) -> Duration {
        self.window_override
            .unwrap_or_else(|| Duration::from_secs(self.window_secs))
    }

    /// Freeze policy derived from `freeze_secs` or the override
    pub fn freeze_policy(&self) -> FreezePolicy {
        match self.freeze_override {
            Some(duration) => FreezePolicy::Cooldown(duration),
            None if self.freeze_secs == 0 => FreezePolicy::None,
            None => FreezePolicy::Cooldown(Duration::from_secs(self.freeze_secs)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.window().is_zero() {
            anyhow::bail!("Throttle window must be > 0");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("Throttle poll interval must be > 0");
        }
        if self.key_prefix.is_empty() {
            anyhow::bail!("Throttle key prefix must not be empty");
        }

        let zero = self.quotas.zero_limits();
        if !zero.is_empty() {
            anyhow::bail!("Quota ceilings must be positive, got 0 for: {:?}", zero);
        }

        if !self.quotas.is_monotonic() {
            tracing::warn!("Quota table gives a higher-trust role a lower ceiling");
        }

        Ok(())
    }
}
