//! Status snapshots and user-facing limit messages

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::role::Role;

/// Point-in-time view of one throttle key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleStatus {
    pub role: Role,

    pub endpoint: Option<String>,

    /// Ceiling for the role
    pub limit: u32,

    /// Requests counted in the current window
    pub current: u32,

    /// `limit - current`, floored at zero
    pub remaining: u32,

    /// When the oldest counted request leaves the window (epoch ms)
    pub reset_time: i64,

    pub is_frozen: bool,

    /// Freeze expiry (epoch ms) while frozen
    pub freeze_end_time: Option<i64>,
}

impl ThrottleStatus {
    /// Whether a call on this key would be denied
    pub fn is_limited(&self) -> bool {
        self.is_frozen || self.remaining == 0
    }

    /// Earliest time a denied caller should retry
    pub fn retry_at(&self) -> i64 {
        self.freeze_end_time
            .filter(|_| self.is_frozen)
            .unwrap_or(self.reset_time)
    }

    /// Whole minutes until [`retry_at`](Self::retry_at), at least one
    pub fn retry_after_minutes(&self, now_ms: i64) -> i64 {
        let wait_ms = self.retry_at().saturating_sub(now_ms).max(0);
        (wait_ms.saturating_add(59_999) / 60_000).max(1)
    }

    /// `reset_time` as a UTC timestamp
    pub fn reset_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_millis(self.reset_time)
    }

    /// Human-readable summary for the caller's UI
    pub fn limit_message(&self, now_ms: i64, locale: Locale) -> String {
        if !self.is_limited() {
            return match locale {
                Locale::Arabic => format!(
                    "متبقي {} من أصل {} طلب",
                    self.remaining, self.limit
                ),
                Locale::English => format!(
                    "{} of {} requests remaining",
                    self.remaining, self.limit
                ),
            };
        }

        let minutes = self.retry_after_minutes(now_ms);
        match locale {
            Locale::Arabic => format!(
                "تم تجاوز الحد المسموح من الطلبات ({}/{}). يرجى المحاولة مرة أخرى بعد {} دقيقة",
                self.current, self.limit, minutes
            ),
            Locale::English => format!(
                "Request quota exceeded ({}/{}); retry in {} minute{}",
                self.current,
                self.limit,
                minutes,
                if minutes == 1 { "" } else { "s" }
            ),
        }
    }
}

/// Language for [`ThrottleStatus::limit_message`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Arabic,
    English,
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ar" | "arabic" => Ok(Locale::Arabic),
            "en" | "english" => Ok(Locale::English),
            other => Err(format!("Unsupported locale: {}", other)),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locale::Arabic => f.write_str("ar"),
            Locale::English => f.write_str("en"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exhausted(now: i64) -> ThrottleStatus {
        ThrottleStatus {
            role: Role::Student,
            endpoint: Some("courses".to_string()),
            limit: 100,
            current: 100,
            remaining: 0,
            reset_time: now + 90_000,
            is_frozen: false,
            freeze_end_time: None,
        }
    }

    #[test]
    fn test_exceeded_message_english() {
        let status = exhausted(0);
        assert_eq!(
            status.limit_message(0, Locale::English),
            "Request quota exceeded (100/100); retry in 2 minutes"
        );
    }

    #[test]
    fn test_exceeded_message_arabic() {
        let status = exhausted(0);
        let message = status.limit_message(0, Locale::Arabic);
        assert!(message.contains("(100/100)"));
        assert!(message.contains("2 دقيقة"));
    }

    #[test]
    fn test_frozen_message_uses_freeze_end() {
        let mut status = exhausted(0);
        status.is_frozen = true;
        status.freeze_end_time = Some(30_000);

        assert_eq!(status.retry_at(), 30_000);
        assert_eq!(
            status.limit_message(0, Locale::English),
            "Request quota exceeded (100/100); retry in 1 minute"
        );
    }

    #[test]
    fn test_retry_minutes_never_zero() {
        let status = exhausted(0);
        assert_eq!(status.retry_after_minutes(1_000_000), 1);
    }

    #[test]
    fn test_remaining_message() {
        let mut status = exhausted(0);
        status.current = 40;
        status.remaining = 60;
        assert_eq!(
            status.limit_message(0, Locale::English),
            "60 of 100 requests remaining"
        );
    }

    #[test]
    fn test_locale_parsing() {
        assert_eq!("ar".parse::<Locale>().unwrap(), Locale::Arabic);
        assert_eq!("English".parse::<Locale>().unwrap(), Locale::English);
        assert!("fr".parse::<Locale>().is_err());
    }

    #[test]
    fn test_retry_minutes_with_saturated_reset_time() {
        let status = ThrottleStatus {
            reset_time: i64::MAX,
            ..exhausted(0)
        };
        assert_eq!(status.retry_after_minutes(0), i64::MAX / 60_000);
        assert!(status.limit_message(0, Locale::English).contains("minutes"));
    }
}
