//! Request Throttle Library
//!
//! Advisory per-role, per-endpoint throttling of outbound API calls, with
//! persistent request records, cooldown freezes, and localized limit
//! messages.

pub mod config;
pub mod metrics;
pub mod throttle;

pub use throttle::{RequestThrottle, Role, ThrottleConfig, ThrottleStatus};
