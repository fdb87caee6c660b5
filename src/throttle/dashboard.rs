//! Usage dashboard
//!
//! Whole-store snapshot of every tracked throttle key, grouped by role.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::config::ThrottleConfig;
use super::manager::RequestThrottle;
use super::role::Role;
use super::status::ThrottleStatus;

/// Dashboard data for an admin view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardData {
    /// Timestamp of data generation
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub summary: UsageSummary,

    /// Per-role aggregates
    pub roles: Vec<RoleUsage>,

    /// Every tracked key
    pub keys: Vec<ThrottleStatus>,

    pub config: ThrottleConfig,
}

/// Totals across all keys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub tracked_keys: usize,

    /// Requests counted in the current window, all keys
    pub total_requests: u64,

    pub frozen_keys: usize,

    /// Keys with no remaining quota
    pub exhausted_keys: usize,

    /// Mean `current / limit` across keys, in percent
    pub avg_utilization_percent: f64,
}

/// Aggregate for one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleUsage {
    pub role: Role,
    pub limit: u32,
    pub endpoints: usize,
    pub total_requests: u64,
    pub frozen_endpoints: usize,
}

/// Builds [`DashboardData`] from a throttle
pub struct DashboardBuilder {
    throttle: RequestThrottle,
}

impl DashboardBuilder {
    pub fn new(throttle: RequestThrottle) -> Self {
        Self { throttle }
    }

    pub fn build(&self) -> DashboardData {
        let mut keys = self.throttle.tracked_statuses();
        keys.sort_by(|a, b| (a.role, &a.endpoint).cmp(&(b.role, &b.endpoint)));

        let timestamp = chrono::DateTime::from_timestamp_millis(self.throttle.now_ms())
            .unwrap_or_else(chrono::Utc::now);

        DashboardData {
            timestamp,
            summary: summarize(&keys),
            roles: group_by_role(&keys),
            keys,
            config: self.throttle.config().clone(),
        }
    }
}

fn summarize(keys: &[ThrottleStatus]) -> UsageSummary {
    let total_utilization: f64 = keys
        .iter()
        .map(|k| f64::from(k.current) / f64::from(k.limit.max(1)) * 100.0)
        .sum();

    UsageSummary {
        tracked_keys: keys.len(),
        total_requests: keys.iter().map(|k| u64::from(k.current)).sum(),
        frozen_keys: keys.iter().filter(|k| k.is_frozen).count(),
        exhausted_keys: keys.iter().filter(|k| k.remaining == 0).count(),
        avg_utilization_percent: if keys.is_empty() {
            0.0
        } else {
            total_utilization / keys.len() as f64
        },
    }
}

fn group_by_role(keys: &[ThrottleStatus]) -> Vec<RoleUsage> {
    let mut roles: BTreeMap<Role, RoleUsage> = BTreeMap::new();

    for key in keys {
        let usage = roles.entry(key.role).or_insert_with(|| RoleUsage {
            role: key.role,
            limit: key.limit,
            endpoints: 0,
            total_requests: 0,
            frozen_endpoints: 0,
        });
        usage.endpoints += 1;
        usage.total_requests += u64::from(key.current);
        if key.is_frozen {
            usage.frozen_endpoints += 1;
        }
    }

    roles.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::clock::ManualClock;
    use crate::throttle::quota::QuotaTable;
    use crate::throttle::role::SessionRoleSource;
    use crate::throttle::store::{KeyValueStore, MemoryStore};
    use std::sync::Arc;

    #[test]
    fn test_dashboard_groups_roles() {
        let store = Arc::new(MemoryStore::new());
        let throttle = RequestThrottle::new(
            ThrottleConfig::new().with_quotas(QuotaTable::uniform(2)),
            store.clone(),
            Arc::new(ManualClock::new(1_700_000_000_000)),
            Arc::new(SessionRoleSource::new(store.clone())),
        );

        store.set("user", r#"{"role":"student"}"#).unwrap();
        throttle.make_request(Some("courses"));
        throttle.make_request(Some("courses"));
        throttle.make_request(Some("courses"));
        throttle.make_request(Some("profile"));

        store.set("user", r#"{"role":"teacher"}"#).unwrap();
        throttle.make_request(None);

        let dashboard = DashboardBuilder::new(throttle).build();

        assert_eq!(dashboard.summary.tracked_keys, 3);
        assert_eq!(dashboard.summary.total_requests, 4);
        assert_eq!(dashboard.summary.frozen_keys, 1);
        assert_eq!(dashboard.summary.exhausted_keys, 1);

        assert_eq!(dashboard.roles.len(), 2);
        assert_eq!(dashboard.roles[0].role, Role::Student);
        assert_eq!(dashboard.roles[0].endpoints, 2);
        assert_eq!(dashboard.roles[0].frozen_endpoints, 1);
        assert_eq!(dashboard.roles[1].role, Role::Teacher);
        assert_eq!(dashboard.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_empty_dashboard() {
        assert_eq!(summarize(&[]), UsageSummary::default());
    }

    #[test]
    fn test_usage_summary_serialization() {
        let summary = UsageSummary {
            tracked_keys: 4,
            total_requests: 120,
            frozen_keys: 1,
            exhausted_keys: 1,
            avg_utilization_percent: 37.5,
        };

        let json = serde_json::to_string(&summary).unwrap();
        let parsed: UsageSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, summary);
    }
}
