//! Role quota table
//!
//! Maps every [`Role`] to the number of requests it may make per window.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::role::Role;

/// Default per-window request ceilings
pub const DEFAULT_ANONYMOUS_LIMIT: u32 = 30;
pub const DEFAULT_STUDENT_LIMIT: u32 = 100;
pub const DEFAULT_TEACHER_LIMIT: u32 = 200;
pub const DEFAULT_SUPERVISOR_LIMIT: u32 = 500;
pub const DEFAULT_ADMIN_LIMIT: u32 = 1000;

/// Role → request ceiling per window
///
/// Always holds an entry for every role. Partial tables (from a config file)
/// are completed with the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<Role, u32>", into = "BTreeMap<Role, u32>")]
pub struct QuotaTable {
    limits: BTreeMap<Role, u32>,
}

impl QuotaTable {
    /// Ceiling for `role`
    pub fn limit(&self, role: Role) -> u32 {
        self.limits
            .get(&role)
            .copied()
            .unwrap_or_else(|| default_limit(role))
    }

    /// Replace one ceiling
    pub fn with_limit(mut self, role: Role, limit: u32) -> Self {
        self.limits.insert(role, limit);
        self
    }

    /// Same ceiling for every role
    pub fn uniform(limit: u32) -> Self {
        Self {
            limits: Role::ALL.into_iter().map(|role| (role, limit)).collect(),
        }
    }

    /// Roles whose ceiling is zero
    pub fn zero_limits(&self) -> Vec<Role> {
        self.limits
            .iter()
            .filter(|(_, limit)| **limit == 0)
            .map(|(role, _)| *role)
            .collect()
    }

    /// Whether higher-trust roles never get a lower ceiling than
    /// lower-trust ones
    pub fn is_monotonic(&self) -> bool {
        Role::ALL.iter().all(|low| {
            Role::ALL
                .iter()
                .filter(|high| high.trust_rank() > low.trust_rank())
                .all(|high| self.limit(*high) >= self.limit(*low))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, u32)> + '_ {
        self.limits.iter().map(|(role, limit)| (*role, *limit))
    }
}

fn default_limit(role: Role) -> u32 {
    match role {
        Role::Anonymous => DEFAULT_ANONYMOUS_LIMIT,
        Role::Student => DEFAULT_STUDENT_LIMIT,
        Role::Teacher => DEFAULT_TEACHER_LIMIT,
        Role::Supervisor | Role::GeneralSupervisor | Role::AcademicSupervisor => {
            DEFAULT_SUPERVISOR_LIMIT
        }
        Role::Admin => DEFAULT_ADMIN_LIMIT,
    }
}

impl Default for QuotaTable {
    fn default() -> Self {
        Self {
            limits: Role::ALL
                .into_iter()
                .map(|role| (role, default_limit(role)))
                .collect(),
        }
    }
}

impl From<BTreeMap<Role, u32>> for QuotaTable {
    fn from(overrides: BTreeMap<Role, u32>) -> Self {
        let mut table = Self::default();
        table.limits.extend(overrides);
        table
    }
}

impl From<QuotaTable> for BTreeMap<Role, u32> {
    fn from(table: QuotaTable) -> Self {
        table.limits
    }
}
