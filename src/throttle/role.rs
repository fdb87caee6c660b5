//! Caller roles and role resolution
//!
//! The throttle never owns session state. It asks a [`RoleSource`] which
//! role the current caller has and falls back to [`Role::Anonymous`] when
//! nothing usable is stored.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::store::KeyValueStore;

/// Privilege tier of the calling user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Anonymous,
    Student,
    Teacher,
    Supervisor,
    GeneralSupervisor,
    AcademicSupervisor,
    Admin,
}

impl Role {
    /// Every role, lowest trust first
    pub const ALL: [Role; 7] = [
        Role::Anonymous,
        Role::Student,
        Role::Teacher,
        Role::Supervisor,
        Role::GeneralSupervisor,
        Role::AcademicSupervisor,
        Role::Admin,
    ];

    /// Stable name used in storage keys and config files
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Anonymous => "anonymous",
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Supervisor => "supervisor",
            Role::GeneralSupervisor => "general_supervisor",
            Role::AcademicSupervisor => "academic_supervisor",
            Role::Admin => "admin",
        }
    }

    /// Trust rank; the three supervisor tiers share one rank
    pub fn trust_rank(&self) -> u8 {
        match self {
            Role::Anonymous => 0,
            Role::Student => 1,
            Role::Teacher => 2,
            Role::Supervisor | Role::GeneralSupervisor | Role::AcademicSupervisor => 3,
            Role::Admin => 4,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised role name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Answers "who is calling right now"
pub trait RoleSource: Send + Sync {
    /// Resolve the current role. Must not fail; unknown state maps to
    /// [`Role::Anonymous`].
    fn resolve_role(&self) -> Role;
}

/// Always reports the same role
#[derive(Debug, Clone, Copy)]
pub struct FixedRole(pub Role);

impl RoleSource for FixedRole {
    fn resolve_role(&self) -> Role {
        self.0
    }
}

/// Default key holding the serialized user object
pub const DEFAULT_USER_KEY: &str = "user";

/// Default key holding a bare role string
pub const DEFAULT_ROLE_KEY: &str = "user_role";

#[derive(Debug, Deserialize)]
struct StoredUser {
    role: Option<String>,
    user_type: Option<String>,
}

/// Reads the role from session state kept in the key/value store
///
/// The user object under `user_key` is JSON with a `role` (or `user_type`)
/// field. When that is missing, a plain role string under `role_key` is
/// tried.
#[derive(Clone)]
pub struct SessionRoleSource {
    store: Arc<dyn KeyValueStore>,
    user_key: String,
    role_key: String,
}

impl SessionRoleSource {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_keys(store, DEFAULT_USER_KEY, DEFAULT_ROLE_KEY)
    }

    pub fn with_keys(store: Arc<dyn KeyValueStore>, user_key: &str, role_key: &str) -> Self {
        Self {
            store,
            user_key: user_key.to_string(),
            role_key: role_key.to_string(),
        }
    }

    fn role_from_user(&self) -> Option<Role> {
        let raw = match self.store.get(&self.user_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %self.user_key, error = %e, "Failed to read session user");
                return None;
            }
        };

        let user: StoredUser = match serde_json::from_str(&raw) {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(key = %self.user_key, error = %e, "Malformed session user, treating as anonymous");
                return None;
            }
        };

        let name = user.role.or(user.user_type)?;
        parse_role_lossy(&name)
    }

    fn role_from_key(&self) -> Option<Role> {
        match self.store.get(&self.role_key) {
            // Older sessions stored the role JSON-quoted
            Ok(Some(raw)) => parse_role_lossy(raw.trim().trim_matches('"')),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %self.role_key, error = %e, "Failed to read session role");
                None
            }
        }
    }
}

impl RoleSource for SessionRoleSource {
    fn resolve_role(&self) -> Role {
        self.role_from_user()
            .or_else(|| self.role_from_key())
            .unwrap_or(Role::Anonymous)
    }
}

fn parse_role_lossy(name: &str) -> Option<Role> {
    match name.parse() {
        Ok(role) => Some(role),
        Err(e) => {
            tracing::warn!(error = %e, "Unrecognised session role, treating as anonymous");
            None
        }
    }
}
