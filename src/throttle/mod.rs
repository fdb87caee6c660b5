//! Request Throttle Module
//!
//! Advisory, client-side throttling of outbound API calls. Each call is
//! bucketed by the caller's role and an optional endpoint name, counted over
//! a rolling window, and denied once the role's quota is used up. A denied
//! key can additionally be frozen for a cooldown period.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RequestThrottle                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐         │
//! │  │ RoleSource  │  │ QuotaTable  │  │   Clock     │         │
//! │  └─────────────┘  └─────────────┘  └─────────────┘         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │        KeyValueStore (Memory / JSON file)            │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use request_throttle::throttle::{
//!     FixedRole, ManualClock, MemoryStore, RequestThrottle, Role, ThrottleConfig,
//! };
//! use std::sync::Arc;
//!
//! let throttle = RequestThrottle::new(
//!     ThrottleConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(ManualClock::new(0)),
//!     Arc::new(FixedRole(Role::Student)),
//! );
//!
//! assert!(throttle.make_request(Some("courses")));
//! assert_eq!(throttle.get_status(Some("courses")).remaining, 99);
//! ```

pub mod clock;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod manager;
pub mod quota;
pub mod role;
pub mod status;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FreezePolicy, ThrottleConfig};
pub use dashboard::{DashboardBuilder, DashboardData};
pub use error::StoreError;
pub use manager::{CleanupReport, RequestThrottle};
pub use quota::QuotaTable;
pub use role::{FixedRole, Role, RoleSource, SessionRoleSource};
pub use status::{Locale, ThrottleStatus};
pub use store::{FileStore, KeyState, KeyValueStore, MemoryStore, ThrottleKey};
