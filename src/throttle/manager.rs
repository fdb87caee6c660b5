//! Request Throttle
//!
//! Gates outbound calls per role and endpoint against a rolling window and
//! freezes a key once it exhausts its quota.
//!
//! The throttle is advisory. Every store failure is logged and the call is
//! admitted, so the throttle itself can never block the application; the
//! authoritative limit is enforced by the backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::clock::{duration_ms, Clock, SystemClock};
use super::config::{FreezePolicy, ThrottleConfig};
use super::error::StoreError;
use super::role::{Role, RoleSource, SessionRoleSource};
use super::status::ThrottleStatus;
use super::store::{KeyState, KeyValueStore, ThrottleKey};
use crate::metrics;

/// Outcome of one [`RequestThrottle::cleanup`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Keys examined
    pub scanned: usize,
    /// Keys deleted (idle or unreadable)
    pub removed: usize,
    /// Keys rewritten with stale entries dropped
    pub compacted: usize,
}

/// Per-role, per-endpoint request throttle
///
/// Clones share the store and the admission lock.
#[derive(Clone)]
pub struct RequestThrottle {
    config: Arc<ThrottleConfig>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    roles: Arc<dyn RoleSource>,
    gate: Arc<Mutex<()>>,
}

impl fmt::Debug for RequestThrottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestThrottle")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RequestThrottle {
    /// Create a throttle from explicit collaborators
    pub fn new(
        config: ThrottleConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        roles: Arc<dyn RoleSource>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            clock,
            roles,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Throttle on the system clock, reading roles from session state kept
    /// in the same store
    pub fn with_session(config: ThrottleConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let roles = Arc::new(SessionRoleSource::new(store.clone()));
        Self::new(config, store, Arc::new(SystemClock), roles)
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Current caller's role; anonymous when session state is unusable
    pub fn resolve_role(&self) -> Role {
        self.roles.resolve_role()
    }

    /// Whether a call may proceed now. Never records a request or freezes
    /// the key.
    pub fn can_make_request(&self, endpoint: Option<&str>) -> bool {
        self.admit(endpoint, false)
    }

    /// Admit and record a call, freezing the key if its quota is exhausted
    pub fn make_request(&self, endpoint: Option<&str>) -> bool {
        self.admit(endpoint, true)
    }

    /// Snapshot of the current caller's bucket for `endpoint`
    pub fn get_status(&self, endpoint: Option<&str>) -> ThrottleStatus {
        let key = self.key_for(endpoint);
        let storage_key = self.storage_key(&key);
        let _guard = self.lock();
        let now = self.clock.now_ms();

        let mut state = match self.load(&storage_key, &key) {
            Ok(state) => state,
            Err(e) => {
                self.note_store_error("get", &key, &e);
                KeyState::empty(&key)
            }
        };

        if state.purge(now, self.window_ms()) {
            self.persist(&storage_key, &key, &state);
        }

        self.status_from(&state, now)
    }

    /// Poll [`can_make_request`](Self::can_make_request) until it succeeds
    /// or `max_wait` (default from config) elapses
    pub async fn wait_for_available_slot(
        &self,
        endpoint: Option<&str>,
        max_wait: Option<Duration>,
    ) -> bool {
        let max_wait = max_wait.unwrap_or_else(|| self.config.max_wait());
        let deadline = Instant::now() + max_wait;

        loop {
            if self.can_make_request(endpoint) {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(endpoint = ?endpoint, ?max_wait, "No slot became available");
                return false;
            }

            tokio::time::sleep(self.config.poll_interval().min(deadline - now)).await;
        }
    }

    /// Drop expired records, expired freezes and unreadable values for
    /// every key this throttle owns
    pub fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let _guard = self.lock();
        let now = self.clock.now_ms();

        let keys = match self.store.keys(&self.owned_prefix()) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Cleanup could not list keys");
                metrics::STORE_ERRORS_TOTAL.with_label_values(&["keys"]).inc();
                return report;
            }
        };

        for storage_key in keys {
            report.scanned += 1;

            let raw = match self.store.get(&storage_key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %storage_key, error = %e, "Cleanup could not read key");
                    metrics::STORE_ERRORS_TOTAL.with_label_values(&["get"]).inc();
                    continue;
                }
            };

            let result = match serde_json::from_str::<KeyState>(&raw) {
                Err(e) => {
                    warn!(key = %storage_key, error = %e, "Removing malformed throttle state");
                    report.removed += 1;
                    self.store.remove(&storage_key)
                }
                Ok(mut state) => {
                    let changed = state.purge(now, self.window_ms());
                    if state.is_idle() {
                        report.removed += 1;
                        self.store.remove(&storage_key)
                    } else if changed {
                        report.compacted += 1;
                        self.write(&storage_key, &state)
                    } else {
                        Ok(())
                    }
                }
            };

            if let Err(e) = result {
                warn!(key = %storage_key, error = %e, "Cleanup could not update key");
                metrics::STORE_ERRORS_TOTAL.with_label_values(&["set"]).inc();
            }
        }

        debug!(
            scanned = report.scanned,
            removed = report.removed,
            compacted = report.compacted,
            "Throttle cleanup finished"
        );
        report
    }

    /// Run [`cleanup`](Self::cleanup) every `every` on the tokio runtime
    pub fn spawn_cleanup_task(&self, every: Duration) -> JoinHandle<()> {
        let throttle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                throttle.cleanup();
            }
        })
    }

    /// Forget the current caller's records and freeze for `endpoint`
    pub fn reset(&self, endpoint: Option<&str>) {
        let key = self.key_for(endpoint);
        let storage_key = self.storage_key(&key);
        let _guard = self.lock();

        if let Err(e) = self.store.remove(&storage_key) {
            self.note_store_error("remove", &key, &e);
        } else {
            info!(role = %key.role, endpoint = ?key.endpoint, "Throttle key reset");
        }
    }

    /// Forget every key this throttle owns; returns how many were removed
    pub fn reset_all(&self) -> usize {
        let _guard = self.lock();
        let keys = match self.store.keys(&self.owned_prefix()) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Reset could not list keys");
                metrics::STORE_ERRORS_TOTAL.with_label_values(&["keys"]).inc();
                return 0;
            }
        };

        let removed = keys
            .iter()
            .filter(|key| match self.store.remove(key) {
                Ok(()) => true,
                Err(e) => {
                    warn!(key = %key, error = %e, "Reset could not remove key");
                    false
                }
            })
            .count();

        info!(removed, "All throttle keys reset");
        removed
    }

    /// Status of every readable key in the store, without persisting purges
    pub fn tracked_statuses(&self) -> Vec<ThrottleStatus> {
        let _guard = self.lock();
        let now = self.clock.now_ms();

        let keys = match self.store.keys(&self.owned_prefix()) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Could not list throttle keys");
                return Vec::new();
            }
        };

        keys.iter()
            .filter_map(|key| match self.store.get(key) {
                Ok(Some(raw)) => match serde_json::from_str::<KeyState>(&raw) {
                    Ok(state) => Some(state),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Skipping malformed throttle state");
                        None
                    }
                },
                Ok(None) => None,
                Err(e) => {
                    warn!(key = %key, error = %e, "Could not read throttle key");
                    metrics::STORE_ERRORS_TOTAL.with_label_values(&["get"]).inc();
                    None
                }
            })
            .map(|mut state| {
                state.purge(now, self.window_ms());
                self.status_from(&state, now)
            })
            .collect()
    }

    /// Current clock reading (epoch ms)
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn admit(&self, endpoint: Option<&str>, record: bool) -> bool {
        if !self.config.enabled {
            return true;
        }

        let key = self.key_for(endpoint);
        let storage_key = self.storage_key(&key);
        let role = key.role.as_str();

        // Read, compare and append form one critical section
        let _guard = self.lock();
        let now = self.clock.now_ms();

        let mut state = match self.load(&storage_key, &key) {
            Ok(state) => state,
            Err(e) => {
                self.note_store_error("get", &key, &e);
                return true;
            }
        };

        if let Some(until) = state.active_freeze(now) {
            debug!(role, endpoint = ?key.endpoint, until, "Denied: key is frozen");
            if record {
                metrics::REQUESTS_DENIED_TOTAL
                    .with_label_values(&[role, "frozen"])
                    .inc();
            }
            return false;
        }

        let mut dirty = state.purge(now, self.window_ms());
        let limit = self.config.quotas.limit(key.role);
        let admitted = state.count() < limit;

        if admitted && record {
            state.records.push(now);
            dirty = true;
            metrics::REQUESTS_ADMITTED_TOTAL.with_label_values(&[role]).inc();
        } else if !admitted {
            debug!(role, endpoint = ?key.endpoint, count = state.count(), limit, "Denied: quota exhausted");
            if record {
                metrics::REQUESTS_DENIED_TOTAL
                    .with_label_values(&[role, "quota"])
                    .inc();
                if let FreezePolicy::Cooldown(freeze) = self.config.freeze_policy() {
                    let until = now.saturating_add(duration_ms(freeze));
                    state.frozen_until = Some(until);
                    dirty = true;
                    metrics::FREEZES_TOTAL.with_label_values(&[role]).inc();
                    info!(role, endpoint = ?key.endpoint, until, "Quota exhausted, freezing key");
                }
            }
        }

        if dirty {
            self.persist(&storage_key, &key, &state);
        }

        admitted
    }

    fn key_for(&self, endpoint: Option<&str>) -> ThrottleKey {
        ThrottleKey::new(self.resolve_role(), endpoint)
    }

    fn storage_key(&self, key: &ThrottleKey) -> String {
        key.storage_key(&self.config.key_prefix)
    }

    fn owned_prefix(&self) -> String {
        format!("{}_", self.config.key_prefix)
    }

    fn window_ms(&self) -> i64 {
        duration_ms(self.config.window())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded data is (), so a poisoned lock carries no torn state
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a key's state; unreadable JSON counts as empty
    fn load(&self, storage_key: &str, key: &ThrottleKey) -> Result<KeyState, StoreError> {
        let Some(raw) = self.store.get(storage_key)? else {
            return Ok(KeyState::empty(key));
        };

        match serde_json::from_str::<KeyState>(&raw) {
            Ok(mut state) => {
                state.role = key.role;
                state.endpoint = key.endpoint.clone();
                Ok(state)
            }
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Malformed throttle state, treating as empty");
                Ok(KeyState::empty(key))
            }
        }
    }

    fn write(&self, storage_key: &str, state: &KeyState) -> Result<(), StoreError> {
        let value = serde_json::to_string(state)?;
        self.store.set(storage_key, &value)
    }

    fn persist(&self, storage_key: &str, key: &ThrottleKey, state: &KeyState) {
        let result = if state.is_idle() {
            self.store.remove(storage_key)
        } else {
            self.write(storage_key, state)
        };

        if let Err(e) = result {
            self.note_store_error("set", key, &e);
        }
    }

    fn note_store_error(&self, op: &str, key: &ThrottleKey, error: &StoreError) {
        warn!(op, role = %key.role, endpoint = ?key.endpoint, error = %error, "Throttle store failed, failing open");
        metrics::STORE_ERRORS_TOTAL.with_label_values(&[op]).inc();
    }

    fn status_from(&self, state: &KeyState, now: i64) -> ThrottleStatus {
        let limit = self.config.quotas.limit(state.role);
        let current = state.count();
        let freeze = state.active_freeze(now);

        ThrottleStatus {
            role: state.role,
            endpoint: state.endpoint.clone(),
            limit,
            current,
            remaining: limit.saturating_sub(current),
            reset_time: state
                .oldest()
                .map(|oldest| oldest.saturating_add(self.window_ms()))
                .unwrap_or(now),
            is_frozen: freeze.is_some(),
            freeze_end_time: freeze,
        }
    }
}
