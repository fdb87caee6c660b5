//! Behavioural properties of the request throttle, driven by a manual clock.

use proptest::prelude::*;
use request_throttle::throttle::{
    FileStore, FixedRole, FreezePolicy, KeyValueStore, ManualClock, MemoryStore, QuotaTable,
    RequestThrottle, Role, SessionRoleSource, ThrottleConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const START: i64 = 1_700_000_000_000;

fn scenario_config() -> ThrottleConfig {
    ThrottleConfig::new()
        .with_window(Duration::from_secs(1))
        .with_freeze(FreezePolicy::Cooldown(Duration::from_secs(2)))
        .with_quotas(QuotaTable::uniform(3))
}

fn fixed(config: ThrottleConfig, role: Role) -> (RequestThrottle, ManualClock) {
    let clock = ManualClock::new(START);
    let throttle = RequestThrottle::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(clock.clone()),
        Arc::new(FixedRole(role)),
    );
    (throttle, clock)
}

fn session(config: ThrottleConfig) -> (RequestThrottle, Arc<MemoryStore>, ManualClock) {
    let clock = ManualClock::new(START);
    let store = Arc::new(MemoryStore::new());
    let throttle = RequestThrottle::new(
        config,
        store.clone(),
        Arc::new(clock.clone()),
        Arc::new(SessionRoleSource::new(store.clone())),
    );
    (throttle, store, clock)
}

fn login(store: &MemoryStore, role: &str) {
    store
        .set("user", &format!(r#"{{"id": 1, "role": "{}"}}"#, role))
        .unwrap();
}

#[test]
fn quota_three_freeze_two_seconds() {
    let (throttle, clock) = fixed(scenario_config(), Role::Student);

    let first: Vec<bool> = (0..3).map(|_| throttle.make_request(Some("ep"))).collect();
    assert_eq!(first, vec![true, true, true]);

    assert!(!throttle.make_request(Some("ep")));
    assert!(throttle.get_status(Some("ep")).is_frozen);
    assert!(!throttle.can_make_request(Some("ep")));

    clock.advance(Duration::from_millis(2_100));
    assert!(throttle.can_make_request(Some("ep")));
}

#[test]
fn admission_boundary_at_role_limit() {
    let (throttle, _clock) = fixed(ThrottleConfig::default(), Role::Anonymous);

    for i in 0..30 {
        assert!(throttle.make_request(None), "request {i} should be admitted");
    }
    assert!(!throttle.make_request(None));
}

#[test]
fn freeze_holds_after_window_resets() {
    let (throttle, clock) = fixed(scenario_config(), Role::Student);
    for _ in 0..4 {
        throttle.make_request(Some("ep"));
    }
    let freeze_end = throttle.get_status(Some("ep")).freeze_end_time.unwrap();

    clock.advance(Duration::from_millis(1_200));
    let status = throttle.get_status(Some("ep"));
    assert_eq!(status.current, 0);
    assert!(status.is_frozen);
    assert!(!throttle.can_make_request(Some("ep")));

    clock.set(freeze_end);
    assert!(throttle.can_make_request(Some("ep")));
    assert!(!throttle.get_status(Some("ep")).is_frozen);
}

#[test]
fn window_expiry_restores_quota() {
    let config = scenario_config().with_freeze(FreezePolicy::None);
    let (throttle, clock) = fixed(config, Role::Teacher);
    for _ in 0..3 {
        assert!(throttle.make_request(Some("ep")));
    }
    assert!(!throttle.can_make_request(Some("ep")));

    clock.advance(Duration::from_millis(1_001));
    assert!(throttle.can_make_request(Some("ep")));
    let status = throttle.get_status(Some("ep"));
    assert_eq!(status.current, 0);
    assert_eq!(status.remaining, 3);
}

#[test]
fn roles_count_independently() {
    let config = ThrottleConfig::default()
        .with_quotas(QuotaTable::default().with_limit(Role::Student, 2).with_limit(Role::Teacher, 4));
    let (throttle, store, _clock) = session(config);

    login(&store, "student");
    assert!(throttle.make_request(Some("x")));
    assert!(throttle.make_request(Some("x")));
    assert!(!throttle.make_request(Some("x")));

    login(&store, "teacher");
    let status = throttle.get_status(Some("x"));
    assert_eq!(status.role, Role::Teacher);
    assert_eq!(status.current, 0);
    assert_eq!(status.limit, 4);
    assert!(!status.is_frozen);
    assert!(throttle.make_request(Some("x")));

    login(&store, "student");
    assert!(throttle.get_status(Some("x")).is_frozen);
}

#[test]
fn endpoints_count_independently() {
    let (throttle, _clock) = fixed(scenario_config(), Role::Student);
    for _ in 0..3 {
        throttle.make_request(Some("courses"));
    }
    throttle.make_request(Some("profile"));

    assert_eq!(throttle.get_status(Some("courses")).current, 3);
    assert_eq!(throttle.get_status(Some("profile")).current, 1);
    assert_eq!(throttle.get_status(None).current, 0);
    assert!(throttle.can_make_request(Some("profile")));
}

#[test]
fn malformed_session_falls_back_to_anonymous() {
    let (throttle, store, _clock) = session(ThrottleConfig::default());
    store.set("user", "{{{{").unwrap();

    assert_eq!(throttle.resolve_role(), Role::Anonymous);
    let status = throttle.get_status(None);
    assert_eq!(status.role, Role::Anonymous);
    assert_eq!(status.limit, 30);
}

#[test]
fn malformed_record_state_reads_as_empty() {
    let (throttle, store, _clock) = session(ThrottleConfig::default());
    login(&store, "admin");
    store.set("rate_limit_admin_reports", "\u{0}binary").unwrap();

    let status = throttle.get_status(Some("reports"));
    assert_eq!(status.current, 0);
    assert_eq!(status.remaining, 1000);
}

#[test]
fn state_survives_reopening_file_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let clock = ManualClock::new(START);

    let open = |clock: &ManualClock| {
        RequestThrottle::new(
            scenario_config(),
            Arc::new(FileStore::open(&path).unwrap()),
            Arc::new(clock.clone()),
            Arc::new(FixedRole(Role::Student)),
        )
    };

    let throttle = open(&clock);
    for _ in 0..4 {
        throttle.make_request(Some("ep"));
    }
    drop(throttle);

    let reopened = open(&clock);
    let status = reopened.get_status(Some("ep"));
    assert_eq!(status.current, 3);
    assert!(status.is_frozen);
}

#[test]
fn concurrent_callers_never_exceed_quota() {
    let (throttle, _clock) = fixed(
        ThrottleConfig::default().with_quotas(QuotaTable::uniform(50)),
        Role::Student,
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let throttle = throttle.clone();
            std::thread::spawn(move || {
                (0..20).filter(|_| throttle.make_request(Some("ep"))).count()
            })
        })
        .collect();

    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 50);
    assert_eq!(throttle.get_status(Some("ep")).current, 50);
}

proptest! {
    #[test]
    fn accepted_requests_are_counted(n in 0u32..=100) {
        let (throttle, _clock) = fixed(ThrottleConfig::default(), Role::Student);
        for _ in 0..n {
            prop_assert!(throttle.make_request(Some("ep")));
        }

        let status = throttle.get_status(Some("ep"));
        prop_assert_eq!(status.current, n);
        prop_assert_eq!(status.remaining, 100 - n);
    }

    #[test]
    fn checks_never_change_the_count(recorded in 0u32..10, checks in 0usize..50) {
        let (throttle, _clock) = fixed(ThrottleConfig::default(), Role::Student);
        for _ in 0..recorded {
            throttle.make_request(None);
        }
        for _ in 0..checks {
            throttle.can_make_request(None);
        }
        prop_assert_eq!(throttle.get_status(None).current, recorded);
    }

    #[test]
    fn arbitrary_stored_bytes_never_panic(garbage in ".*") {
        let (throttle, store, _clock) = session(ThrottleConfig::default());
        store.set("user", &garbage).unwrap();
        store.set("rate_limit_anonymous", &garbage).unwrap();

        let _ = throttle.resolve_role();
        let status = throttle.get_status(None);
        prop_assert!(status.current <= status.limit);
        throttle.cleanup();
    }
}
