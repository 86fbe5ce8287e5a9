//! kvguard Membership Filter Tests
//!
//! Filter behaviour against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use kvguard_filter::{FilterConfig, MembershipFilter};
use kvguard_store::{KeyValueStore, MemoryStore, NodeConnection};

async fn filter(store: &MemoryStore, config: FilterConfig) -> MembershipFilter {
    MembershipFilter::create(Arc::new(store.clone()), config)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_add_then_test() {
    let store = MemoryStore::standalone();
    let users = filter(&store, FilterConfig::new("users", 100)).await;

    users.add("x").await.unwrap();
    assert!(users.test("x").await.unwrap());
    // Idempotent
    users.add("x").await.unwrap();
    assert!(users.test("x").await.unwrap());
}

#[tokio::test]
async fn test_no_false_negatives() {
    let store = MemoryStore::standalone();
    let users = filter(&store, FilterConfig::new("users", 1_000)).await;

    for i in 0..1_000 {
        users.add(&format!("member-{}", i)).await.unwrap();
    }
    for i in 0..1_000 {
        assert!(users.test(&format!("member-{}", i)).await.unwrap());
    }
}

#[tokio::test]
async fn test_false_positive_rate_near_target() {
    let store = MemoryStore::standalone();
    let users = filter(&store, FilterConfig::new("users", 100)).await;

    for i in 0..100 {
        users.add(&format!("added-{}", i)).await.unwrap();
    }

    let trials = 10_000;
    let mut false_positives = 0;
    for i in 0..trials {
        if users.test(&format!("absent-{}", i)).await.unwrap() {
            false_positives += 1;
        }
    }
    let rate = false_positives as f64 / trials as f64;
    assert!(rate < 0.06, "false positive rate {} too high", rate);
}

#[tokio::test]
async fn test_create_allocates_bit_array() {
    let store = MemoryStore::standalone();
    let users = filter(&store, FilterConfig::new("users", 100)).await;

    assert_eq!(users.state().bit_array_size, 730);
    assert!(store.contains_key("users"));
    assert!(!users.test("anything").await.unwrap());
}

#[tokio::test]
async fn test_existing_key_is_adopted() {
    let store = MemoryStore::standalone();
    let first = filter(&store, FilterConfig::new("users", 100)).await;
    first.add("alice").await.unwrap();

    // Re-creating must neither reset bits nor apply an expiration
    let second = filter(
        &store,
        FilterConfig::new("users", 100).with_expiration(60_000),
    )
    .await;
    assert!(second.test("alice").await.unwrap());

    let mut conn = store.connection_for("users").await.unwrap();
    assert_eq!(conn.pttl("users").await.unwrap(), None);
}

#[tokio::test]
async fn test_expiration_applied_on_create() {
    let store = MemoryStore::standalone();
    let sessions = filter(
        &store,
        FilterConfig::new("sessions", 100).with_expiration(30),
    )
    .await;
    sessions.add("s1").await.unwrap();
    assert!(sessions.test("s1").await.unwrap());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!store.contains_key("sessions"));
    assert!(!sessions.test("s1").await.unwrap());
}

#[tokio::test]
async fn test_zero_expiration_keeps_bit_array() {
    let store = MemoryStore::standalone();
    let sessions = filter(
        &store,
        FilterConfig::new("sessions", 100).with_expiration(0),
    )
    .await;

    assert!(store.contains_key("sessions"));
    let mut conn = store.connection_for("sessions").await.unwrap();
    assert_eq!(conn.pttl("sessions").await.unwrap(), None);
    sessions.add("s1").await.unwrap();
    assert!(sessions.test("s1").await.unwrap());
}

#[tokio::test]
async fn test_invalid_config_rejected_before_store_access() {
    // An unreachable store proves validation happens first
    let store = MemoryStore::standalone();
    store.set_unavailable(true);
    let store: Arc<dyn KeyValueStore> = Arc::new(store);

    for config in [
        FilterConfig::new("f", 100).with_error_rate(1.5),
        FilterConfig::new("f", 100).with_error_rate(-0.5),
        FilterConfig::new("f", 0),
        FilterConfig::new("", 100),
        FilterConfig::new("f", 1_000_000_000).with_error_rate(0.001),
    ] {
        let err = MembershipFilter::create(store.clone(), config)
            .await
            .err()
            .unwrap();
        assert!(err.is_configuration(), "unexpected error: {}", err);
    }

    let err = MembershipFilter::create(store, FilterConfig::new("f", 100))
        .await
        .err()
        .unwrap();
    assert!(err.is_infrastructure());
}

#[tokio::test]
async fn test_sharded_filter_lives_on_owning_node() {
    let store = MemoryStore::sharded(3, 1);
    let users = filter(&store, FilterConfig::new("users", 100)).await;
    users.add("bob").await.unwrap();
    assert!(users.test("bob").await.unwrap());

    let node = store.topology().node_owning("users").await.unwrap();
    let conn = store.connection_for("users").await.unwrap();
    assert_eq!(conn.node(), &node);
}
