//! End-to-end session flows against the in-process backend

mod common;

use chrono::Utc;
use common::local_store;
use distsession_core::{
    AttributeMap, AttributeValue, AuthorizationNode, DistSessionError, IdentifierFactory,
    PrincipalRecord, SessionStoreConfig, UserHolder, DEFAULT_SESSION_ID_MIN_LENGTH,
};
use distsession_store::{
    DistributableSessionStore, LocalSessionManagerProvider, SessionIdentifierFactory,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn sample_user() -> PrincipalRecord {
    let mut user = PrincipalRecord::from_name("alice");
    user.attributes
        .insert("tenant".to_string(), AttributeValue::from("acme"));
    user.add_authorization(
        "roles",
        AuthorizationNode::and(vec![
            AuthorizationNode::role("admin"),
            AuthorizationNode::not(AuthorizationNode::permission("delete")),
        ]),
    );
    user
}

#[tokio::test(flavor = "multi_thread")]
async fn test_put_then_get_round_trip() {
    let store = local_store(serde_json::Value::Null).await;

    let mut session = store.create_session(Duration::from_millis(1_800_000)).unwrap();
    let id = session.id().to_string();
    session.put("visits", AttributeValue::Int(3));
    session.put("name", "alice");
    session.put("user", sample_user());
    let expected = session.data().clone();
    let created = session.creation_time();

    tokio::time::sleep(Duration::from_millis(10)).await;
    store.put(session).await.unwrap();

    let session = store.get(&id).await.unwrap().expect("session should exist");
    assert_eq!(session.data(), &expected);
    assert_eq!(session.timeout(), Duration::from_millis(1_800_000));
    assert!(session.last_accessed() > created);
    store.put(session).await.unwrap();

    assert_eq!(store.size().await.unwrap(), 1);
    assert_eq!(store.outstanding_permits(), 0);
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_session_granularity_with_json_marshaller() {
    let store = local_store(json!({ "granularity": "SESSION", "marshaller": "JSON" })).await;

    let mut session = store.create_session(Duration::from_secs(60)).unwrap();
    let id = session.id().to_string();
    session.put("count", AttributeValue::Long(7));
    session.put("ratio", AttributeValue::Double(2.5));
    session.put("seen", AttributeValue::Instant(Utc::now()));
    session.put("holder", UserHolder::new(Some(sample_user())));
    session.put("small", AttributeValue::Float(1.5));
    session.put("one", AttributeValue::Int(1));
    let expected = session.data().clone();
    store.put(session).await.unwrap();

    let mut session = store.get(&id).await.unwrap().unwrap();
    assert_eq!(session.data(), &expected);
    assert_eq!(session.remove("count"), Some(AttributeValue::Long(7)));
    store.put(session).await.unwrap();

    let session = store.get(&id).await.unwrap().unwrap();
    assert!(session.get("count").is_none());
    assert_eq!(session.get("small"), Some(&AttributeValue::Float(1.5)));
    assert_eq!(session.get("one"), Some(&AttributeValue::Int(1)));
    assert_eq!(session.data().len(), 5);
    store.put(session).await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_attribute_helpers() {
    let store = local_store(serde_json::Value::Null).await;
    let mut session = store.create_session(Duration::from_secs(60)).unwrap();
    assert!(session.is_empty());

    assert!(session.put_if_absent("a", AttributeValue::Int(1)));
    assert!(!session.put_if_absent("a", AttributeValue::Int(2)));
    assert_eq!(session.get("a"), Some(&AttributeValue::Int(1)));

    let computed = session
        .compute_if_absent("b", |key| AttributeValue::from(format!("{}-value", key)))
        .clone();
    assert_eq!(computed, AttributeValue::from("b-value"));
    assert_eq!(
        session.put("a", AttributeValue::Bool(true)),
        Some(AttributeValue::Int(1))
    );

    store.put(session).await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unmarshallable_value_fails_put() {
    let store = local_store(json!({ "marshaller": "JSON" })).await;

    let mut session = store.create_session(Duration::from_secs(60)).unwrap();
    let id = session.id().to_string();
    session.put("broken", AttributeValue::Double(f64::NAN));

    let result = store.put(session).await;
    assert!(matches!(result, Err(DistSessionError::Marshalling { .. })));
    assert_eq!(store.outstanding_permits(), 0);
    assert!(store.get(&id).await.unwrap().is_none());
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_destroy_removes_session_on_put() {
    let store = local_store(serde_json::Value::Null).await;

    let session = store.create_session(Duration::from_secs(60)).unwrap();
    let id = session.id().to_string();
    store.put(session).await.unwrap();

    let mut session = store.get(&id).await.unwrap().unwrap();
    session.destroy();
    assert!(session.is_destroyed());
    store.put(session).await.unwrap();

    assert!(store.get(&id).await.unwrap().is_none());
    assert_eq!(store.size().await.unwrap(), 0);
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_regenerate_id_moves_state() {
    let store = local_store(serde_json::Value::Null).await;

    let mut session = store.create_session(Duration::from_secs(90)).unwrap();
    let old_id = session.id().to_string();
    session.put("cart", AttributeValue::List(vec![AttributeValue::from("book")]));
    store.put(session).await.unwrap();

    let mut session = store.get(&old_id).await.unwrap().unwrap();
    session.regenerate_id().unwrap();
    assert!(session.is_regenerated());
    assert_eq!(session.old_id(), old_id);
    let new_id = session.id().to_string();
    assert_ne!(new_id, old_id);
    assert_eq!(session.timeout(), Duration::from_secs(90));
    store.put(session).await.unwrap();

    assert!(store.get(&old_id).await.unwrap().is_none());
    let session = store.get(&new_id).await.unwrap().unwrap();
    assert_eq!(
        session.get("cart"),
        Some(&AttributeValue::List(vec![AttributeValue::from("book")]))
    );
    store.put(session).await.unwrap();
    assert_eq!(store.size().await.unwrap(), 1);
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_expired_session_is_absent() {
    let store = local_store(serde_json::Value::Null).await;

    let session = store.create_session(Duration::from_millis(50)).unwrap();
    let id = session.id().to_string();
    store.put(session).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.get(&id).await.unwrap().is_none());
    assert_eq!(store.size().await.unwrap(), 0);
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_idle_sessions_are_swept() {
    let store = local_store(json!({ "idleTimeout": 50 })).await;

    for _ in 0..3 {
        let session = store.create_session(Duration::from_secs(600)).unwrap();
        store.put(session).await.unwrap();
    }
    assert_eq!(store.size().await.unwrap(), 3);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.size().await.unwrap(), 0);
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_max_active_sessions_evicts_oldest() {
    let store = local_store(json!({ "maxActiveSessions": 2 })).await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let session = store.create_session(Duration::from_secs(600)).unwrap();
        ids.push(session.id().to_string());
        store.put(session).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(store.size().await.unwrap(), 2);
    assert!(store.get(&ids[0]).await.unwrap().is_none());
    let latest = store.get(&ids[2]).await.unwrap().unwrap();
    store.put(latest).await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sweeper_shared_across_stores() {
    common::init_logging();
    let provider = Arc::new(LocalSessionManagerProvider::with_sweep_interval(
        Duration::from_millis(50),
    ));
    let first = DistributableSessionStore::new(provider.clone());
    let second = DistributableSessionStore::new(provider.clone());
    first.init(serde_json::Value::Null).await.unwrap();
    second.init(serde_json::Value::Null).await.unwrap();
    assert_eq!(provider.sweeper_leases(), 2);

    first.close().await.unwrap();
    assert_eq!(provider.sweeper_leases(), 1);
    second.close().await.unwrap();
    assert_eq!(provider.sweeper_leases(), 0);
}

#[test]
fn test_identifiers_unique_and_long_enough() {
    let config = SessionStoreConfig::default();
    let factory = SessionIdentifierFactory::new(config.session_id_length);

    let ids: HashSet<String> = (0..10_000).map(|_| factory.create_identifier()).collect();
    assert_eq!(ids.len(), 10_000);
    assert!(ids
        .iter()
        .all(|id| id.len() > DEFAULT_SESSION_ID_MIN_LENGTH));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_store_identifiers_exceed_minimum() {
    let store = local_store(serde_json::Value::Null).await;
    for _ in 0..10 {
        let session = store.create_session(Duration::from_secs(60)).unwrap();
        assert!(session.id().len() > DEFAULT_SESSION_ID_MIN_LENGTH);
        assert!(session.id().chars().all(|c| c.is_ascii_hexdigit()));
        store.put(session).await.unwrap();
    }
    assert_eq!(store.size().await.unwrap(), 10);
    store.close().await.unwrap();
}

#[test]
fn test_attribute_map_is_ordered() {
    let mut map = AttributeMap::new();
    map.insert("b".to_string(), AttributeValue::Null);
    map.insert("a".to_string(), AttributeValue::Null);
    assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_put_of_evicted_session_fails_for_both_granularities() {
    for granularity in ["SESSION", "ATTRIBUTE"] {
        let store = local_store(json!({ "granularity": granularity, "maxActiveSessions": 1 })).await;

        let first = store.create_session(Duration::from_secs(60)).unwrap();
        let first_id = first.id().to_string();
        store.put(first).await.unwrap();

        let mut first = store.get(&first_id).await.unwrap().unwrap();
        first.put("cart", AttributeValue::Int(42));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = store.create_session(Duration::from_secs(60)).unwrap();
        let second_id = second.id().to_string();
        store.put(second).await.unwrap();

        let result = store.put(first).await;
        assert!(
            matches!(result, Err(DistSessionError::Backend { .. })),
            "{} granularity accepted a write to an evicted session: {:?}",
            granularity,
            result
        );
        assert_eq!(store.outstanding_permits(), 0);
        assert!(store.get(&first_id).await.unwrap().is_none());
        assert_eq!(store.size().await.unwrap(), 1);

        let second = store.get(&second_id).await.unwrap().unwrap();
        assert!(second.get("cart").is_none());
        store.put(second).await.unwrap();
        store.close().await.unwrap();
    }
}
