#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use caller_api::{BrokerEndpoint, Endpoint, QoS};
use caller_core::{
    ConnectionManager, ConnectionState, CoreError, Session, SessionConfig, SessionContext,
    handler, topics,
};
use caller_core::reconcile::PATIENT_UPDATE_ROUTE;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use common::{MemoryBroker, Reply, ScriptedBackend, doctor, eventually, org1, page, row};

const STATUS_TOPIC: &str = "M/TRANSFER/ORG_DOCS_STATUS_SYNC/ORG1";
const ECHO_TOPIC: &str = "M/TRANSFER/ECHO/ORG1";

fn config() -> SessionConfig {
    SessionConfig {
        client_id: Some("caller_test0001".into()),
        link_wait: Duration::from_secs(1),
        ..SessionConfig::default()
    }
}

fn session(broker: &MemoryBroker) -> Session {
    Session::new(config(), broker.connector(), ScriptedBackend::new())
}

async fn linked(broker: &MemoryBroker) -> Session {
    let s = session(broker);
    s.link_session(false, "broker.local", 8083, org1(), Some(doctor(7)))
        .await
        .unwrap();
    s
}

fn counter() -> (Arc<AtomicUsize>, caller_core::Handler) {
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&hits);
    let h = handler(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (hits, h)
}

// ── Linking ─────────────────────────────────────────────────────────

#[tokio::test]
async fn link_connects_follows_status_and_beats() {
    let broker = MemoryBroker::new();
    let s = linked(&broker).await;

    assert_eq!(s.state(), ConnectionState::Connected);
    assert!(broker.subscribes().contains(&STATUS_TOPIC.to_owned()));
    assert!(s.heartbeat_running());

    let beat_topic = topics::doctor_heartbeat("ORG1", 7);
    eventually(|| !broker.publishes_on(&beat_topic).is_empty()).await;
    let beacon: Value = serde_json::from_slice(&broker.publishes_on(&beat_topic)[0]).unwrap();
    assert_eq!(beacon["status"], json!("online"));
    assert_eq!(beacon["doc_id"], json!(7));
    assert_eq!(beacon["org_code"], json!("ORG1"));
    assert_eq!(beacon["client_id"], json!("caller_test0001"));
}

#[tokio::test]
async fn relinking_same_org_does_not_reconnect() {
    let broker = MemoryBroker::new();
    let s = linked(&broker).await;

    s.link_session(false, "broker.local", 8083, org1(), Some(doctor(7)))
        .await
        .unwrap();

    assert_eq!(broker.opens(), 1);
}

#[tokio::test]
async fn relinking_with_new_user_only_rebinds_heartbeat() {
    let broker = MemoryBroker::new();
    let s = linked(&broker).await;

    s.link_session(false, "broker.local", 8083, org1(), Some(doctor(8)))
        .await
        .unwrap();

    assert_eq!(broker.opens(), 1);
    assert_eq!(s.context().doctor_id(), Some(8));
    let beat_topic = topics::doctor_heartbeat("ORG1", 8);
    eventually(|| !broker.publishes_on(&beat_topic).is_empty()).await;
}

#[tokio::test]
async fn switching_org_drops_the_old_org_topics() {
    let broker = MemoryBroker::new();
    let s = linked(&broker).await;
    let old_update = topics::patient_update("ORG1", 40);
    let mut org2 = org1();
    org2.org_code = "ORG2".into();
    org2.dept_id = 41;

    s.link_session(false, "broker.local", 8083, org2, None)
        .await
        .unwrap();

    let unsubscribed = broker.unsubscribes();
    assert!(unsubscribed.contains(&STATUS_TOPIC.to_owned()));
    assert!(unsubscribed.contains(&old_update));
    let registry = s.connection().registry();
    assert!(!registry.is_tracked(&old_update));
    assert!(registry.is_tracked(&topics::patient_update("ORG2", 41)));
    assert!(registry.is_tracked("M/TRANSFER/ORG_DOCS_STATUS_SYNC/ORG2"));
}

#[tokio::test]
async fn rejected_credentials_fail_the_link() {
    let broker = MemoryBroker::new();
    broker.refuse_auth("bad username or password");
    let s = session(&broker);

    let err = s
        .link_session(false, "broker.local", 8083, org1(), Some(doctor(7)))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
    assert_eq!(s.state(), ConnectionState::Disconnected);
    assert!(!s.heartbeat_running());
}

#[tokio::test(start_paused = true)]
async fn slow_broker_link_continues_and_subscribes_on_connack() {
    let broker = MemoryBroker::silent();
    let s = session(&broker);

    s.link_session(false, "broker.local", 8083, org1(), Some(doctor(7)))
        .await
        .unwrap();

    assert!(!s.is_connected());
    assert!(s.connection().registry().is_tracked(STATUS_TOPIC));
    assert!(broker.subscribes().is_empty());

    // Beats are skipped until the link is up.
    tokio::time::sleep(Duration::from_secs(45)).await;
    assert!(broker.publishes_on(&topics::doctor_heartbeat("ORG1", 7)).is_empty());

    broker.connack().await;
    eventually(|| broker.subscribe_count(STATUS_TOPIC) == 1).await;
}

// ── Registry behavior through the session ───────────────────────────

#[tokio::test]
async fn subscribe_requires_connection() {
    let broker = MemoryBroker::new();
    let s = session(&broker);

    let err = s.subscribe("M/TRANSFER/X", QoS::AtMostOnce).await.unwrap_err();

    assert!(matches!(err, CoreError::NotConnected));
    assert!(broker.subscribes().is_empty());
}

#[tokio::test]
async fn subscriptions_replay_after_reconnect() {
    let broker = MemoryBroker::new();
    let s = linked(&broker).await;
    let topic = ECHO_TOPIC.to_owned();
    let (hits, h) = counter();
    let _handle = s.subscribe_with(&topic, QoS::AtMostOnce, h).await.unwrap();

    broker.drop_link().await;
    eventually(|| s.state() == ConnectionState::Reconnecting { attempt: 1 }).await;
    let before = broker.subscribe_count(&topic);

    broker.connack().await;
    eventually(|| broker.subscribe_count(&topic) > before).await;
    eventually(|| broker.subscribe_count(STATUS_TOPIC) >= 2).await;
    assert!(s.is_connected());

    broker.deliver(&topic, &json!({"dept": 40})).await;
    eventually(|| hits.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn subscribe_once_fires_a_single_time() {
    let broker = MemoryBroker::new();
    let s = linked(&broker).await;
    let topic = ECHO_TOPIC.to_owned();
    let (hits, h) = counter();

    s.subscribe_once(&topic, h, Some("first-status")).await.unwrap();
    broker.deliver(&topic, &json!({"n": 1})).await;
    broker.deliver(&topic, &json!({"n": 2})).await;
    // A later status push proves both deliveries were processed.
    broker
        .deliver(STATUS_TOPIC, &json!({"doc": 7, "wait_count": 1}))
        .await;
    eventually(|| s.store().status().wait_count == 1).await;

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!s.connection().registry().has_handler("first-status"));
    eventually(|| broker.unsubscribes().contains(&topic)).await;
}

#[tokio::test]
async fn handle_unsubscribe_drops_route_and_topic() {
    let broker = MemoryBroker::new();
    let s = linked(&broker).await;
    let topic = ECHO_TOPIC.to_owned();
    let (_hits, h) = counter();

    let handle = s.subscribe_with(&topic, QoS::AtMostOnce, h).await.unwrap();
    handle.unsubscribe().await.unwrap();

    assert!(!s.connection().registry().has_handler(&topic));
    assert!(!s.connection().registry().is_tracked(&topic));
    assert!(broker.unsubscribes().contains(&topic));
}

#[tokio::test]
async fn unsubscribing_unknown_topic_is_harmless() {
    let broker = MemoryBroker::new();
    let s = linked(&broker).await;

    s.unsubscribe("M/TRANSFER/NOBODY", Some("ghost")).await.unwrap();
}

#[tokio::test]
async fn failing_handler_does_not_block_status_updates() {
    let broker = MemoryBroker::new();
    let s = linked(&broker).await;
    s.set_handler(
        "boom",
        "M/TRANSFER/#",
        handler(|_| panic!("handler exploded")),
    )
    .unwrap();

    broker
        .deliver(STATUS_TOPIC, &json!({"doc": 7, "wait_count": 4}))
        .await;

    eventually(|| s.store().status().wait_count == 4).await;
}

#[tokio::test]
async fn publish_goes_through_the_link() {
    let broker = MemoryBroker::new();
    let s = linked(&broker).await;

    s.publish("M/TRANSFER/ECHO", "hello").await.unwrap();

    assert_eq!(broker.publishes_on("M/TRANSFER/ECHO"), vec!["hello"]);
}

// ── Reconciliation ──────────────────────────────────────────────────

#[tokio::test]
async fn patient_update_push_refreshes_the_queue() {
    let broker = MemoryBroker::new();
    let backend = ScriptedBackend::new();
    backend.reply(
        Endpoint::ListQueue,
        Reply::Data(page(vec![row("A100", 2), row("A101", 2)])),
    );
    let s = Session::new(config(), broker.connector(), backend.clone());
    s.link_session(false, "broker.local", 8083, org1(), Some(doctor(7)))
        .await
        .unwrap();
    let topic = topics::patient_update("ORG1", 40);

    assert!(broker.subscribes().contains(&topic));
    assert!(s.connection().registry().has_handler(PATIENT_UPDATE_ROUTE));
    assert!(s.store().entries().is_empty());

    broker.deliver(&topic, &json!({"dept_id": 40})).await;

    eventually(|| s.store().entries().len() == 2).await;
    assert_eq!(backend.call_count(Endpoint::ListQueue), 1);
}

#[tokio::test]
async fn status_push_for_bound_doctor_updates_counters() {
    let broker = MemoryBroker::new();
    let s = linked(&broker).await;

    broker
        .deliver(STATUS_TOPIC, &json!({"doc": 7, "wait_count": 4}))
        .await;
    eventually(|| s.store().status().wait_count == 4).await;

    broker
        .deliver(STATUS_TOPIC, &json!({"doc": 9, "wait_count": 11}))
        .await;
    broker.deliver_raw(STATUS_TOPIC, b"{not json").await;
    broker
        .deliver(STATUS_TOPIC, &json!({"data": {"doc_id": 7, "call_count": 2}}))
        .await;
    eventually(|| s.store().status().call_count == 2).await;

    assert_eq!(s.store().status().wait_count, 4);
}

// ── Teardown ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn disconnect_stops_beacons_and_clears_subscriptions() {
    let broker = MemoryBroker::new();
    let s = linked(&broker).await;
    let beat_topic = topics::doctor_heartbeat("ORG1", 7);
    eventually(|| !broker.publishes_on(&beat_topic).is_empty()).await;

    s.disconnect();
    let sent = broker.publishes_on(&beat_topic).len();
    tokio::time::sleep(Duration::from_secs(95)).await;

    assert_eq!(broker.publishes_on(&beat_topic).len(), sent);
    assert!(!s.heartbeat_running());
    assert_eq!(s.state(), ConnectionState::Disconnected);
    assert_eq!(broker.terminations(), 1);
    assert!(s.connection().registry().handler_keys().is_empty());
    assert!(s.connection().registry().tracked().is_empty());

    s.disconnect();
    assert_eq!(broker.terminations(), 1);
}

#[tokio::test(start_paused = true)]
async fn beacons_repeat_every_period() {
    let broker = MemoryBroker::new();
    let s = linked(&broker).await;
    let beat_topic = topics::doctor_heartbeat("ORG1", 7);
    eventually(|| broker.publishes_on(&beat_topic).len() == 1).await;

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(broker.publishes_on(&beat_topic).len(), 3);
    s.disconnect();
}

#[tokio::test]
async fn no_heartbeat_without_a_user() {
    let broker = MemoryBroker::new();
    let s = session(&broker);

    s.link_session(false, "broker.local", 8083, org1(), None)
        .await
        .unwrap();

    assert!(!s.heartbeat_running());
    assert!(s.is_connected());
}

#[tokio::test]
async fn logout_forgets_everything() {
    let broker = MemoryBroker::new();
    let s = linked(&broker).await;
    broker
        .deliver(STATUS_TOPIC, &json!({"doc": 7, "wait_count": 4}))
        .await;
    eventually(|| s.store().status().wait_count == 4).await;

    s.logout();

    assert_eq!(s.context(), SessionContext::default());
    assert_eq!(s.store().status().wait_count, 0);
    assert_eq!(s.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn sessions_are_independent() {
    let a_broker = MemoryBroker::new();
    let b_broker = MemoryBroker::new();
    let a = linked(&a_broker).await;
    let b = linked(&b_broker).await;

    a.disconnect();

    assert!(!a.is_connected());
    assert!(b.is_connected());
}

// ── ConnectionManager ───────────────────────────────────────────────

#[tokio::test]
async fn connect_to_same_endpoint_is_idempotent() {
    let broker = MemoryBroker::new();
    let conn = ConnectionManager::new(broker.connector(), config().connect_options());
    let endpoint = BrokerEndpoint::new(true, "broker.local", 8084);

    conn.connect(&endpoint).unwrap();
    conn.wait_connected(Duration::from_secs(1)).await.unwrap();
    conn.connect(&endpoint).unwrap();

    assert_eq!(broker.opens(), 1);
    assert_eq!(conn.client_id(), "caller_test0001");

    conn.connect(&BrokerEndpoint::new(true, "other.local", 8084))
        .unwrap();
    assert_eq!(broker.opens(), 2);
    assert_eq!(broker.terminations(), 1);
}
