// Shared doubles for caller-core integration tests: an in-memory broker
// and a scripted triage backend.
#![allow(clippy::unwrap_used, dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use caller_api::{
    BrokerConnector, BrokerEndpoint, BrokerEvent, BrokerLink, BrokerTransport, ConnectOptions,
    Endpoint, InboundMessage, QoS, RpcBackend,
};
use caller_core::{Org, User};
use serde_json::{Value, json};
use tokio::sync::mpsc;

// ── In-memory broker ────────────────────────────────────────────────

#[derive(Default)]
struct BrokerState {
    opens: AtomicUsize,
    terminations: AtomicUsize,
    events: Mutex<Option<mpsc::Sender<BrokerEvent>>>,
    subscribes: Mutex<Vec<String>>,
    unsubscribes: Mutex<Vec<String>>,
    publishes: Mutex<Vec<(String, Bytes)>>,
    refuse_auth: Mutex<Option<String>>,
    connect_on_open: bool,
}

/// Connector whose links live in memory. Tests drive connection events
/// by hand.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    /// Acknowledges every open immediately.
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState {
                connect_on_open: true,
                ..BrokerState::default()
            }),
        }
    }

    /// Opens links but never acknowledges them on its own.
    pub fn silent() -> Self {
        Self {
            state: Arc::new(BrokerState::default()),
        }
    }

    pub fn refuse_auth(&self, reason: &str) {
        *self.state.refuse_auth.lock().unwrap() = Some(reason.to_owned());
    }

    pub fn connector(&self) -> Arc<dyn BrokerConnector> {
        Arc::new(self.clone())
    }

    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.state.terminations.load(Ordering::SeqCst)
    }

    pub fn subscribes(&self) -> Vec<String> {
        self.state.subscribes.lock().unwrap().clone()
    }

    pub fn subscribe_count(&self, topic: &str) -> usize {
        self.subscribes().iter().filter(|t| *t == topic).count()
    }

    pub fn unsubscribes(&self) -> Vec<String> {
        self.state.unsubscribes.lock().unwrap().clone()
    }

    pub fn publishes_on(&self, topic: &str) -> Vec<Bytes> {
        self.state
            .publishes
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub async fn emit(&self, event: BrokerEvent) {
        let tx = self.state.events.lock().unwrap().clone();
        tx.expect("no open link").send(event).await.unwrap();
    }

    pub async fn connack(&self) {
        self.emit(BrokerEvent::Connected).await;
    }

    pub async fn drop_link(&self) {
        self.emit(BrokerEvent::Disconnected {
            reason: "connection reset".into(),
        })
        .await;
        self.emit(BrokerEvent::Reconnecting { attempt: 1 }).await;
    }

    pub async fn deliver(&self, topic: &str, payload: &Value) {
        self.emit(BrokerEvent::Message(InboundMessage {
            topic: topic.to_owned(),
            payload: Bytes::from(serde_json::to_vec(payload).unwrap()),
            qos: QoS::AtMostOnce,
            retain: false,
        }))
        .await;
    }

    pub async fn deliver_raw(&self, topic: &str, payload: &'static [u8]) {
        self.emit(BrokerEvent::Message(InboundMessage {
            topic: topic.to_owned(),
            payload: Bytes::from_static(payload),
            qos: QoS::AtMostOnce,
            retain: false,
        }))
        .await;
    }
}

impl BrokerConnector for MemoryBroker {
    fn open(
        &self,
        _endpoint: &BrokerEndpoint,
        _options: &ConnectOptions,
    ) -> Result<BrokerLink, caller_api::Error> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);

        if let Some(reason) = self.state.refuse_auth.lock().unwrap().clone() {
            tx.try_send(BrokerEvent::AuthRejected { reason }).unwrap();
        } else if self.state.connect_on_open {
            tx.try_send(BrokerEvent::Connected).unwrap();
        }
        *self.state.events.lock().unwrap() = Some(tx);

        Ok(BrokerLink {
            transport: Arc::new(MemoryTransport {
                state: Arc::clone(&self.state),
            }),
            events: rx,
        })
    }
}

struct MemoryTransport {
    state: Arc<BrokerState>,
}

#[async_trait]
impl BrokerTransport for MemoryTransport {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<QoS, caller_api::Error> {
        self.state.subscribes.lock().unwrap().push(topic.to_owned());
        Ok(qos)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), caller_api::Error> {
        self.state.unsubscribes.lock().unwrap().push(topic.to_owned());
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        _qos: QoS,
        _retain: bool,
    ) -> Result<(), caller_api::Error> {
        self.state
            .publishes
            .lock()
            .unwrap()
            .push((topic.to_owned(), payload));
        Ok(())
    }

    fn terminate(&self) {
        self.state.terminations.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Scripted backend ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Reply {
    Data(Value),
    Reject(&'static str),
    Unreachable,
}

struct Step {
    delay: Duration,
    reply: Reply,
}

/// Backend that answers from per-endpoint scripts, in call order.
/// Unscripted calls succeed: an empty page for the list, `null` otherwise.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<Endpoint, VecDeque<Step>>>,
    calls: Mutex<Vec<(Endpoint, Value)>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, endpoint: Endpoint, reply: Reply) {
        self.reply_after(endpoint, Duration::ZERO, reply);
    }

    pub fn reply_after(&self, endpoint: Endpoint, delay: Duration, reply: Reply) {
        self.scripts
            .lock()
            .unwrap()
            .entry(endpoint)
            .or_default()
            .push_back(Step { delay, reply });
    }

    /// Payloads sent to `endpoint`, in order.
    pub fn calls(&self, endpoint: Endpoint) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn call_count(&self, endpoint: Endpoint) -> usize {
        self.calls(endpoint).len()
    }
}

#[async_trait]
impl RpcBackend for ScriptedBackend {
    async fn call(&self, endpoint: Endpoint, payload: Value) -> Result<Value, caller_api::Error> {
        self.calls.lock().unwrap().push((endpoint, payload));
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front);

        let Some(step) = step else {
            return Ok(match endpoint {
                Endpoint::ListQueue => json!({ "list": [], "total": 0 }),
                _ => Value::Null,
            });
        };
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        match step.reply {
            Reply::Data(v) => Ok(v),
            Reply::Reject(message) => Err(caller_api::Error::Backend {
                code: 500,
                message: message.to_owned(),
            }),
            Reply::Unreachable => Err(caller_api::Error::Timeout { timeout_secs: 15 }),
        }
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn org1() -> Org {
    Org {
        org_id: 1,
        org_code: "ORG1".into(),
        org_name: "Riverside Clinic".into(),
        dept_id: 40,
    }
}

pub fn doctor(id: i64) -> User {
    User {
        id,
        account: format!("doc{id}"),
        nick_name: format!("Dr. {id}"),
    }
}

pub fn row(appointment_id: &str, state: i64) -> Value {
    json!({
        "id": format!("P-{appointment_id}"),
        "appointment_id": appointment_id,
        "patient_name": format!("Patient {appointment_id}"),
        "queue_no": appointment_id.trim_start_matches(char::is_alphabetic),
        "state": state,
        "doc_id": 7,
    })
}

pub fn page(rows: Vec<Value>) -> Value {
    let total = rows.len();
    json!({
        "list": rows,
        "total": total,
        "meta": { "wait_count": total, "pass_count": 0, "end_count": 0, "call_count": 0 },
    })
}

/// Poll `cond` until it holds, yielding to background tasks in between.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
