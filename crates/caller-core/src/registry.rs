// ── Subscription registry ──
//
// Two tables: transport-level topic interest (what to resubscribe after a
// reconnect) and keyed message routes (who to call when something
// arrives). Dispatch fans a message out to every route whose filter
// matches, isolating each handler from the others' failures.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use caller_api::{InboundMessage, QoS};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use crate::error::CoreError;
use crate::topics::TopicFilter;

// ── Message envelope ─────────────────────────────────────────────────

/// An inbound broker message as handlers see it.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    /// Decode the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        serde_json::from_slice(&self.payload).map_err(|e| CoreError::MalformedMessage {
            topic: self.topic.clone(),
            message: e.to_string(),
        })
    }
}

impl From<InboundMessage> for Message {
    fn from(m: InboundMessage) -> Self {
        Self {
            topic: m.topic,
            payload: m.payload,
            qos: m.qos,
            retain: m.retain,
        }
    }
}

/// A message callback. Errors and panics are logged and contained.
pub type Handler = Arc<dyn Fn(&Message) -> Result<(), CoreError> + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Message) -> Result<(), CoreError> + Send + Sync + 'static,
{
    Arc::new(f)
}

// ── Registry ─────────────────────────────────────────────────────────

struct Route {
    filter: TopicFilter,
    handler: Handler,
    /// For one-shot routes: the transport topic to drop after delivery.
    once_topic: Option<String>,
    generation: u64,
}

/// Outcome of delivering one message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    /// Topics whose one-shot route fired; the caller should unsubscribe
    /// them at the transport.
    pub expired: Vec<String>,
}

/// Keyed routes plus the set of topics to replay on reconnect.
#[derive(Default)]
pub struct SubscriptionRegistry {
    routes: DashMap<String, Route>,
    topics: DashMap<String, QoS>,
    generation: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Routes ───────────────────────────────────────────────────────

    /// Install (or replace) the route under `key`.
    pub fn set_handler(&self, key: impl Into<String>, filter: TopicFilter, handler: Handler) {
        self.insert_route(key.into(), filter, handler, None);
    }

    /// Install a route that removes itself, and its transport topic,
    /// after the first matching delivery.
    pub fn set_once(
        &self,
        key: impl Into<String>,
        filter: TopicFilter,
        topic: impl Into<String>,
        handler: Handler,
    ) {
        self.insert_route(key.into(), filter, handler, Some(topic.into()));
    }

    fn insert_route(
        &self,
        key: String,
        filter: TopicFilter,
        handler: Handler,
        once_topic: Option<String>,
    ) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, filter = %filter, once = once_topic.is_some(), "route installed");
        self.routes.insert(
            key,
            Route {
                filter,
                handler,
                once_topic,
                generation,
            },
        );
    }

    pub fn remove_handler(&self, key: &str) -> bool {
        self.routes.remove(key).is_some()
    }

    pub fn has_handler(&self, key: &str) -> bool {
        self.routes.contains_key(key)
    }

    pub fn handler_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.routes.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    // ── Topic interest ───────────────────────────────────────────────

    /// Record a transport subscription so it is replayed on reconnect.
    pub fn track(&self, topic: impl Into<String>, qos: QoS) {
        self.topics.insert(topic.into(), qos);
    }

    pub fn untrack(&self, topic: &str) -> bool {
        self.topics.remove(topic).is_some()
    }

    pub fn is_tracked(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Every tracked topic with its QoS, sorted by topic.
    pub fn tracked(&self) -> Vec<(String, QoS)> {
        let mut topics: Vec<(String, QoS)> = self
            .topics
            .iter()
            .map(|t| (t.key().clone(), *t.value()))
            .collect();
        topics.sort_by(|a, b| a.0.cmp(&b.0));
        topics
    }

    /// Drop every route and every tracked topic.
    pub fn clear(&self) {
        self.routes.clear();
        self.topics.clear();
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Deliver `msg` to every matching route.
    pub fn dispatch(&self, msg: &Message) -> DispatchReport {
        // Snapshot first so handlers may touch the registry.
        let matched: Vec<(String, Handler, Option<String>, u64)> = self
            .routes
            .iter()
            .filter(|r| r.filter.matches(&msg.topic))
            .map(|r| {
                (
                    r.key().clone(),
                    Arc::clone(&r.handler),
                    r.once_topic.clone(),
                    r.generation,
                )
            })
            .collect();

        let mut report = DispatchReport::default();

        if matched.is_empty() {
            debug!(topic = %msg.topic, "no route for message");
            return report;
        }

        for (key, handler, once_topic, generation) in matched {
            if let Some(topic) = once_topic {
                // A concurrent delivery may have consumed it already.
                let removed = self
                    .routes
                    .remove_if(&key, |_, route| route.generation == generation)
                    .is_some();
                if !removed {
                    continue;
                }
                self.untrack(&topic);
                report.expired.push(topic);
            }

            match catch_unwind(AssertUnwindSafe(|| handler(msg))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(key = %key, topic = %msg.topic, error = %e, "handler failed");
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(key = %key, topic = %msg.topic, "handler panicked");
                }
            }
        }

        report
    }
}
