//! Broker transport seam.
//!
//! The core never talks to an MQTT client directly. It opens a
//! [`BrokerLink`] through a [`BrokerConnector`] and then drives two halves:
//! the [`BrokerTransport`] for outbound requests and an event receiver for
//! everything the broker pushes back (connection transitions and messages).
//!
//! [`MqttConnector`](crate::mqtt::MqttConnector) is the production
//! implementation. Tests plug in an in-memory connector.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use crate::error::Error;

pub use rumqttc::QoS;

/// Path the broker serves MQTT-over-WebSocket on.
pub const DEFAULT_WS_PATH: &str = "/mqtt";

// ── BrokerEndpoint ───────────────────────────────────────────────────

/// Where the broker lives: `(use_tls, host, port)` plus the WebSocket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub use_tls: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl BrokerEndpoint {
    pub fn new(use_tls: bool, host: impl Into<String>, port: u16) -> Self {
        Self {
            use_tls,
            host: host.into(),
            port,
            path: DEFAULT_WS_PATH.into(),
        }
    }

    /// URL scheme selected by `use_tls`.
    pub fn scheme(&self) -> &'static str {
        if self.use_tls { "wss" } else { "ws" }
    }

    /// Compose the full WebSocket URL, e.g. `wss://broker.local:8084/mqtt`.
    pub fn url(&self) -> Result<Url, Error> {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        let raw = format!("{}://{}:{}{path}", self.scheme(), self.host, self.port);
        Ok(Url::parse(&raw)?)
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme(), self.host, self.port, self.path)
    }
}

// ── ConnectOptions ───────────────────────────────────────────────────

/// Session-level MQTT options.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Client identifier presented to the broker.
    pub client_id: String,
    /// MQTT keep-alive interval. Default: 60s.
    pub keep_alive: Duration,
    /// Upper bound on a single connection attempt. Default: 4s.
    pub connect_timeout: Duration,
    /// Fixed delay between reconnection attempts. Default: 1s.
    /// There is deliberately no backoff.
    pub reconnect_period: Duration,
    /// Start each connection with a clean session. Default: true.
    pub clean_session: bool,
}

impl ConnectOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(4),
            reconnect_period: Duration::from_millis(1000),
            clean_session: true,
        }
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// A message pushed by the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// Everything the transport reports back to its owner.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// The broker acknowledged a (re)connection.
    Connected,
    /// The connection dropped; the transport keeps retrying.
    Disconnected { reason: String },
    /// A retry is about to be attempted.
    Reconnecting { attempt: u32 },
    /// The broker refused our credentials. The transport stops retrying.
    AuthRejected { reason: String },
    /// An application message arrived.
    Message(InboundMessage),
}

// ── Transport traits ─────────────────────────────────────────────────

/// Outbound half of a broker connection.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Subscribe and wait for the broker's grant.
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<QoS, Error>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), Error>;

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool)
    -> Result<(), Error>;

    /// Drop the connection immediately, without a graceful DISCONNECT.
    fn terminate(&self);
}

/// An opened connection: outbound handle plus the inbound event stream.
pub struct BrokerLink {
    pub transport: Arc<dyn BrokerTransport>,
    pub events: mpsc::Receiver<BrokerEvent>,
}

impl fmt::Debug for BrokerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerLink").finish_non_exhaustive()
    }
}

/// Factory for broker connections.
///
/// `open` returns as soon as the background connection task is spawned;
/// the first [`BrokerEvent::Connected`] arrives asynchronously.
pub trait BrokerConnector: Send + Sync {
    fn open(&self, endpoint: &BrokerEndpoint, options: &ConnectOptions)
    -> Result<BrokerLink, Error>;
}
