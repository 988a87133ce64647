// ── Runtime session configuration ──
//
// These types describe *how* a session talks to the broker and backend:
// timing, paging and client identity. Core never reads config files; the
// CLI builds a `SessionConfig` and hands it in.

use std::sync::OnceLock;
use std::time::Duration;

use caller_api::{ConnectOptions, QoS};

/// Prefix for generated broker client identifiers.
pub const CLIENT_ID_PREFIX: &str = "caller_";

/// Rows requested per queue page.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Tuning for a single [`Session`](crate::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Broker client identifier. `None` uses the per-process id.
    pub client_id: Option<String>,
    /// Interval between liveness beacons.
    pub heartbeat_period: Duration,
    /// Fixed broker reconnect period.
    pub reconnect_period: Duration,
    /// MQTT keep-alive.
    pub keep_alive: Duration,
    /// Bound on a single broker connection attempt.
    pub connect_timeout: Duration,
    /// How long `link_session` waits for the first CONNACK before
    /// continuing in the background.
    pub link_wait: Duration,
    /// WebSocket path on the broker.
    pub ws_path: String,
    /// QoS for subscriptions and publishes.
    pub qos: QoS,
    /// Queue rows per page.
    pub page_size: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            heartbeat_period: Duration::from_secs(30),
            reconnect_period: Duration::from_secs(1),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(4),
            link_wait: Duration::from_secs(5),
            ws_path: caller_api::broker::DEFAULT_WS_PATH.into(),
            qos: QoS::AtMostOnce,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl SessionConfig {
    /// The client id this session presents to the broker.
    pub fn resolved_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| process_client_id().to_owned())
    }

    /// Broker connect options derived from this config.
    pub fn connect_options(&self) -> ConnectOptions {
        let mut opts = ConnectOptions::new(self.resolved_client_id());
        opts.keep_alive = self.keep_alive;
        opts.reconnect_period = self.reconnect_period;
        opts.connect_timeout = self.connect_timeout;
        opts
    }
}

/// `caller_<8 hex>`, generated once per process.
pub fn process_client_id() -> &'static str {
    static CLIENT_ID: OnceLock<String> = OnceLock::new();
    CLIENT_ID.get_or_init(|| {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        format!("{CLIENT_ID_PREFIX}{}", &simple[..8])
    })
}
