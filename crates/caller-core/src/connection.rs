// ── Broker connection manager ──
//
// Owns the single broker link for a session. A pump task drains the
// transport's events: connection transitions update the observable
// state (and replay subscriptions on every CONNACK), messages go through
// the registry.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use caller_api::{
    BrokerConnector, BrokerEndpoint, BrokerEvent, BrokerTransport, ConnectOptions, QoS,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::registry::{Message, SubscriptionRegistry};

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
        }
    }
}

// ── ConnectionManager ────────────────────────────────────────────────

struct ActiveLink {
    endpoint: BrokerEndpoint,
    transport: Arc<dyn BrokerTransport>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

/// The session's broker connection.
pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    options: ConnectOptions,
    registry: Arc<SubscriptionRegistry>,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<ActiveLink>>,
    auth_failure: Arc<Mutex<Option<String>>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn BrokerConnector>, options: ConnectOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            options,
            registry: Arc::new(SubscriptionRegistry::new()),
            state,
            link: Mutex::new(None),
            auth_failure: Arc::new(Mutex::new(None)),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn client_id(&self) -> &str {
        &self.options.client_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Endpoint of the current link, if any.
    pub fn endpoint(&self) -> Option<BrokerEndpoint> {
        self.lock_link().as_ref().map(|l| l.endpoint.clone())
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, Option<ActiveLink>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transport(&self) -> Option<Arc<dyn BrokerTransport>> {
        self.lock_link().as_ref().map(|l| Arc::clone(&l.transport))
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open the broker link.
    ///
    /// Returns immediately, without touching the transport, when already
    /// connected to `endpoint`. Any other existing link is torn down first.
    /// The first CONNACK arrives asynchronously; see
    /// [`wait_connected`](Self::wait_connected).
    pub fn connect(&self, endpoint: &BrokerEndpoint) -> Result<(), CoreError> {
        let mut link = self.lock_link();

        if link.as_ref().is_some_and(|l| l.endpoint == *endpoint) && self.is_connected() {
            debug!(%endpoint, "already connected");
            return Ok(());
        }

        if let Some(old) = link.take() {
            debug!(endpoint = %old.endpoint, "replacing broker link");
            shutdown(old);
        }

        *self
            .auth_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        let _ = self.state.send(ConnectionState::Connecting);
        info!(%endpoint, client_id = %self.options.client_id, "connecting to broker");

        let opened = self.connector.open(endpoint, &self.options).map_err(|e| {
            let _ = self.state.send(ConnectionState::Disconnected);
            CoreError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        })?;

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump_events(
            opened.events,
            Arc::clone(&opened.transport),
            Arc::clone(&self.registry),
            self.state.clone(),
            Arc::clone(&self.auth_failure),
            cancel.clone(),
        ));

        *link = Some(ActiveLink {
            endpoint: endpoint.clone(),
            transport: opened.transport,
            cancel,
            pump,
        });
        Ok(())
    }

    /// Wait until the link reports connected.
    ///
    /// Fails early if the broker rejects our credentials.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), CoreError> {
        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            loop {
                if rx.borrow_and_update().is_connected() {
                    return Ok(());
                }
                if let Some(message) = self.auth_failure() {
                    return Err(CoreError::AuthenticationFailed { message });
                }
                if rx.changed().await.is_err() {
                    return Err(CoreError::NotConnected);
                }
            }
        })
        .await;

        waited.unwrap_or(Err(CoreError::Timeout {
            timeout_secs: timeout.as_secs(),
        }))
    }

    /// Reason the broker gave for refusing our credentials, if it did.
    pub fn auth_failure(&self) -> Option<String> {
        self.auth_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Terminate the link, drop every subscription and route.
    ///
    /// A no-op when already disconnected.
    pub fn disconnect(&self) {
        let old = self.lock_link().take();
        let Some(old) = old else {
            if self.state() != ConnectionState::Disconnected {
                let _ = self.state.send(ConnectionState::Disconnected);
            }
            return;
        };

        info!(endpoint = %old.endpoint, "disconnecting from broker");
        shutdown(old);
        self.registry.clear();
        let _ = self.state.send(ConnectionState::Disconnected);
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Subscribe at the transport and record the topic for replay.
    ///
    /// Rejected without touching the transport unless connected.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<QoS, CoreError> {
        if !self.is_connected() {
            return Err(CoreError::NotConnected);
        }
        let transport = self.transport().ok_or(CoreError::NotConnected)?;

        let granted = transport.subscribe(topic, qos).await?;
        self.registry.track(topic, qos);
        debug!(topic, ?granted, "subscribed");
        Ok(granted)
    }

    /// Subscribe now if connected, otherwise record the topic so the next
    /// CONNACK replays it.
    pub async fn ensure_subscribed(&self, topic: &str, qos: QoS) -> Result<(), CoreError> {
        if self.is_connected() {
            self.subscribe(topic, qos).await.map(|_| ())
        } else {
            debug!(topic, "not connected, deferring subscription");
            self.registry.track(topic, qos);
            Ok(())
        }
    }

    /// Forget `topic` and unsubscribe at the transport if there is a link.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), CoreError> {
        self.registry.untrack(topic);
        let Some(transport) = self.transport() else {
            return Ok(());
        };
        if !self.is_connected() {
            return Ok(());
        }
        transport.unsubscribe(topic).await?;
        debug!(topic, "unsubscribed");
        Ok(())
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), CoreError> {
        if !self.is_connected() {
            return Err(CoreError::NotConnected);
        }
        let transport = self.transport().ok_or(CoreError::NotConnected)?;
        transport.publish(topic, payload, qos, retain).await?;
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let old = self
            .link
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(old) = old {
            shutdown(old);
        }
    }
}

fn shutdown(link: ActiveLink) {
    link.cancel.cancel();
    link.transport.terminate();
    link.pump.abort();
}

// ── Background pump ──────────────────────────────────────────────────

async fn pump_events(
    mut events: mpsc::Receiver<BrokerEvent>,
    transport: Arc<dyn BrokerTransport>,
    registry: Arc<SubscriptionRegistry>,
    state: watch::Sender<ConnectionState>,
    auth_failure: Arc<Mutex<Option<String>>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        let Some(event) = event else {
            debug!("broker event stream ended");
            break;
        };

        match event {
            BrokerEvent::Connected => {
                let _ = state.send(ConnectionState::Connected);
                // Replay off the pump: SUBACKs may need the event path.
                tokio::spawn(replay(
                    Arc::clone(&transport),
                    Arc::clone(&registry),
                    cancel.clone(),
                ));
            }
            BrokerEvent::Disconnected { reason } => {
                warn!(%reason, "broker connection lost");
                let _ = state.send(ConnectionState::Disconnected);
            }
            BrokerEvent::Reconnecting { attempt } => {
                debug!(attempt, "reconnecting to broker");
                let _ = state.send(ConnectionState::Reconnecting { attempt });
            }
            BrokerEvent::AuthRejected { reason } => {
                warn!(%reason, "broker rejected credentials");
                *auth_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
                let _ = state.send(ConnectionState::Disconnected);
            }
            BrokerEvent::Message(inbound) => {
                let message = Message::from(inbound);
                let report = registry.dispatch(&message);
                for topic in report.expired {
                    let transport = Arc::clone(&transport);
                    tokio::spawn(async move {
                        if let Err(e) = transport.unsubscribe(&topic).await {
                            warn!(topic = %topic, error = %e, "one-shot unsubscribe failed");
                        }
                    });
                }
            }
        }
    }
}

/// Resubscribe every tracked topic after a (re)connect.
async fn replay(
    transport: Arc<dyn BrokerTransport>,
    registry: Arc<SubscriptionRegistry>,
    cancel: CancellationToken,
) {
    let topics = registry.tracked();
    if topics.is_empty() {
        return;
    }
    info!(count = topics.len(), "replaying subscriptions");

    for (topic, qos) in topics {
        if cancel.is_cancelled() {
            return;
        }
        match transport.subscribe(&topic, qos).await {
            Ok(granted) => debug!(topic = %topic, ?granted, "resubscribed"),
            Err(e) => warn!(topic = %topic, error = %e, "resubscribe failed"),
        }
    }
}
