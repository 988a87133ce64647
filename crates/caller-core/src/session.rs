// ── Session facade ──
//
// One `Session` per login. It owns the broker connection, the heartbeat,
// the queue store and the action gateway, and is the only place the
// session context (org, user, room) is mutated. Cloning is cheap; every
// clone drives the same session.

use std::sync::Arc;

use bytes::Bytes;
use caller_api::{BrokerConnector, BrokerEndpoint, QoS, RpcBackend};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::command::{CommandResult, QueueCommand};
use crate::config::SessionConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::CoreError;
use crate::gateway::ActionGateway;
use crate::heartbeat::HeartbeatScheduler;
use crate::model::{Org, Room, SessionContext, User};
use crate::reconcile::{self, PATIENT_UPDATE_ROUTE, STATUS_ROUTE};
use crate::registry::Handler;
use crate::store::QueueStateStore;
use crate::topics::{self, TopicFilter};

/// Org-scoped topics a session bound to `ctx` follows.
fn org_topics(ctx: &SessionContext) -> Vec<String> {
    let Some(code) = ctx.org_code() else {
        return Vec::new();
    };
    let mut out = vec![topics::org_docs_status(code)];
    if let Some(dept_id) = ctx.dept_id() {
        out.push(topics::patient_update(code, dept_id));
    }
    out
}

// ── SubscriptionHandle ───────────────────────────────────────────────

/// Returned by [`Session::subscribe_with`]. Dropping the handle keeps
/// the subscription; call [`unsubscribe`](Self::unsubscribe) to end it.
#[must_use = "the subscription stays active until `unsubscribe` is called"]
pub struct SubscriptionHandle {
    connection: Arc<ConnectionManager>,
    topic: String,
    key: String,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Remove the route and the transport subscription.
    pub async fn unsubscribe(self) -> Result<(), CoreError> {
        self.connection.registry().remove_handler(&self.key);
        self.connection.unsubscribe(&self.topic).await
    }
}

// ── Session ──────────────────────────────────────────────────────────

struct SessionInner {
    config: SessionConfig,
    connection: Arc<ConnectionManager>,
    heartbeat: HeartbeatScheduler,
    store: Arc<QueueStateStore>,
    gateway: Arc<ActionGateway>,
    context: watch::Sender<SessionContext>,
    /// Serializes `link_session` calls.
    linking: Mutex<()>,
}

/// A logged-in calling station.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn BrokerConnector>,
        backend: Arc<dyn RpcBackend>,
    ) -> Self {
        let connection = Arc::new(ConnectionManager::new(connector, config.connect_options()));
        let heartbeat =
            HeartbeatScheduler::new(Arc::clone(&connection), config.heartbeat_period, config.qos);
        let store = Arc::new(QueueStateStore::new(config.page_size));
        let (context, context_rx) = watch::channel(SessionContext::default());
        let gateway = Arc::new(ActionGateway::new(backend, Arc::clone(&store), context_rx));

        Self {
            inner: Arc::new(SessionInner {
                config,
                connection,
                heartbeat,
                store,
                gateway,
                context,
                linking: Mutex::new(()),
            }),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn client_id(&self) -> &str {
        self.inner.connection.client_id()
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.inner.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe_state()
    }

    pub fn store(&self) -> &Arc<QueueStateStore> {
        &self.inner.store
    }

    pub fn gateway(&self) -> &Arc<ActionGateway> {
        &self.inner.gateway
    }

    pub fn context(&self) -> SessionContext {
        self.inner.context.borrow().clone()
    }

    pub fn subscribe_context(&self) -> watch::Receiver<SessionContext> {
        self.inner.context.subscribe()
    }

    pub fn heartbeat_running(&self) -> bool {
        self.inner.heartbeat.is_running()
    }

    // ── Context ──────────────────────────────────────────────────────

    pub fn set_org(&self, org: Org) {
        debug!(org = %org.org_code, "org bound");
        self.inner.context.send_modify(|ctx| ctx.org = Some(org));
    }

    /// Bind the signed-in doctor. A running heartbeat follows the new
    /// binding.
    pub fn set_user(&self, user: User) {
        debug!(doc_id = user.id, "user bound");
        self.inner.store.bind_doctor(user.id);
        self.inner.context.send_modify(|ctx| ctx.user = Some(user));
        if self.inner.heartbeat.is_running() {
            self.restart_heartbeat();
        }
    }

    pub fn set_room(&self, room: Room) {
        debug!(room = %room.name, "room bound");
        self.inner.context.send_modify(|ctx| ctx.room = Some(room));
    }

    fn restart_heartbeat(&self) -> bool {
        let ctx = self.context();
        self.inner.heartbeat.start(ctx.org.as_ref(), ctx.user.as_ref())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Bind `org` (and `user`), open the broker link, start the heartbeat
    /// and follow the org's doctor-status topic plus the department's
    /// patient-update topic.
    ///
    /// Already connected for the same org: only the heartbeat binding is
    /// refreshed when `user` differs. The first CONNACK is awaited for
    /// `link_wait`; past that the link keeps trying in the background and
    /// the status topic is subscribed on connect.
    pub async fn link_session(
        &self,
        use_tls: bool,
        host: &str,
        port: u16,
        org: Org,
        user: Option<User>,
    ) -> Result<(), CoreError> {
        let _linking = self.inner.linking.lock().await;
        let previous = self.context();

        if self.is_connected() && previous.org_code() == Some(org.org_code.as_str()) {
            if let Some(user) = user.filter(|u| previous.user.as_ref() != Some(u)) {
                info!(doc_id = user.id, "rebinding heartbeat");
                self.set_user(user);
                if !self.heartbeat_running() {
                    self.restart_heartbeat();
                }
            }
            return Ok(());
        }

        let mut endpoint = BrokerEndpoint::new(use_tls, host, port);
        endpoint.path.clone_from(&self.inner.config.ws_path);

        self.inner.heartbeat.stop();
        let org_code = org.org_code.clone();
        self.set_org(org);
        if let Some(user) = user {
            self.set_user(user);
        }

        let current = org_topics(&self.context());
        for old_topic in org_topics(&previous) {
            if current.contains(&old_topic) {
                continue;
            }
            if let Err(e) = self.inner.connection.unsubscribe(&old_topic).await {
                debug!(topic = %old_topic, error = %e, "could not drop previous org topic");
            }
        }

        self.inner.connection.connect(&endpoint)?;
        match self
            .inner
            .connection
            .wait_connected(self.inner.config.link_wait)
            .await
        {
            Ok(()) => info!(%endpoint, org = %org_code, "session linked"),
            Err(CoreError::Timeout { timeout_secs }) => {
                warn!(%endpoint, timeout_secs, "broker not connected yet, continuing in background");
            }
            Err(e) => {
                self.inner.connection.disconnect();
                return Err(e);
            }
        }

        self.restart_heartbeat();
        self.follow(
            STATUS_ROUTE,
            topics::org_docs_status(&org_code),
            reconcile::status_handler(Arc::clone(&self.inner.store), self.inner.context.subscribe()),
        )
        .await?;

        let Some(dept_id) = self.context().dept_id() else {
            self.inner.connection.registry().remove_handler(PATIENT_UPDATE_ROUTE);
            debug!(org = %org_code, "no department bound, not following patient updates");
            return Ok(());
        };
        self.follow(
            PATIENT_UPDATE_ROUTE,
            topics::patient_update(&org_code, dept_id),
            reconcile::patient_update_handler(Arc::clone(&self.inner.gateway)),
        )
        .await
    }

    /// Route `topic` to `handler` under `route` and keep it subscribed
    /// across reconnects.
    async fn follow(&self, route: &str, topic: String, handler: Handler) -> Result<(), CoreError> {
        let registry = self.inner.connection.registry();
        registry.set_handler(route, TopicFilter::parse(&topic)?, handler);

        let qos = self.inner.config.qos;
        match self.inner.connection.ensure_subscribed(&topic, qos).await {
            Err(CoreError::NotConnected) => {
                // Lost the link between the check and the request.
                registry.track(topic, qos);
                Ok(())
            }
            other => other,
        }
    }

    /// Stop the heartbeat, terminate the link and drop every
    /// subscription. Safe when already disconnected.
    pub fn disconnect(&self) {
        self.inner.heartbeat.stop();
        self.inner.connection.disconnect();
    }

    /// Disconnect and forget everything bound to this session.
    pub fn logout(&self) {
        self.disconnect();
        self.inner.store.clear();
        self.inner.context.send_replace(SessionContext::default());
        info!("session logged out");
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Transport subscribe. Fails unless connected.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<QoS, CoreError> {
        self.inner.connection.subscribe(topic, qos).await
    }

    /// Subscribe and route matching messages to `handler`.
    pub async fn subscribe_with(
        &self,
        topic: &str,
        qos: QoS,
        handler: Handler,
    ) -> Result<SubscriptionHandle, CoreError> {
        let registry = self.inner.connection.registry();
        registry.set_handler(topic, TopicFilter::parse(topic)?, handler);

        if let Err(e) = self.inner.connection.subscribe(topic, qos).await {
            registry.remove_handler(topic);
            return Err(e);
        }
        Ok(SubscriptionHandle {
            connection: Arc::clone(&self.inner.connection),
            topic: topic.to_owned(),
            key: topic.to_owned(),
        })
    }

    /// Subscribe for a single delivery. The route is keyed by `id`, or by
    /// `topic` when absent; both the route and the transport subscription
    /// go away after the first matching message.
    pub async fn subscribe_once(
        &self,
        topic: &str,
        callback: Handler,
        id: Option<&str>,
    ) -> Result<QoS, CoreError> {
        let key = id.unwrap_or(topic);
        let registry = self.inner.connection.registry();
        registry.set_once(key, TopicFilter::parse(topic)?, topic, callback);

        match self
            .inner
            .connection
            .subscribe(topic, self.inner.config.qos)
            .await
        {
            Ok(granted) => Ok(granted),
            Err(e) => {
                registry.remove_handler(key);
                Err(e)
            }
        }
    }

    /// Remove the route keyed `id` (or `topic`) and unsubscribe `topic`.
    /// Safe when nothing is registered.
    pub async fn unsubscribe(&self, topic: &str, id: Option<&str>) -> Result<(), CoreError> {
        self.inner
            .connection
            .registry()
            .remove_handler(id.unwrap_or(topic));
        self.inner.connection.unsubscribe(topic).await
    }

    /// Install a route without touching the transport.
    pub fn set_handler(
        &self,
        key: &str,
        pattern: &str,
        handler: Handler,
    ) -> Result<(), CoreError> {
        self.inner
            .connection
            .registry()
            .set_handler(key, TopicFilter::parse(pattern)?, handler);
        Ok(())
    }

    pub fn remove_handler(&self, key: &str) -> bool {
        self.inner.connection.registry().remove_handler(key)
    }

    /// Publish at the session's QoS, not retained.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> Result<(), CoreError> {
        self.publish_with(topic, payload, self.inner.config.qos, false)
            .await
    }

    pub async fn publish_with(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), CoreError> {
        self.inner
            .connection
            .publish(topic, payload.into(), qos, retain)
            .await
    }

    // ── Queue ────────────────────────────────────────────────────────

    pub async fn execute(&self, cmd: QueueCommand) -> Result<CommandResult, CoreError> {
        self.inner.gateway.execute(cmd).await
    }
}
