// ── Heartbeat scheduler ──
//
// While a session is bound to an org and a doctor, publishes a liveness
// beacon on the doctor's heartbeat topic: once immediately, then every
// period.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use caller_api::QoS;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::model::{Org, User};
use crate::topics;

/// Liveness payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Beacon {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub org_code: String,
    pub org_id: i64,
    pub doc_id: i64,
    pub doc_name: String,
    pub status: &'static str,
    pub client_id: String,
}

impl Beacon {
    pub fn new(org: &Org, user: &User, client_id: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            org_code: org.org_code.clone(),
            org_id: org.org_id,
            doc_id: user.id,
            doc_name: user.display_name().to_owned(),
            status: "online",
            client_id: client_id.to_owned(),
        }
    }
}

struct Running {
    doc_id: i64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct HeartbeatScheduler {
    connection: Arc<ConnectionManager>,
    period: Duration,
    qos: QoS,
    running: Mutex<Option<Running>>,
}

impl HeartbeatScheduler {
    pub fn new(connection: Arc<ConnectionManager>, period: Duration, qos: QoS) -> Self {
        Self {
            connection,
            period,
            qos,
            running: Mutex::new(None),
        }
    }

    /// Start beating for `org`/`user`, replacing any running timer.
    ///
    /// Returns `false`, and starts nothing, unless both are bound.
    pub fn start(&self, org: Option<&Org>, user: Option<&User>) -> bool {
        let (Some(org), Some(user)) = (org, user) else {
            debug!("heartbeat not started: session unbound");
            self.stop();
            return false;
        };

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = running.take() {
            old.cancel.cancel();
            old.task.abort();
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(beat_loop(
            Arc::clone(&self.connection),
            org.clone(),
            user.clone(),
            self.period,
            self.qos,
            cancel.clone(),
        ));

        info!(org = %org.org_code, doc_id = user.id, period_secs = self.period.as_secs(), "heartbeat started");
        *running = Some(Running {
            doc_id: user.id,
            cancel,
            task,
        });
        true
    }

    /// Stop beating. Idempotent.
    pub fn stop(&self) {
        let old = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(old) = old {
            old.cancel.cancel();
            old.task.abort();
            debug!(doc_id = old.doc_id, "heartbeat stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn beat_loop(
    connection: Arc<ConnectionManager>,
    org: Org,
    user: User,
    period: Duration,
    qos: QoS,
    cancel: CancellationToken,
) {
    let topic = topics::doctor_heartbeat(&org.org_code, user.id);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !connection.is_connected() {
            warn!(topic = %topic, "skipping heartbeat, broker not connected");
            continue;
        }

        let beacon = Beacon::new(&org, &user, connection.client_id());
        let payload = match serde_json::to_vec(&beacon) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(error = %e, "failed to encode heartbeat");
                continue;
            }
        };

        match connection.publish(&topic, payload, qos, false).await {
            Ok(()) => debug!(topic = %topic, "heartbeat sent"),
            Err(e) => warn!(topic = %topic, error = %e, "heartbeat publish failed"),
        }
    }
}
