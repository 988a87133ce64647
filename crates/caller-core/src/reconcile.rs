// ── Broker push reconciliation ──
//
// Folds doctor-status pushes from the org topic into the store. Only the
// bound doctor's counters move; everything else on the shared topic is
// somebody else's business. Department patient-update pushes carry no
// usable rows and only trigger a re-query of the active tab.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::error::CoreError;
use crate::gateway::ActionGateway;
use crate::model::{SessionContext, StatusDelta};
use crate::registry::{Handler, Message, handler};
use crate::store::QueueStateStore;

/// Registry key of the status route.
pub const STATUS_ROUTE: &str = "org-docs-status";

/// Registry key of the department patient-update route.
pub const PATIENT_UPDATE_ROUTE: &str = "patient-update";

/// Decode every status delta carried by `msg`.
///
/// Accepts a single object, an array of objects, and either of those
/// wrapped under `data`.
pub fn decode_deltas(msg: &Message) -> Result<Vec<StatusDelta>, CoreError> {
    let mut body: Value = msg.json()?;
    if let Some(inner) = body.as_object_mut().and_then(|o| o.remove("data")) {
        if inner.is_object() || inner.is_array() {
            body = inner;
        }
    }

    let items = match body {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(CoreError::MalformedMessage {
                topic: msg.topic.clone(),
                message: format!("expected an object, got {other}"),
            });
        }
    };

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item).map_err(|e| CoreError::MalformedMessage {
                topic: msg.topic.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}

/// Apply `msg` for `bound_doctor`. Returns how many deltas changed the
/// store.
pub fn reconcile(
    store: &QueueStateStore,
    bound_doctor: i64,
    msg: &Message,
) -> Result<usize, CoreError> {
    let deltas = decode_deltas(msg)?;
    let mut applied = 0;
    for delta in &deltas {
        if store.apply_status_delta(delta, bound_doctor) {
            applied += 1;
        } else {
            trace!(doc = ?delta.doc, "status push not for this doctor");
        }
    }
    if applied > 0 {
        debug!(topic = %msg.topic, applied, "doctor status reconciled");
    }
    Ok(applied)
}

/// Route handler bound to the org doctor-status topic. Reads the bound
/// doctor from `context` on every message.
pub fn status_handler(
    store: Arc<QueueStateStore>,
    context: watch::Receiver<SessionContext>,
) -> Handler {
    handler(move |msg: &Message| {
        let Some(doc_id) = context.borrow().doctor_id() else {
            trace!(topic = %msg.topic, "status push while no doctor bound");
            return Ok(());
        };
        reconcile(&store, doc_id, msg).map(|_| ())
    })
}

/// Route handler bound to the department patient-update topic. Every
/// push spawns a refresh of the active tab; overlapping refreshes settle
/// through the store's sequencing.
pub fn patient_update_handler(gateway: Arc<ActionGateway>) -> Handler {
    handler(move |msg: &Message| {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CoreError::Internal(format!("no runtime for queue refresh: {e}")))?;
        debug!(topic = %msg.topic, "patient update, refreshing queue");

        let gateway = Arc::clone(&gateway);
        runtime.spawn(async move {
            if let Err(e) = gateway.refresh().await {
                warn!(error = %e, "refresh after patient update failed");
            }
        });
        Ok(())
    })
}
