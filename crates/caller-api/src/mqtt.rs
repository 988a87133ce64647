//! MQTT-over-WebSocket broker transport with fixed-period auto-reconnect.
//!
//! Wraps [`rumqttc`] behind the [`BrokerTransport`] seam. A background task
//! polls the rumqttc event loop and translates what it sees into
//! [`BrokerEvent`]s. When the connection drops, the task waits one
//! `reconnect_period` and polls again, which makes rumqttc redial. There
//! is no backoff: a calling station sitting on a clinic LAN should come
//! back as soon as the broker does.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, SubscribeReasonCode, Transport,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::broker::{
    BrokerConnector, BrokerEndpoint, BrokerEvent, BrokerLink, BrokerTransport, ConnectOptions,
    InboundMessage, QoS,
};
use crate::error::Error;

// ── Channel capacities ───────────────────────────────────────────────

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── MqttConnector ────────────────────────────────────────────────────

/// Production [`BrokerConnector`] backed by rumqttc.
#[derive(Debug, Default, Clone, Copy)]
pub struct MqttConnector;

impl BrokerConnector for MqttConnector {
    fn open(
        &self,
        endpoint: &BrokerEndpoint,
        options: &ConnectOptions,
    ) -> Result<BrokerLink, Error> {
        let url = endpoint.url()?;

        // For WebSocket transports rumqttc takes the full URL as the host.
        let mut mqtt = MqttOptions::new(&options.client_id, url.as_str(), endpoint.port);
        mqtt.set_keep_alive(options.keep_alive);
        mqtt.set_clean_session(options.clean_session);
        if endpoint.use_tls {
            mqtt.set_transport(Transport::wss_with_default_config());
        } else {
            mqtt.set_transport(Transport::Ws);
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt, REQUEST_CHANNEL_CAPACITY);
        eventloop
            .network_options
            .set_connection_timeout(options.connect_timeout.as_secs().max(1));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let acks = Arc::new(SubAckTracker::default());
        let cancel = CancellationToken::new();

        info!(endpoint = %url, client_id = %options.client_id, "opening broker connection");

        tokio::spawn(broker_loop(
            eventloop,
            event_tx,
            Arc::clone(&acks),
            options.reconnect_period,
            cancel.clone(),
        ));

        let transport = MqttTransport {
            client,
            acks,
            order: tokio::sync::Mutex::new(()),
            cancel,
        };

        Ok(BrokerLink {
            transport: Arc::new(transport),
            events: event_rx,
        })
    }
}

// ── MqttTransport ────────────────────────────────────────────────────

struct MqttTransport {
    client: AsyncClient,
    acks: Arc<SubAckTracker>,
    /// Keeps subscribe requests and their ack slots in the same order.
    order: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<QoS, Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::BrokerClosed);
        }

        let rx = {
            let _order = self.order.lock().await;
            let (tx, rx) = oneshot::channel();
            self.acks.enqueue(topic, tx);
            if let Err(e) = self.client.subscribe(topic, qos).await {
                self.acks.discard_last();
                return Err(e.into());
            }
            rx
        };

        rx.await.map_err(|_| Error::BrokerClosed)?
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::BrokerClosed);
        }
        self.client.unsubscribe(topic).await?;
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::BrokerClosed);
        }
        self.client.publish_bytes(topic, qos, retain, payload).await?;
        Ok(())
    }

    fn terminate(&self) {
        // Dropping the event loop closes the socket without a DISCONNECT.
        self.cancel.cancel();
        self.acks.fail_all();
    }
}

// ── SUBACK tracking ──────────────────────────────────────────────────

struct PendingSub {
    topic: String,
    tx: oneshot::Sender<Result<QoS, Error>>,
}

/// Pairs subscribe requests with the broker's SUBACK.
///
/// rumqttc does not hand the packet id back from `subscribe()`, but it
/// emits `Outgoing::Subscribe(pkid)` in request order. Requests wait in
/// `queued` until that event assigns their pkid, then in `in_flight` until
/// the matching SUBACK arrives.
#[derive(Default)]
struct SubAckTracker {
    queued: Mutex<VecDeque<PendingSub>>,
    in_flight: Mutex<HashMap<u16, PendingSub>>,
}

impl SubAckTracker {
    fn enqueue(&self, topic: &str, tx: oneshot::Sender<Result<QoS, Error>>) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(PendingSub {
                topic: topic.to_owned(),
                tx,
            });
    }

    fn discard_last(&self) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_back();
    }

    fn assign(&self, pkid: u16) {
        let next = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(pending) = next {
            self.in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(pkid, pending);
        }
    }

    fn resolve(&self, pkid: u16, codes: &[SubscribeReasonCode]) {
        let pending = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&pkid);
        let Some(pending) = pending else {
            trace!(pkid, "SUBACK for unknown packet id");
            return;
        };

        let result = match codes.first() {
            Some(SubscribeReasonCode::Success(granted)) => Ok(*granted),
            _ => Err(Error::SubscriptionRefused {
                topic: pending.topic,
            }),
        };
        let _ = pending.tx.send(result);
    }

    /// Fail every outstanding request; their acks will never arrive.
    fn fail_all(&self) {
        let queued: Vec<_> = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let in_flight: Vec<_> = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, p)| p)
            .collect();

        for pending in queued.into_iter().chain(in_flight) {
            let _ = pending.tx.send(Err(Error::BrokerClosed));
        }
    }
}

// ── Background event loop ────────────────────────────────────────────

/// Main loop: poll → translate → on error, wait one period → poll again.
async fn broker_loop(
    mut eventloop: EventLoop,
    event_tx: mpsc::Sender<BrokerEvent>,
    acks: Arc<SubAckTracker>,
    reconnect_period: Duration,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let polled = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            polled = eventloop.poll() => polled,
        };

        let event = match polled {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(attempt, "broker connected");
                attempt = 0;
                Some(BrokerEvent::Connected)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!(topic = %publish.topic, bytes = publish.payload.len(), "broker message");
                Some(BrokerEvent::Message(InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                    qos: publish.qos,
                    retain: publish.retain,
                }))
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                acks.resolve(ack.pkid, &ack.return_codes);
                None
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                acks.assign(pkid);
                None
            }
            Ok(_) => None,
            Err(e) => {
                acks.fail_all();

                if let Some(reason) = auth_refusal(&e) {
                    warn!(%reason, "broker rejected credentials, giving up");
                    let _ = event_tx.send(BrokerEvent::AuthRejected { reason }).await;
                    break;
                }

                warn!(error = %e, attempt, "broker connection lost");
                if event_tx
                    .send(BrokerEvent::Disconnected {
                        reason: e.to_string(),
                    })
                    .await
                    .is_err()
                {
                    break;
                }

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(reconnect_period) => {}
                }

                attempt = attempt.saturating_add(1);
                Some(BrokerEvent::Reconnecting { attempt })
            }
        };

        if let Some(event) = event {
            if event_tx.send(event).await.is_err() {
                debug!("broker event receiver dropped");
                break;
            }
        }
    }

    debug!("broker loop exiting");
}

/// Connection refusals that retrying cannot fix.
fn auth_refusal(err: &ConnectionError) -> Option<String> {
    match err {
        ConnectionError::ConnectionRefused(
            code @ (ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized),
        ) => Some(format!("{code:?}")),
        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn suback_resolves_in_request_order() {
        let acks = SubAckTracker::default();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();

        acks.enqueue("M/TRANSFER/A", tx_a);
        acks.enqueue("M/TRANSFER/B", tx_b);
        acks.assign(7);
        acks.assign(8);

        acks.resolve(8, &[SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        acks.resolve(7, &[SubscribeReasonCode::Success(QoS::AtMostOnce)]);

        assert_eq!(rx_a.await.unwrap().unwrap(), QoS::AtMostOnce);
        assert_eq!(rx_b.await.unwrap().unwrap(), QoS::AtLeastOnce);
    }

    #[tokio::test]
    async fn suback_failure_maps_to_refusal() {
        let acks = SubAckTracker::default();
        let (tx, rx) = oneshot::channel();
        acks.enqueue("M/TRANSFER/X", tx);
        acks.assign(1);
        acks.resolve(1, &[SubscribeReasonCode::Failure]);

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::SubscriptionRefused { ref topic } if topic == "M/TRANSFER/X"));
    }

    #[tokio::test]
    async fn fail_all_releases_waiters() {
        let acks = SubAckTracker::default();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        acks.enqueue("a", tx_a);
        acks.enqueue("b", tx_b);
        acks.assign(3);

        acks.fail_all();

        assert!(matches!(rx_a.await.unwrap(), Err(Error::BrokerClosed)));
        assert!(matches!(rx_b.await.unwrap(), Err(Error::BrokerClosed)));
    }

    #[test]
    fn only_credential_refusals_are_fatal() {
        let bad_creds =
            ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword);
        let unavailable = ConnectionError::ConnectionRefused(ConnectReturnCode::ServiceUnavailable);

        assert!(auth_refusal(&bad_creds).is_some());
        assert!(auth_refusal(&unavailable).is_none());
    }
}
