//! MQTT relay client
//!
//! Owns the broker connection and the publish path. Connection lifecycle is
//! an explicit state machine driven by the event-loop task; the publish path
//! only consults the state flag, so a broker outage can never stall the
//! dispatch worker for longer than one dropped publish.

mod payload;

pub use payload::CallNotification;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::sip::SipEvent;

/// Delay between reconnection attempts after a lost broker connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Broker connection state. Publishing is permitted only in `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Client for relaying incoming-call events to the MQTT broker.
pub struct RelayClient {
    client: AsyncClient,
    state: Arc<RwLock<ConnectionState>>,
    config: BrokerConfig,
    client_id: String,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl RelayClient {
    /// Build the client and spawn its connection loop. The loop keeps
    /// reconnecting with [`RECONNECT_DELAY`] between attempts until the
    /// cancellation token fires; a broker outage is treated as transient for
    /// the life of the daemon.
    pub fn connect(config: BrokerConfig, cancel: CancellationToken) -> Self {
        let (relay, eventloop) = Self::new(config);
        tokio::spawn(connection_loop(eventloop, relay.state.clone(), cancel));
        relay
    }

    fn new(config: BrokerConfig) -> (Self, EventLoop) {
        let client_id = config.client_id();
        tracing::info!(
            broker = %config.broker,
            port = config.port,
            client_id = %client_id,
            location_id = %config.location_id,
            topic = %config.topic,
            "initializing MQTT relay"
        );

        let mut options = MqttOptions::new(&client_id, &config.broker, config.port);
        if config.is_websocket() {
            options.set_transport(Transport::Ws);
        }
        options.set_credentials(&config.username, &config.password);
        options.set_clean_session(true);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, eventloop) = AsyncClient::new(options, 10);
        let relay = Self {
            client,
            state: Arc::new(RwLock::new(ConnectionState::Connecting)),
            config,
            client_id,
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        };
        (relay, eventloop)
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Relay one event to the broker.
    ///
    /// Non-invite events are logged for visibility and skipped. While the
    /// connection is down the event is dropped, not queued: delivery is
    /// at-most-once from the daemon's perspective, and the dropped counter
    /// (not any retry path) records the loss.
    pub async fn publish(&self, event: &SipEvent) {
        if !event.invite {
            tracing::debug!(
                seq = event.seq,
                source = %event.source_ip,
                dest = %event.dest_ip,
                cseq = %event.cseq_raw,
                "non-invite SIP traffic observed"
            );
            return;
        }

        if self.state().await != ConnectionState::Connected {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                seq = event.seq,
                number = %event.number,
                "broker not connected, dropping call event"
            );
            return;
        }

        let notification = CallNotification::from_event(&self.client_id, event);
        let payload = match serde_json::to_vec(&notification) {
            Ok(payload) => payload,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(seq = event.seq, "failed to serialize notification: {e}");
                return;
            }
        };

        match self
            .client
            .publish(&self.config.topic, QoS::AtLeastOnce, false, payload)
            .await
        {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    seq = event.seq,
                    topic = %self.config.topic,
                    number = %event.number,
                    name = %event.display_name,
                    cseq = %event.cseq_raw,
                    "call event published"
                );
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    seq = event.seq,
                    topic = %self.config.topic,
                    number = %event.number,
                    "failed to publish call event: {e}"
                );
            }
        }
    }

    /// Events successfully handed to the MQTT client.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Invite events dropped because the broker was unavailable or the
    /// publish failed. Distinct from queue overflow drops.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drive the MQTT event loop, tracking connection state.
///
/// `poll` re-dials with the last-known options after an error, so retrying
/// is just: mark disconnected, wait, poll again. Unbounded by design.
async fn connection_loop(
    mut eventloop: EventLoop,
    state: Arc<RwLock<ConnectionState>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("relay connection loop cancelled");
                return;
            }
            result = eventloop.poll() => match result {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    *state.write().await = ConnectionState::Connected;
                    tracing::info!("MQTT connected");
                }
                Ok(_) => {}
                Err(e) => {
                    let was_connected = {
                        let mut state = state.write().await;
                        let was = *state == ConnectionState::Connected;
                        *state = ConnectionState::Disconnected;
                        was
                    };
                    if was_connected {
                        tracing::warn!("MQTT disconnected: {e}, reconnecting");
                    } else {
                        tracing::warn!("MQTT connection attempt failed: {e}, retrying");
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
    }
}
