use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Packet, Publish, QoS, SubscribeReasonCode};
use tracing::{debug, info, warn};

use crate::config::BrokerSettings;
use crate::utils::error::{ConfigError, ConnectError, RequestError, SubscribeError};

/// Lifecycle of the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    Reconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Subscribed => "subscribed",
            SessionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Requests the session sends to the broker. Implemented by `rumqttc::AsyncClient`.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), RequestError>;
    async fn unsubscribe(&self, topic: &str) -> Result<(), RequestError>;
    async fn disconnect(&self) -> Result<(), RequestError>;
}

#[async_trait]
impl BrokerClient for AsyncClient {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), RequestError> {
        AsyncClient::subscribe(self, topic, qos)
            .await
            .map_err(|e| RequestError(e.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), RequestError> {
        AsyncClient::unsubscribe(self, topic)
            .await
            .map_err(|e| RequestError(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), RequestError> {
        AsyncClient::disconnect(self)
            .await
            .map_err(|e| RequestError(e.to_string()))
    }
}

/// Capped exponential delay used between reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

pub fn qos_from_u8(qos: u8) -> Result<QoS, ConfigError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ConfigError::Invalid {
            key: "qos",
            message: format!("{other} is not 0, 1 or 2"),
        }),
    }
}

/// Subscription state machine driven by the event loop.
///
/// Connect failures before the first CONNACK are retried at a fixed
/// interval forever. Once connected, a lost connection is retried with
/// capped exponential backoff. Every CONNACK triggers a fresh subscribe;
/// a failed or rejected subscribe is fatal.
pub struct Session<C: BrokerClient> {
    client: C,
    topic: String,
    qos: QoS,
    state: SessionState,
    connect_retry: Duration,
    backoff: Backoff,
}

impl<C: BrokerClient> Session<C> {
    /// First delay after losing an established connection.
    pub const RECONNECT_INITIAL: Duration = Duration::from_secs(1);

    pub fn new(client: C, settings: &BrokerSettings, qos: QoS) -> Self {
        Self {
            client,
            topic: settings.topic.clone(),
            qos,
            state: SessionState::Disconnected,
            connect_retry: settings.connect_retry(),
            backoff: Backoff::new(Self::RECONNECT_INITIAL, settings.max_reconnect()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn start(&mut self) {
        self.set_state(SessionState::Connecting);
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "session state changed");
            self.state = next;
        }
    }

    /// Handles one event from the client library. Returns delivered publishes.
    pub async fn on_event(&mut self, event: Event) -> Result<Option<Publish>, SubscribeError> {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => {
                self.on_connect().await?;
                Ok(None)
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    return Err(SubscribeError::Rejected {
                        topic: self.topic.clone(),
                    });
                }
                self.set_state(SessionState::Subscribed);
                info!(topic = %self.topic, "subscribed to topic");
                Ok(None)
            }
            Event::Incoming(Packet::Publish(publish)) => Ok(Some(publish)),
            Event::Incoming(Packet::UnsubAck(_)) => {
                debug!(topic = %self.topic, "unsubscribed");
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    async fn on_connect(&mut self) -> Result<(), SubscribeError> {
        info!("connected to MQTT broker");
        self.set_state(SessionState::Connected);
        self.backoff.reset();
        self.client
            .subscribe(&self.topic, self.qos)
            .await
            .map_err(|source| SubscribeError::Request {
                topic: self.topic.clone(),
                source,
            })
    }

    /// Records a failed poll and returns how long to wait before the next one.
    pub fn on_connection_error(&mut self, err: ConnectError) -> Duration {
        match self.state {
            SessionState::Disconnected | SessionState::Connecting => {
                self.set_state(SessionState::Connecting);
                warn!(error = %err, retry_in = ?self.connect_retry, "failed to connect to MQTT broker, retrying");
                self.connect_retry
            }
            SessionState::Connected | SessionState::Subscribed => {
                self.set_state(SessionState::Reconnecting);
                let delay = self.backoff.next_delay();
                warn!(error = %err, retry_in = ?delay, "connection lost");
                delay
            }
            SessionState::Reconnecting => {
                let delay = self.backoff.next_delay();
                warn!(error = %err, retry_in = ?delay, "reconnect attempt failed");
                delay
            }
        }
    }

    /// Unsubscribes and disconnects if a connection is up.
    ///
    /// Returns whether a disconnect was requested and should be flushed.
    pub async fn shutdown(&mut self) -> bool {
        let connected = matches!(
            self.state,
            SessionState::Connected | SessionState::Subscribed
        );
        if self.state == SessionState::Subscribed {
            if let Err(e) = self.client.unsubscribe(&self.topic).await {
                warn!(topic = %self.topic, error = %e, "unsubscribe failed");
            }
        }
        if connected {
            if let Err(e) = self.client.disconnect().await {
                warn!(error = %e, "disconnect failed");
            }
        }
        self.set_state(SessionState::Disconnected);
        connected
    }
}
