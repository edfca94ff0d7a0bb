use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Publish, QoS, TlsConfiguration,
    Transport,
};
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use url::{Host, Url};

use crate::config::BrokerSettings;
use crate::dispatcher::NotificationHandler;
use crate::session::state::{Session, qos_from_u8};
use crate::session::tls;
use crate::utils::error::{ConfigError, ConnectError, SubscribeError};

/// Capacity of the request channel between `AsyncClient` and the event loop.
const REQUEST_CAPACITY: usize = 64;

/// Messages allowed to wait for the delivery task before new ones are dropped.
pub const DELIVERY_CAPACITY: usize = 128;

/// Translates the broker settings into client options.
///
/// `tcp://` and `mqtt://` connect in plain text (default port 1883);
/// `ssl://`, `tls://` and `mqtts://` use TLS (default port 8883).
pub fn mqtt_options(settings: &BrokerSettings) -> Result<MqttOptions, ConfigError> {
    let invalid = |message: String| ConfigError::Invalid {
        key: "server",
        message,
    };

    let url = Url::parse(&settings.server).map_err(|e| invalid(e.to_string()))?;
    let (secure, default_port) = match url.scheme() {
        "tcp" | "mqtt" => (false, 1883),
        "ssl" | "tls" | "mqtts" => (true, 8883),
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        _ => return Err(invalid("missing host".to_string())),
    };
    let port = url.port().unwrap_or(default_port);

    let mut options = MqttOptions::new(settings.client_id.clone(), host, port);
    options
        .set_keep_alive(settings.keep_alive())
        .set_clean_session(true)
        .set_max_packet_size(settings.max_packet_size, settings.max_packet_size);

    if let Some(username) = settings.username.as_deref().filter(|u| !u.is_empty()) {
        options.set_credentials(username, settings.password.clone().unwrap_or_default());
    }

    let has_tls_material =
        settings.cafile.is_some() || settings.cert.is_some() || settings.key.is_some();
    if secure {
        let config = tls::client_config(settings)?;
        options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
            Arc::new(config),
        )));
    } else if has_tls_material {
        // still load it so broken material fails at startup
        tls::client_config(settings)?;
        warn!(server = %settings.server, "certificate options are ignored for a plain-text broker URL");
    }

    Ok(options)
}

/// Owns the broker session for the lifetime of the process.
pub struct SessionManager {
    settings: BrokerSettings,
    options: MqttOptions,
    qos: QoS,
}

impl SessionManager {
    pub fn new(settings: BrokerSettings) -> Result<Self, ConfigError> {
        let options = mqtt_options(&settings)?;
        let qos = qos_from_u8(settings.qos)?;
        Ok(Self {
            settings,
            options,
            qos,
        })
    }

    /// Runs the session until `shutdown` resolves or a subscribe fails.
    ///
    /// Delivered messages are handed to `handler` one at a time on a separate
    /// task so the event loop keeps answering keep-alives while downloads run.
    /// At most `DELIVERY_CAPACITY` messages wait for that task; further ones
    /// are dropped with a warning. On the way out the session unsubscribes
    /// and disconnects, queued messages are discarded, and the message being
    /// handled gets up to `shutdown_grace` before it is aborted.
    pub async fn run<H, S>(
        self,
        handler: Arc<H>,
        shutdown: S,
        shutdown_grace: Duration,
    ) -> Result<(), SubscribeError>
    where
        H: NotificationHandler,
        S: Future<Output = ()>,
    {
        let (client, mut eventloop) = AsyncClient::new(self.options, REQUEST_CAPACITY);
        let mut session = Session::new(client, &self.settings, self.qos);

        let (mut queue, rx) = DeliveryQueue::new(DELIVERY_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();
        let mut delivery = tokio::spawn(deliver(handler, rx, stop_rx));

        info!(server = %self.settings.server, client_id = %self.settings.client_id, "connecting to MQTT broker");
        session.start();

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break Ok(());
                }
                polled = eventloop.poll() => {
                    match polled {
                        Ok(event) => match session.on_event(event).await {
                            Ok(Some(publish)) => {
                                queue.offer(publish);
                            }
                            Ok(None) => {}
                            Err(e) => break Err(e),
                        },
                        Err(e) => {
                            let delay = session.on_connection_error(ConnectError(e.to_string()));
                            tokio::select! {
                                _ = &mut shutdown => {
                                    info!("shutdown signal received");
                                    break Ok(());
                                }
                                _ = sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        };

        if session.shutdown().await {
            flush_disconnect(&mut eventloop, self.settings.disconnect_grace()).await;
        }

        let _ = stop_tx.send(());
        drop(queue);
        if timeout(shutdown_grace, &mut delivery).await.is_err() {
            warn!(grace = ?shutdown_grace, "in-flight downloads still running after grace period, aborting");
            delivery.abort();
        }

        info!("disconnected");
        result
    }
}

/// Polls until the queued DISCONNECT has been written or `grace` elapses.
async fn flush_disconnect(eventloop: &mut EventLoop, grace: Duration) {
    let flushed = timeout(grace, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    if flushed.is_err() {
        warn!(grace = ?grace, "broker disconnect did not complete within grace period");
    }
}

/// Bounded hand-off from the event loop to the delivery task.
///
/// `offer` never waits, so a slow handler cannot stall keep-alives.
pub struct DeliveryQueue {
    tx: Sender<Publish>,
    dropped: u64,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> (Self, Receiver<Publish>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, dropped: 0 }, rx)
    }

    /// Queues `publish` for delivery. Returns `false` if it was dropped.
    pub fn offer(&mut self, publish: Publish) -> bool {
        match self.tx.try_send(publish) {
            Ok(()) => true,
            Err(TrySendError::Full(publish)) => {
                self.dropped += 1;
                warn!(
                    topic = %publish.topic,
                    dropped = self.dropped,
                    "delivery queue full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(publish)) => {
                warn!(topic = %publish.topic, "delivery task stopped, dropping message");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Hands messages to the handler strictly one after another.
///
/// Once `stop` fires the message in progress is finished and everything
/// still queued is discarded.
pub async fn deliver<H: NotificationHandler>(
    handler: Arc<H>,
    mut rx: Receiver<Publish>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let publish = tokio::select! {
            biased;
            _ = &mut stop => break,
            next = rx.recv() => match next {
                Some(publish) => publish,
                None => return,
            },
        };
        handler.handle(&publish.topic, &publish.payload).await;
    }

    rx.close();
    let mut discarded = 0usize;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        debug!(discarded, "discarded queued messages at shutdown");
    }
}
