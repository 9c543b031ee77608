//! MQTT transport backed by `rumqttc`.
//!
//! [`MqttTransport`] owns one broker session:
//!
//! * **connect** – builds the rumqttc client, spawns the event-loop task and
//!   waits for the broker's CONNACK (bounded by the connect timeout).
//! * **inbound** – every PUBLISH is routed to the handlers whose filter
//!   matches its topic.  Handlers are awaited inline, so messages are handled
//!   in the order the broker delivered them.
//! * **offline** – the event-loop task marks the link offline when the broker
//!   closes the session, the network fails, or a requested disconnect has
//!   been sent.  Reconnection is left to the caller.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quayos_types::QuayError;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{InboundMessage, LinkState, MessageHandler, StatusTransport, Subscriptions};

/// Default broker when none is configured.
pub const DEFAULT_BROKER_URL: &str = "mqtt://test.mosquitto.org";

/// Default MQTT port when the broker URL omits one.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Capacity of the rumqttc request channel.
const REQUEST_CAPACITY: usize = 64;

/// Connection parameters for [`MqttTransport`].
#[derive(Clone)]
pub struct MqttSettings {
    /// `mqtt://host[:port]`, `tcp://host[:port]` or `host[:port]`.
    pub broker_url: String,
    /// Client id prefix.  A short random suffix is appended per session so
    /// two bridges never evict each other.
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    /// Subscription QoS level (0, 1 or 2).
    pub qos: u8,
    /// Broker credentials; only sent when both are set.
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSettings")
            .field("broker_url", &self.broker_url)
            .field("client_id", &self.client_id)
            .field("keep_alive", &self.keep_alive)
            .field("connect_timeout", &self.connect_timeout)
            .field("qos", &self.qos)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_some() { &"<redacted>" } else { &"<not set>" },
            )
            .finish()
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            client_id: "quayos-bridge".to_string(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            qos: 1,
            username: None,
            password: None,
        }
    }
}

/// rumqttc-backed [`StatusTransport`].
pub struct MqttTransport {
    settings: MqttSettings,
    qos: QoS,
    client: Mutex<Option<AsyncClient>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    state: Arc<watch::Sender<LinkState>>,
    subscriptions: Arc<Subscriptions>,
}

impl MqttTransport {
    /// Create a transport for `settings`.  No network activity happens until
    /// [`StatusTransport::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`QuayError::Config`] when the broker URL or QoS level is
    /// invalid.
    pub fn new(settings: MqttSettings) -> Result<Self, QuayError> {
        parse_broker_url(&settings.broker_url)?;
        let qos = qos_from_level(settings.qos)?;
        let (state, _) = watch::channel(LinkState::Idle);
        Ok(Self {
            settings,
            qos,
            client: Mutex::new(None),
            event_loop: Mutex::new(None),
            state: Arc::new(state),
            subscriptions: Arc::new(Subscriptions::default()),
        })
    }

    fn current_client(&self) -> Option<AsyncClient> {
        self.client.lock().ok().and_then(|guard| guard.as_ref().cloned())
    }

    fn abort_event_loop(&self) {
        if let Ok(mut guard) = self.event_loop.lock()
            && let Some(handle) = guard.take()
        {
            handle.abort();
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.abort_event_loop();
    }
}

#[async_trait]
impl StatusTransport for MqttTransport {
    async fn connect(&self) -> Result<(), QuayError> {
        let current = self.state();
        if current != LinkState::Idle {
            return Err(QuayError::Transport(format!(
                "cannot connect: transport is {current:?}"
            )));
        }

        let (host, port) = parse_broker_url(&self.settings.broker_url)?;
        let suffix = Uuid::new_v4().simple().to_string();
        let client_id = format!("{}-{}", self.settings.client_id, &suffix[..8]);
        let mut options = MqttOptions::new(client_id.clone(), host, port);
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);
        if let (Some(user), Some(pass)) = (&self.settings.username, &self.settings.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        eventloop
            .network_options
            .set_connection_timeout(network_connect_timeout(self.settings.connect_timeout));
        self.state.send_replace(LinkState::Connecting);

        info!(
            broker_url = %self.settings.broker_url,
            client_id = %client_id,
            "connecting to MQTT broker"
        );

        let handle = tokio::spawn(drive_event_loop(
            eventloop,
            Arc::clone(&self.state),
            Arc::clone(&self.subscriptions),
        ));
        if let Ok(mut guard) = self.event_loop.lock() {
            *guard = Some(handle);
        }
        if let Ok(mut guard) = self.client.lock() {
            *guard = Some(client);
        }

        let mut rx = self.state.subscribe();
        let outcome = tokio::time::timeout(
            self.settings.connect_timeout,
            rx.wait_for(|s| *s != LinkState::Connecting),
        )
        .await;

        match outcome {
            Ok(Ok(state)) if *state == LinkState::Online => Ok(()),
            Ok(_) => Err(QuayError::Transport(format!(
                "broker {} closed the connection before accepting the session",
                self.settings.broker_url
            ))),
            Err(_) => {
                self.abort_event_loop();
                self.state.send_replace(LinkState::Offline);
                Err(QuayError::Transport(format!(
                    "no CONNACK from {} within {:?}",
                    self.settings.broker_url, self.settings.connect_timeout
                )))
            }
        }
    }

    async fn subscribe(
        &self,
        filter: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), QuayError> {
        let client = self
            .current_client()
            .ok_or_else(|| QuayError::Transport("cannot subscribe: not connected".to_string()))?;
        // Registered before the request goes out so no early PUBLISH is lost.
        self.subscriptions.add(filter, Arc::clone(&handler)).await;
        if let Err(e) = client.subscribe(filter, self.qos).await {
            self.subscriptions.remove(filter, &handler).await;
            return Err(QuayError::Transport(format!(
                "failed to subscribe to {filter}: {e}"
            )));
        }
        info!(filter, qos = ?self.qos, "subscribed to MQTT topic");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), QuayError> {
        match self.current_client() {
            Some(client) => {
                if let Err(e) = client.disconnect().await {
                    // Request channel closed: the event loop is already gone.
                    debug!(error = %e, "disconnect request not delivered");
                    self.state.send_replace(LinkState::Offline);
                }
            }
            None => {
                self.state.send_replace(LinkState::Offline);
            }
        }
        Ok(())
    }

    async fn offline(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == LinkState::Offline).await;
    }

    fn state(&self) -> LinkState {
        *self.state.borrow()
    }
}

/// Poll the rumqttc event loop until the session ends, then mark the link
/// offline.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    state: Arc<watch::Sender<LinkState>>,
    subscriptions: Arc<Subscriptions>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage::new(publish.topic, publish.payload.to_vec());
                subscriptions.dispatch(message).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(code = ?ack.code, "connected to MQTT broker");
                state.send_replace(LinkState::Online);
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!(pkid = ack.pkid, "subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("broker closed the MQTT session");
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("disconnect sent to MQTT broker");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "MQTT event loop error");
                break;
            }
        }
    }
    // Closes the request channel: later client calls fail fast.
    drop(eventloop);
    state.send_replace(LinkState::Offline);
    info!("MQTT connection offline");
}

/// Socket-level connect timeout handed to rumqttc, in whole seconds.  One
/// second longer than `connect_timeout` so the CONNACK wait always expires
/// first.
fn network_connect_timeout(connect_timeout: Duration) -> u64 {
    let secs = connect_timeout.as_secs() + u64::from(connect_timeout.subsec_nanos() > 0);
    secs + 1
}

/// Parse broker URL in format mqtt://host:port or tcp://host:port or host:port
pub fn parse_broker_url(url: &str) -> Result<(&str, u16), QuayError> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);
    if stripped.contains("://") {
        return Err(QuayError::Config(format!("Unsupported broker URL scheme: {url}")));
    }
    let stripped = stripped.trim_end_matches('/');

    let parts: Vec<&str> = stripped.split(':').collect();
    match parts.as_slice() {
        [host] if !host.is_empty() => Ok((host, DEFAULT_MQTT_PORT)),
        [host, port] if !host.is_empty() => {
            let port = port.parse::<u16>().map_err(|_| {
                QuayError::Config(format!("Invalid port in broker URL: {port}"))
            })?;
            Ok((host, port))
        }
        _ => Err(QuayError::Config(format!("Invalid broker URL format: {url}"))),
    }
}

/// Map a numeric QoS level onto [`QoS`].
pub fn qos_from_level(level: u8) -> Result<QoS, QuayError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(QuayError::Config(format!("QoS must be 0, 1 or 2, got {other}"))),
    }
}
