//! The transport abstraction.
//!
//! The bridge never speaks to a broker directly.  It hands a
//! [`MessageHandler`] to a [`StatusTransport`], which owns the connection and
//! invokes the handler once per inbound message.
//!
//! # Overview
//!
//! - [`StatusTransport`] – `{connect, subscribe, disconnect, offline}`.
//! - [`MqttTransport`][crate::mqtt_adapter::MqttTransport] – rumqttc-backed
//!   broker connection.
//! - [`LoopbackTransport`][crate::loopback_adapter::LoopbackTransport] –
//!   in-process transport for tests and headless runs.

use std::sync::Arc;

use async_trait::async_trait;
use quayos_types::QuayError;
use tokio::sync::RwLock;
use tracing::trace;

use crate::topic;

/// One message as delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Connection state published by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// `connect` has not been called yet.
    Idle,
    /// Waiting for the broker to accept the session.
    Connecting,
    Online,
    /// Terminal: the peer, the network or an explicit disconnect ended the
    /// session.
    Offline,
}

/// Callback invoked once per inbound message.
///
/// Handlers must not fail: whatever goes wrong while handling one message
/// stays inside that call.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: InboundMessage);
}

/// Every broker transport must implement this trait.
///
/// # Contract
///
/// * `connect` – establish the session; resolves once the broker accepted it.
/// * `subscribe` – register `handler` for every message matching `filter`.
/// * `disconnect` – request the session to end.  Completion is observed
///   through `offline`.
/// * `offline` – resolves once the session is [`LinkState::Offline`].
#[async_trait]
pub trait StatusTransport: Send + Sync {
    async fn connect(&self) -> Result<(), QuayError>;

    async fn subscribe(
        &self,
        filter: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), QuayError>;

    async fn disconnect(&self) -> Result<(), QuayError>;

    async fn offline(&self);

    fn state(&self) -> LinkState;
}

/// Filter-to-handler table shared by the transports in this crate.
#[derive(Default)]
pub(crate) struct Subscriptions {
    entries: RwLock<Vec<(String, Arc<dyn MessageHandler>)>>,
}

impl Subscriptions {
    pub(crate) async fn add(&self, filter: &str, handler: Arc<dyn MessageHandler>) {
        self.entries.write().await.push((filter.to_string(), handler));
    }

    /// Drop the entry registered for exactly this `filter` and `handler`.
    pub(crate) async fn remove(&self, filter: &str, handler: &Arc<dyn MessageHandler>) {
        self.entries
            .write()
            .await
            .retain(|(f, h)| !(f == filter && Arc::ptr_eq(h, handler)));
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Hand `message` to every handler whose filter matches its topic, in
    /// subscription order.  Returns the number of handlers invoked.
    pub(crate) async fn dispatch(&self, message: InboundMessage) -> usize {
        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(filter, _)| topic::matches(filter, &message.topic))
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        if handlers.is_empty() {
            trace!(topic = %message.topic, "no subscription matches topic");
        }
        for handler in &handlers {
            handler.on_message(message.clone()).await;
        }
        handlers.len()
    }
}
