//! In-process loopback transport.
//!
//! [`LoopbackTransport`] implements [`StatusTransport`] without a broker.
//! Messages are fed in with [`LoopbackTransport::inject`] and routed to the
//! subscribed handlers using MQTT filter semantics.  This lets the whole
//! bridge run in headless tests and CI pipelines.
//!
//! # Example
//!
//! ```rust
//! use quayos_middleware::{LinkState, LoopbackTransport, StatusTransport};
//!
//! # tokio_test_block(async {
//! let transport = LoopbackTransport::new();
//! transport.connect().await.unwrap();
//! assert_eq!(transport.state(), LinkState::Online);
//! transport.disconnect().await.unwrap();
//! transport.offline().await;
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use quayos_types::QuayError;
use tokio::sync::watch;
use tracing::debug;

use crate::adapter::{InboundMessage, LinkState, MessageHandler, StatusTransport, Subscriptions};

/// Broker-less transport that delivers injected messages synchronously.
pub struct LoopbackTransport {
    state: watch::Sender<LinkState>,
    subscriptions: Subscriptions,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LinkState::Idle);
        Self {
            state,
            subscriptions: Subscriptions::default(),
        }
    }

    /// Deliver a message to every matching handler and wait for them.
    ///
    /// Returns the number of handlers invoked.
    ///
    /// # Errors
    ///
    /// Returns [`QuayError::Transport`] when the transport is not online.
    pub async fn inject(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<usize, QuayError> {
        let current = self.state();
        if current != LinkState::Online {
            return Err(QuayError::Transport(format!(
                "loopback transport is {current:?}, cannot deliver"
            )));
        }
        Ok(self.subscriptions.dispatch(InboundMessage::new(topic, payload)).await)
    }

    /// Simulate the peer dropping the connection.
    pub fn drop_connection(&self) {
        debug!("loopback connection dropped");
        self.state.send_replace(LinkState::Offline);
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusTransport for LoopbackTransport {
    async fn connect(&self) -> Result<(), QuayError> {
        if self.state() == LinkState::Offline {
            return Err(QuayError::Transport(
                "loopback transport is offline and cannot reconnect".to_string(),
            ));
        }
        self.state.send_replace(LinkState::Online);
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), QuayError> {
        self.subscriptions.add(filter, handler).await;
        debug!(filter, "loopback subscription added");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), QuayError> {
        self.state.send_replace(LinkState::Offline);
        Ok(())
    }

    async fn offline(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|s| *s == LinkState::Offline).await;
    }

    fn state(&self) -> LinkState {
        *self.state.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<InboundMessage>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn on_message(&self, message: InboundMessage) {
            self.seen.lock().unwrap().push(message);
        }
    }

    #[tokio::test]
    async fn delivers_only_matching_topics() {
        let transport = LoopbackTransport::new();
        let recorder = Arc::new(Recorder::default());
        transport.connect().await.unwrap();
        transport
            .subscribe("quayos/turtles/+/status", recorder.clone())
            .await
            .unwrap();

        assert_eq!(transport.inject("quayos/turtles/t1/status", b"null".to_vec()).await.unwrap(), 1);
        assert_eq!(transport.inject("quayos/other", b"{}".to_vec()).await.unwrap(), 0);

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].topic, "quayos/turtles/t1/status");
        assert_eq!(seen[0].payload, b"null");
    }

    #[tokio::test]
    async fn inject_requires_online() {
        let transport = LoopbackTransport::new();
        let result = transport.inject("a/b", Vec::new()).await;
        assert!(matches!(result, Err(QuayError::Transport(_))));
    }

    #[tokio::test]
    async fn offline_resolves_after_disconnect() {
        let transport = Arc::new(LoopbackTransport::new());
        transport.connect().await.unwrap();

        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.offline().await })
        };
        transport.disconnect().await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("offline must resolve")
            .unwrap();
        assert_eq!(transport.state(), LinkState::Offline);
        assert!(transport.connect().await.is_err());
    }

    #[tokio::test]
    async fn dropped_connection_reports_offline() {
        let transport = LoopbackTransport::new();
        transport.connect().await.unwrap();
        transport.drop_connection();
        transport.offline().await;
        assert_eq!(transport.state(), LinkState::Offline);
    }
}
