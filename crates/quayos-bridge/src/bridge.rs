//! [`Bridge`] – connection lifecycle around the status ingestion handler.
//!
//! The bridge owns its transport handle explicitly; nothing about the
//! connection lives in module-level state.  `run` connects, subscribes to
//! `<base>/+/status`, and parks until the transport reports offline.  `stop`
//! requests a disconnect and waits for that same signal.

use std::sync::Arc;

use quayos_middleware::{LinkState, StatusTransport, TopicLayout};
use quayos_registry::DeviceRegistry;
use quayos_types::QuayError;
use tracing::info;

use crate::ingest::StatusIngestionHandler;

pub struct Bridge {
    transport: Arc<dyn StatusTransport>,
    handler: Arc<StatusIngestionHandler>,
}

impl Bridge {
    pub fn new(
        transport: Arc<dyn StatusTransport>,
        registry: Arc<dyn DeviceRegistry>,
        layout: TopicLayout,
    ) -> Self {
        Self {
            transport,
            handler: Arc::new(StatusIngestionHandler::new(layout, registry)),
        }
    }

    pub fn state(&self) -> LinkState {
        self.transport.state()
    }

    /// Connect, subscribe, then wait until the connection goes offline.
    ///
    /// # Errors
    ///
    /// Returns [`QuayError::Transport`] when connecting or subscribing
    /// fails.  Errors while handling individual messages never surface here.
    pub async fn run(&self) -> Result<(), QuayError> {
        self.transport.connect().await?;

        let filter = self.handler.layout().subscription_filter();
        self.transport
            .subscribe(&filter, self.handler.clone())
            .await?;
        info!(filter = %filter, "bridge listening for turtle status");

        self.transport.offline().await;
        info!("bridge offline");
        Ok(())
    }

    /// Request a disconnect and wait for the transport to go offline.
    pub async fn stop(&self) -> Result<(), QuayError> {
        info!("stopping bridge");
        self.transport.disconnect().await?;
        self.transport.offline().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quayos_middleware::{EventBus, LoopbackTransport, Topic};
    use quayos_registry::TurtleRegistry;
    use quayos_types::EventPayload;
    use std::time::Duration;

    struct Harness {
        transport: Arc<LoopbackTransport>,
        registry: Arc<TurtleRegistry>,
        bridge: Arc<Bridge>,
    }

    fn harness(bus: EventBus) -> Harness {
        let transport = Arc::new(LoopbackTransport::new());
        let registry = Arc::new(TurtleRegistry::new(bus));
        let bridge = Arc::new(Bridge::new(
            transport.clone(),
            registry.clone(),
            TopicLayout::default(),
        ));
        Harness {
            transport,
            registry,
            bridge,
        }
    }

    async fn wait_online(transport: &LoopbackTransport) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while transport.state() != LinkState::Online {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("transport must come online");
    }

    #[tokio::test]
    async fn run_ingests_until_stopped() {
        let h = harness(EventBus::default());
        let runner = {
            let bridge = h.bridge.clone();
            tokio::spawn(async move { bridge.run().await })
        };
        wait_online(&h.transport).await;
        // Subscription lands right after connect; give run() a moment.
        tokio::time::timeout(Duration::from_secs(1), async {
            while h
                .transport
                .inject("quayos/turtles/t1/status", br#"{"online":true,"inventory":[]}"#.to_vec())
                .await
                .unwrap()
                == 0
            {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscription must be registered");

        let turtle = h.registry.get("t1").await.expect("t1 registered");
        assert!(turtle.is_online().await);

        h.transport
            .inject("quayos/turtles/t1/status", b"null".to_vec())
            .await
            .unwrap();
        assert!(h.registry.get("t1").await.is_none());

        h.bridge.stop().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("run must return after stop")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(h.bridge.state(), LinkState::Offline);
    }

    #[tokio::test]
    async fn run_returns_when_peer_drops_connection() {
        let h = harness(EventBus::default());
        let runner = {
            let bridge = h.bridge.clone();
            tokio::spawn(async move { bridge.run().await })
        };
        wait_online(&h.transport).await;
        h.transport.drop_connection();

        let result = tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("run must return when offline")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn run_fails_when_connect_fails() {
        let h = harness(EventBus::default());
        h.transport.disconnect().await.unwrap();
        let result = h.bridge.run().await;
        assert!(matches!(result, Err(QuayError::Transport(_))));
    }

    #[tokio::test]
    async fn bad_messages_do_not_stop_the_bridge() {
        let bus = EventBus::default();
        let mut lifecycle = bus.subscribe_to(Topic::Lifecycle);
        let h = harness(bus);
        let runner = {
            let bridge = h.bridge.clone();
            tokio::spawn(async move { bridge.run().await })
        };
        wait_online(&h.transport).await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while h
                .transport
                .inject("quayos/turtles/warmup/status", b"null".to_vec())
                .await
                .unwrap()
                == 0
            {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscription must be registered");

        h.transport
            .inject("quayos/turtles/t2/status", b"{garbage".to_vec())
            .await
            .unwrap();
        h.transport
            .inject("quayos/turtles/t2/status", br#"{"online":false,"inventory":[[1,2]]}"#.to_vec())
            .await
            .unwrap();

        let event = lifecycle.recv().await.unwrap();
        assert!(matches!(event.payload, EventPayload::TurtleRegistered { ref turtle_id } if turtle_id == "t2"));
        assert_eq!(h.registry.ids().await, vec!["t2"]);
        assert_eq!(h.bridge.state(), LinkState::Online);

        h.bridge.stop().await.unwrap();
        runner.await.unwrap().unwrap();
    }
}
