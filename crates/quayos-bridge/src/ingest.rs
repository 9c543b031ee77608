//! Status ingestion: one inbound `(payload, topic)` event becomes at most
//! one registry mutation.
//!
//! * **Identifier** – recovered from `<base>/<turtleId>/status`.  Any other
//!   topic is logged as an error and dropped.
//! * **Null payload** – the turtle deregistered; it is removed from the
//!   registry.
//! * **Status object** – while the turtle is online, array slots in its
//!   inventory are replaced with empty slots; the record is then fetched or
//!   created and its status replaced.
//!
//! Failures after the identifier is known are logged as warnings and
//! swallowed.  Nothing is retried; losing one update is preferred over
//! stalling the messages behind it.

use std::sync::Arc;

use async_trait::async_trait;
use quayos_middleware::{InboundMessage, MessageHandler, TopicLayout};
use quayos_registry::DeviceRegistry;
use quayos_types::{QuayError, StatusMessage};
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

/// Stateless handler turning status messages into registry calls.
pub struct StatusIngestionHandler {
    layout: TopicLayout,
    registry: Arc<dyn DeviceRegistry>,
}

impl StatusIngestionHandler {
    pub fn new(layout: TopicLayout, registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { layout, registry }
    }

    pub fn layout(&self) -> &TopicLayout {
        &self.layout
    }

    /// Handle one already-decoded status event.  `None` is the null payload.
    pub async fn handle(&self, payload: Option<Value>, topic: &str) {
        self.ingest(topic, Ok(payload)).await;
    }

    #[instrument(name = "status_ingest", skip_all, fields(topic = %topic))]
    async fn ingest(&self, topic: &str, payload: Result<Option<Value>, QuayError>) {
        let Some(turtle_id) = self.layout.turtle_id(topic) else {
            let err = QuayError::MalformedTopic(topic.to_string());
            error!(error = %err, kind = err.kind(), "turtle id missing from topic, message dropped");
            return;
        };

        if let Err(e) = self.apply(turtle_id, payload).await {
            warn!(
                turtle_id,
                error = %e,
                kind = e.kind(),
                "failed to ingest turtle status, message dropped"
            );
        }
    }

    async fn apply(
        &self,
        turtle_id: &str,
        payload: Result<Option<Value>, QuayError>,
    ) -> Result<(), QuayError> {
        let Some(value) = payload? else {
            debug!(turtle_id, "null status, removing turtle");
            return self.registry.remove(turtle_id).await;
        };

        let mut status: StatusMessage = serde_json::from_value(value)?;
        if status.online {
            status.sanitize_inventory();
        }

        let turtle = self.registry.get_or_create(turtle_id).await?;
        turtle.update_status(status).await
    }
}

#[async_trait]
impl MessageHandler for StatusIngestionHandler {
    async fn on_message(&self, message: InboundMessage) {
        let payload = decode_payload(&message.payload);
        self.ingest(&message.topic, payload).await;
    }
}

/// Decode raw MQTT payload bytes.
///
/// An empty payload (a cleared retained message) and the JSON literal
/// `null` both decode to `None`.
pub fn decode_payload(bytes: &[u8]) -> Result<Option<Value>, QuayError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quayos_registry::DeviceHandle;
    use serde_json::json;
    use std::sync::Mutex;

    // ------------------------------------------------------------------
    // Test doubles
    // ------------------------------------------------------------------

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Remove(String),
        GetOrCreate(String),
        Update(String, Value),
    }

    #[derive(Default)]
    struct RecordingRegistry {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_get_or_create: bool,
        fail_update: bool,
    }

    impl RecordingRegistry {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct RecordingHandle {
        id: String,
        calls: Arc<Mutex<Vec<Call>>>,
        fail: bool,
    }

    #[async_trait]
    impl DeviceHandle for RecordingHandle {
        fn id(&self) -> &str {
            &self.id
        }

        async fn update_status(&self, status: StatusMessage) -> Result<(), QuayError> {
            self.calls.lock().unwrap().push(Call::Update(
                self.id.clone(),
                serde_json::to_value(&status).unwrap(),
            ));
            if self.fail {
                return Err(QuayError::Registry {
                    turtle_id: self.id.clone(),
                    details: "write rejected".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DeviceRegistry for RecordingRegistry {
        async fn get_or_create(&self, turtle_id: &str) -> Result<Arc<dyn DeviceHandle>, QuayError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::GetOrCreate(turtle_id.to_string()));
            if self.fail_get_or_create {
                return Err(QuayError::Registry {
                    turtle_id: turtle_id.to_string(),
                    details: "backend unavailable".to_string(),
                });
            }
            Ok(Arc::new(RecordingHandle {
                id: turtle_id.to_string(),
                calls: self.calls.clone(),
                fail: self.fail_update,
            }))
        }

        async fn remove(&self, turtle_id: &str) -> Result<(), QuayError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Remove(turtle_id.to_string()));
            Ok(())
        }
    }

    fn handler_with(registry: Arc<RecordingRegistry>) -> StatusIngestionHandler {
        StatusIngestionHandler::new(TopicLayout::default(), registry)
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn null_payload_removes_turtle_once() {
        let registry = Arc::new(RecordingRegistry::default());
        let handler = handler_with(registry.clone());

        handler.handle(None, "quayos/turtles/t42/status").await;

        assert_eq!(registry.calls(), vec![Call::Remove("t42".to_string())]);
    }

    #[tokio::test]
    async fn repeated_null_payloads_both_remove() {
        let registry = Arc::new(RecordingRegistry::default());
        let handler = handler_with(registry.clone());

        handler.handle(None, "quayos/turtles/t1/status").await;
        handler.handle(None, "quayos/turtles/t1/status").await;

        assert_eq!(
            registry.calls(),
            vec![Call::Remove("t1".to_string()), Call::Remove("t1".to_string())]
        );
    }

    #[tokio::test]
    async fn malformed_topics_never_reach_registry() {
        let registry = Arc::new(RecordingRegistry::default());
        let handler = handler_with(registry.clone());

        for topic in ["quayos/turtles/status", "other/topic", "quayos/turtles/a/b/status"] {
            handler.handle(None, topic).await;
            handler
                .handle(Some(json!({ "online": true, "inventory": [] })), topic)
                .await;
        }

        assert!(registry.calls().is_empty());
    }

    #[tokio::test]
    async fn online_status_replaces_array_slots() {
        let registry = Arc::new(RecordingRegistry::default());
        let handler = handler_with(registry.clone());

        handler
            .handle(
                Some(json!({
                    "online": true,
                    "inventory": [{"name": "axe"}, [1, 2], {"name": "pick"}],
                })),
                "quayos/turtles/t42/status",
            )
            .await;

        let calls = registry.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], Call::GetOrCreate("t42".to_string()));
        match &calls[1] {
            Call::Update(id, status) => {
                assert_eq!(id, "t42");
                assert_eq!(
                    status["inventory"],
                    json!([{"name": "axe"}, null, {"name": "pick"}])
                );
                assert_eq!(status["online"], json!(true));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_status_is_forwarded_unmodified() {
        let registry = Arc::new(RecordingRegistry::default());
        let handler = handler_with(registry.clone());

        handler
            .handle(
                Some(json!({ "online": false, "inventory": [[1, 2]], "fuel": 0 })),
                "quayos/turtles/t7/status",
            )
            .await;

        match registry.calls().last() {
            Some(Call::Update(_, status)) => {
                assert_eq!(status["inventory"], json!([[1, 2]]));
                assert_eq!(status["fuel"], json!(0));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_payload_is_swallowed_before_registry() {
        let registry = Arc::new(RecordingRegistry::default());
        let handler = handler_with(registry.clone());

        handler
            .handle(Some(json!({ "inventory": [] })), "quayos/turtles/t1/status")
            .await;
        handler
            .handle(Some(json!("online")), "quayos/turtles/t1/status")
            .await;

        assert!(registry.calls().is_empty());
    }

    #[tokio::test]
    async fn failing_get_or_create_is_swallowed() {
        let registry = Arc::new(RecordingRegistry {
            fail_get_or_create: true,
            ..RecordingRegistry::default()
        });
        let handler = handler_with(registry.clone());

        handler
            .handle(Some(json!({ "online": true, "inventory": [] })), "quayos/turtles/t1/status")
            .await;

        assert_eq!(registry.calls(), vec![Call::GetOrCreate("t1".to_string())]);
    }

    #[tokio::test]
    async fn failing_update_is_swallowed() {
        let registry = Arc::new(RecordingRegistry {
            fail_update: true,
            ..RecordingRegistry::default()
        });
        let handler = handler_with(registry.clone());

        handler
            .handle(Some(json!({ "online": true, "inventory": [] })), "quayos/turtles/t1/status")
            .await;

        assert_eq!(registry.calls().len(), 2);
    }

    #[tokio::test]
    async fn raw_messages_are_decoded() {
        let registry = Arc::new(RecordingRegistry::default());
        let handler = handler_with(registry.clone());

        handler
            .on_message(InboundMessage::new("quayos/turtles/t1/status", Vec::new()))
            .await;
        handler
            .on_message(InboundMessage::new("quayos/turtles/t2/status", b"null".to_vec()))
            .await;
        handler
            .on_message(InboundMessage::new("quayos/turtles/t3/status", b"{not json".to_vec()))
            .await;
        handler
            .on_message(InboundMessage::new(
                "quayos/turtles/t4/status",
                br#"{"online":true,"inventory":[[1]]}"#.to_vec(),
            ))
            .await;

        let calls = registry.calls();
        assert_eq!(calls[0], Call::Remove("t1".to_string()));
        assert_eq!(calls[1], Call::Remove("t2".to_string()));
        assert_eq!(calls[2], Call::GetOrCreate("t4".to_string()));
        assert!(matches!(&calls[3], Call::Update(id, status) if id == "t4" && status["inventory"] == json!([null])));
        assert_eq!(calls.len(), 4);
    }

    #[test]
    fn decode_payload_variants() {
        assert_eq!(decode_payload(b"").unwrap(), None);
        assert_eq!(decode_payload(b"  \n").unwrap(), None);
        assert_eq!(decode_payload(b"null").unwrap(), None);
        assert_eq!(decode_payload(b"{\"a\":1}").unwrap(), Some(json!({"a": 1})));
        assert!(matches!(decode_payload(b"{"), Err(QuayError::InvalidPayload(_))));
    }
}
