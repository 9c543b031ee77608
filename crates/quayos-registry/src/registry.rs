//! [`TurtleRegistry`] – in-memory registry of every known turtle.
//!
//! The bridge talks to the registry only through the [`DeviceRegistry`] and
//! [`DeviceHandle`] traits, so a persistent or remote registry can be
//! swapped in without touching ingestion logic.
//!
//! # Events
//!
//! Every mutation is announced on the [`EventBus`]:
//!
//! | Mutation | Topic | Payload |
//! |---|---|---|
//! | first sighting | [`Topic::Lifecycle`] | `TurtleRegistered` |
//! | status update | [`Topic::Status`] | `TurtleStatusUpdated` |
//! | removal | [`Topic::Lifecycle`] | `TurtleRemoved` |
//!
//! Mutations succeed whether or not anyone is listening.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use quayos_middleware::{EventBus, Topic};
use quayos_types::{Event, EventPayload, QuayError, StatusMessage};
use tokio::sync::RwLock;
use tracing::{debug, info, trace};

use crate::turtle::Turtle;

pub(crate) const EVENT_SOURCE: &str = "quayos-registry::turtles";

/// A mutable handle on one registered device.
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    /// Stable identifier, e.g. `"t42"`.
    fn id(&self) -> &str;

    /// Replace the device's status record.
    ///
    /// # Errors
    ///
    /// Returns [`QuayError::Registry`] when the backend rejects the update.
    async fn update_status(&self, status: StatusMessage) -> Result<(), QuayError>;
}

/// Registry operations the ingestion path depends on.
///
/// # Contract
///
/// * `get_or_create` – atomic: concurrent calls for one id yield the same
///   device.
/// * `remove` – idempotent: removing an unknown id succeeds.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn get_or_create(&self, turtle_id: &str) -> Result<Arc<dyn DeviceHandle>, QuayError>;

    async fn remove(&self, turtle_id: &str) -> Result<(), QuayError>;
}

/// In-memory [`DeviceRegistry`] keyed by turtle id.
#[derive(Default)]
pub struct TurtleRegistry {
    turtles: RwLock<HashMap<String, Arc<Turtle>>>,
    bus: EventBus,
}

impl TurtleRegistry {
    /// Create an empty registry announcing mutations on `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            turtles: RwLock::new(HashMap::new()),
            bus,
        }
    }

    pub async fn get(&self, turtle_id: &str) -> Option<Arc<Turtle>> {
        self.turtles.read().await.get(turtle_id).cloned()
    }

    /// Identifiers of every registered turtle, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.turtles.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.turtles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.turtles.read().await.is_empty()
    }

    fn announce(&self, topic: Topic, payload: EventPayload) {
        if let Err(e) = self.bus.publish_to(topic, Event::new(EVENT_SOURCE, payload)) {
            trace!(error = %e, "registry event not delivered");
        }
    }
}

#[async_trait]
impl DeviceRegistry for TurtleRegistry {
    async fn get_or_create(&self, turtle_id: &str) -> Result<Arc<dyn DeviceHandle>, QuayError> {
        if turtle_id.is_empty() {
            return Err(QuayError::Registry {
                turtle_id: String::new(),
                details: "turtle id must not be empty".to_string(),
            });
        }
        if let Some(turtle) = self.get(turtle_id).await {
            return Ok(turtle);
        }

        // Re-check under the write lock; another caller may have won the race.
        let mut turtles = self.turtles.write().await;
        if let Some(turtle) = turtles.get(turtle_id) {
            return Ok(Arc::clone(turtle) as Arc<dyn DeviceHandle>);
        }
        let turtle = Arc::new(Turtle::new(turtle_id, self.bus.clone()));
        turtles.insert(turtle_id.to_string(), Arc::clone(&turtle));
        drop(turtles);

        info!(turtle_id, "turtle registered");
        self.announce(
            Topic::Lifecycle,
            EventPayload::TurtleRegistered {
                turtle_id: turtle_id.to_string(),
            },
        );
        Ok(turtle)
    }

    async fn remove(&self, turtle_id: &str) -> Result<(), QuayError> {
        let removed = self.turtles.write().await.remove(turtle_id);
        if removed.is_none() {
            debug!(turtle_id, "remove for unknown turtle ignored");
            return Ok(());
        }

        info!(turtle_id, "turtle removed");
        self.announce(
            Topic::Lifecycle,
            EventPayload::TurtleRemoved {
                turtle_id: turtle_id.to_string(),
            },
        );
        Ok(())
    }
}
