//! [`Turtle`] – the registry's record for one remote turtle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quayos_middleware::{EventBus, Topic};
use quayos_types::{Event, EventPayload, QuayError, StatusMessage};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::registry::{DeviceHandle, EVENT_SOURCE};

#[derive(Default)]
struct TurtleState {
    status: Option<StatusMessage>,
    last_seen: Option<DateTime<Utc>>,
}

/// A registered turtle.  Shared as `Arc<Turtle>`; status writes go through
/// an internal lock so concurrent updates to one turtle serialise.
pub struct Turtle {
    id: String,
    state: RwLock<TurtleState>,
    bus: EventBus,
}

impl Turtle {
    pub(crate) fn new(id: impl Into<String>, bus: EventBus) -> Self {
        Self {
            id: id.into(),
            state: RwLock::new(TurtleState::default()),
            bus,
        }
    }

    /// Latest accepted status, if any has arrived yet.
    pub async fn status(&self) -> Option<StatusMessage> {
        self.state.read().await.status.clone()
    }

    /// When the latest status arrived.
    pub async fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_seen
    }

    /// `false` until an online status has been received.
    pub async fn is_online(&self) -> bool {
        self.state
            .read()
            .await
            .status
            .as_ref()
            .is_some_and(|s| s.online)
    }
}

#[async_trait]
impl DeviceHandle for Turtle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn update_status(&self, status: StatusMessage) -> Result<(), QuayError> {
        let payload = EventPayload::TurtleStatusUpdated {
            turtle_id: self.id.clone(),
            online: status.online,
            occupied_slots: status.occupied_slots(),
        };
        {
            let mut state = self.state.write().await;
            state.status = Some(status);
            state.last_seen = Some(Utc::now());
        }
        debug!(turtle_id = %self.id, "turtle status updated");

        if let Err(e) = self.bus.publish_to(Topic::Status, Event::new(EVENT_SOURCE, payload)) {
            trace!(error = %e, "status event not delivered");
        }
        Ok(())
    }
}
