use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// One slot of a turtle's inventory as reported over the wire.
///
/// Turtles report a fixed-length slot list.  A slot holds an item
/// description object, nothing (`null`), or an array.  Arrays are a
/// transient representation emitted while the turtle is still scanning its
/// inventory and never describe an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InventorySlot {
    /// Empty slot, serialised as `null`.
    Empty,
    /// Item description, e.g. `{"name": "minecraft:diamond_pickaxe", "count": 1}`.
    Item(Map<String, Value>),
    /// Transient array representation.
    Stack(Vec<Value>),
}

impl InventorySlot {
    pub fn is_item(&self) -> bool {
        matches!(self, InventorySlot::Item(_))
    }
}

/// Status report published by a turtle on `<base>/<turtleId>/status`.
///
/// Fields beyond `online` and `inventory` are kept verbatim in `extra` so
/// the registry sees everything the turtle sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub online: bool,
    pub inventory: Vec<InventorySlot>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusMessage {
    /// Replace every array slot with an empty slot.  Item and empty slots
    /// are left untouched.
    pub fn sanitize_inventory(&mut self) {
        for slot in &mut self.inventory {
            if matches!(slot, InventorySlot::Stack(_)) {
                *slot = InventorySlot::Empty;
            }
        }
    }

    /// Number of slots holding an item description.
    pub fn occupied_slots(&self) -> usize {
        self.inventory.iter().filter(|s| s.is_item()).count()
    }
}

/// Unified event wrapper for the registry event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "quayos-registry::turtles"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A turtle was seen for the first time.
    TurtleRegistered { turtle_id: String },
    /// A turtle's status record was replaced.
    TurtleStatusUpdated {
        turtle_id: String,
        online: bool,
        occupied_slots: usize,
    },
    /// A turtle deregistered.
    TurtleRemoved { turtle_id: String },
}

impl EventPayload {
    /// Identifier of the turtle the event concerns.
    pub fn turtle_id(&self) -> &str {
        match self {
            EventPayload::TurtleRegistered { turtle_id }
            | EventPayload::TurtleStatusUpdated { turtle_id, .. }
            | EventPayload::TurtleRemoved { turtle_id } => turtle_id,
        }
    }
}

/// Error type shared by the transport, registry and ingestion layers.
#[derive(Error, Debug)]
pub enum QuayError {
    #[error("Malformed topic: {0}")]
    MalformedTopic(String),

    #[error("Invalid status payload: {0}")]
    InvalidPayload(String),

    #[error("Registry failure for turtle {turtle_id}: {details}")]
    Registry { turtle_id: String, details: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Event bus error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl QuayError {
    /// Short stable label for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            QuayError::MalformedTopic(_) => "malformed_topic",
            QuayError::InvalidPayload(_) => "invalid_payload",
            QuayError::Registry { .. } => "registry",
            QuayError::Transport(_) => "transport",
            QuayError::Channel(_) => "channel",
            QuayError::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for QuayError {
    fn from(e: serde_json::Error) -> Self {
        QuayError::InvalidPayload(e.to_string())
    }
}
