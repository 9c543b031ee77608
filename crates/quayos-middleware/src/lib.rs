//! `quayos-middleware` – message plumbing for the turtle bridge.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`adapter`] – the [`StatusTransport`] / [`MessageHandler`] seam.
//! - [`mqtt_adapter`] – rumqttc-backed broker transport.
//! - [`loopback_adapter`] – broker-less in-process transport.
//! - [`topic`] – status topic layout and MQTT filter matching.

pub mod adapter;
pub mod bus;
pub mod loopback_adapter;
pub mod mqtt_adapter;
pub mod topic;

pub use adapter::{InboundMessage, LinkState, MessageHandler, StatusTransport};
pub use bus::{EventBus, Topic, TopicReceiver, TurtleSubscriber};
pub use loopback_adapter::LoopbackTransport;
pub use mqtt_adapter::{MqttSettings, MqttTransport};
pub use topic::TopicLayout;
