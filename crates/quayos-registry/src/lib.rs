//! `quayos-registry` – device registry for remote turtles.
//!
//! # Modules
//!
//! - [`registry`] – [`DeviceRegistry`] / [`DeviceHandle`] traits and the
//!   in-memory [`TurtleRegistry`].
//! - [`turtle`] – [`Turtle`], the per-device record.

pub mod registry;
pub mod turtle;

pub use registry::{DeviceHandle, DeviceRegistry, TurtleRegistry};
pub use turtle::Turtle;
