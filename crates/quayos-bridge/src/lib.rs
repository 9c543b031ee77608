//! `quayos-bridge` – forwards turtle status reports from the broker into the
//! device registry.
//!
//! # Modules
//!
//! - [`ingest`] – [`StatusIngestionHandler`], the per-message logic.
//! - [`bridge`] – [`Bridge`], connection lifecycle (`run` / `stop`).

pub mod bridge;
pub mod ingest;

pub use bridge::Bridge;
pub use ingest::{StatusIngestionHandler, decode_payload};
