//! `quayos-bridge` – forwards turtle status from MQTT into the registry.
//!
//! The binary:
//!
//! 1. Initialises structured logging (and OTLP export when configured).
//! 2. Loads `~/.quayos/config.toml`, writing the defaults on first run, and
//!    applies `QUAYOS_*` overrides.
//! 3. Connects to the broker, subscribes to `<base>/+/status` and feeds every
//!    message into the turtle registry until the connection drops.
//! 4. Intercepts **Ctrl-C** to disconnect cleanly.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;

use quayos_bridge::Bridge;
use quayos_middleware::{EventBus, MqttTransport, Topic, TopicReceiver};
use quayos_registry::TurtleRegistry;
use quayos_types::EventPayload;
use tokio::sync::Notify;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let _guard = telemetry::init_tracing("quayos-bridge");

    let cfg = match config::load().and_then(|cfg| cfg.validate().map(|()| cfg)) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(
                path = %config::config_path().display(),
                error = %e,
                "invalid configuration"
            );
            return ExitCode::FAILURE;
        }
    };
    info!(config = ?cfg, "configuration loaded");

    let layout = match cfg.topic_layout() {
        Ok(layout) => layout,
        Err(e) => {
            error!(error = %e, "invalid base topic");
            return ExitCode::FAILURE;
        }
    };
    let transport = match MqttTransport::new(cfg.mqtt_settings()) {
        Ok(transport) => transport,
        Err(e) => {
            error!(error = %e, "invalid broker settings");
            return ExitCode::FAILURE;
        }
    };

    let bus = EventBus::new(cfg.event_bus_capacity);
    let registry = Arc::new(TurtleRegistry::new(bus.clone()));
    tokio::spawn(log_lifecycle(bus.subscribe_to(Topic::Lifecycle)));

    let bridge = Arc::new(Bridge::new(Arc::new(transport), registry.clone(), layout));

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || shutdown_signal.notify_one()) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let mut runner = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.run().await })
    };

    let finished_early = tokio::select! {
        res = &mut runner => Some(res),
        _ = shutdown.notified() => None,
    };
    let outcome = match finished_early {
        Some(res) => res,
        None => {
            info!("Ctrl-C received, disconnecting");
            if let Err(e) = bridge.stop().await {
                warn!(error = %e, "disconnect failed");
            }
            runner.await
        }
    };

    let turtles = registry.len().await;
    match outcome {
        Ok(Ok(())) => {
            info!(turtles, "bridge stopped");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!(error = %e, kind = e.kind(), "bridge failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "bridge task aborted");
            ExitCode::FAILURE
        }
    }
}

/// Log turtles joining and leaving until the bus closes.
async fn log_lifecycle(mut events: TopicReceiver) {
    loop {
        match events.recv().await {
            Ok(event) => match event.payload {
                EventPayload::TurtleRegistered { turtle_id } => {
                    info!(turtle_id = %turtle_id, "turtle joined");
                }
                EventPayload::TurtleRemoved { turtle_id } => {
                    info!(turtle_id = %turtle_id, "turtle left");
                }
                EventPayload::TurtleStatusUpdated { .. } => {}
            },
            Err(RecvError::Lagged(n)) => {
                warn!(lagged_by = n, "lifecycle log lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
