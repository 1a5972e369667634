//! Host-side link to the Robo 24 ESP32 distance sensor.
//!
//! The firmware prints diagnostics and JSON replies on the same USB-serial line.
//! [`serial::Transport`] splits that stream apart on a background thread and
//! queues the JSON fragments; [`client::Client`] and [`client::FloodClient`]
//! turn them into [`serial::Measurement`]s.
pub mod client;
pub mod config;
pub mod serial;

pub use client::{Client, ClientError, FloodClient, Sample};
pub use config::{ClientConfig, LinkConfig, TransportConfig};
pub use serial::{Measurement, SerialError, Transport, TransportState};
