pub mod classify;
pub mod demux;
pub mod framing;
pub mod interface;
pub mod mock;
pub mod protocol;
pub mod transport;

pub use classify::{Classified, ClassifierPolicy, FrameClassifier};
pub use demux::{LogCrateSink, LogSink};
pub use framing::{Frame, FrameReader};
pub use interface::{PortEnumerator, PortOpener, SerialLink, SystemPortOpener, SystemPorts};
pub use protocol::{Measurement, MeasurementRequest};
pub use transport::{Transport, TransportState};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("No device found matching {vid:04x}:{pid:04x}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport is not running")]
    NotRunning,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    Serialport(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
