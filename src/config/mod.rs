use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serial::framing::DEFAULT_MAX_FRAME_LEN;
use crate::serial::interface::{BAUD_RATE, ESP32_PID, ESP32_VID, READ_TIMEOUT};
use crate::serial::ClassifierPolicy;

// Firmware terminates output lines with CRLF but only needs CR on input.
pub const FRAME_DELIMITER: &str = "\r\n";
pub const REQUEST_TERMINATOR: &str = "\r";
pub const RESPONSE_TIMEOUT_MS: u64 = 1000;
pub const FLOOD_BATCH_SIZE: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level settings, loadable from a JSON file. Missing keys take defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub transport: TransportConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Explicit port; when unset the device is discovered by `vid`/`pid`.
    pub port: Option<String>,
    pub vid: u16,
    pub pid: u16,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub frame_delimiter: String,
    pub request_terminator: String,
    pub classifier: ClassifierPolicy,
    pub max_frame_len: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: None,
            vid: ESP32_VID,
            pid: ESP32_PID,
            baud_rate: BAUD_RATE,
            read_timeout_ms: READ_TIMEOUT.as_millis() as u64,
            frame_delimiter: FRAME_DELIMITER.to_string(),
            request_terminator: REQUEST_TERMINATOR.to_string(),
            classifier: ClassifierPolicy::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl TransportConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_delimiter.is_empty() {
            return Err(ConfigError::Invalid("frame_delimiter must not be empty".to_string()));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("read_timeout_ms must be positive".to_string()));
        }
        if self.max_frame_len == 0 {
            return Err(ConfigError::Invalid("max_frame_len must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub response_timeout_ms: u64,
    pub flood_batch_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: RESPONSE_TIMEOUT_MS,
            flood_batch_size: FLOOD_BATCH_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl LinkConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport.validate()?;
        if self.client.flood_batch_size == 0 {
            return Err(ConfigError::Invalid("flood_batch_size must be positive".to_string()));
        }
        Ok(())
    }
}
