pub mod flood;
pub mod request;

pub use flood::{average_batch, FloodClient};
pub use request::{Client, Sample};

use std::time::Duration;

use crate::serial::SerialError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error("Failed to receive valid measurement within {0:?}")]
    ResponseTimeout(Duration),

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Flood batch size must be at least 1")]
    EmptyBatch,
}

pub type Result<T> = std::result::Result<T, ClientError>;
