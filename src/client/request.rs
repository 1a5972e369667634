use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};

use super::{ClientError, Result};
use crate::config::ClientConfig;
use crate::serial::protocol::{parse_measurement, Measurement, MeasurementRequest};
use crate::serial::Transport;

/// A measurement as kept in a client's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub measurement: Measurement,
    pub received_at: DateTime<Utc>,
}

/// Issues one measurement request at a time and waits for its reply.
pub struct Client {
    transport: Arc<Transport>,
    response_timeout: Duration,
    history: Mutex<Vec<Sample>>,
}

impl Client {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self::with_config(transport, &ClientConfig::default())
    }

    pub fn with_config(transport: Arc<Transport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            response_timeout: config.response_timeout(),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Request a single measurement.
    pub async fn request_measurement(&self) -> Result<Measurement> {
        let _guard = self.transport.request_guard().await;
        self.round_trip().await
    }

    /// One request/reply exchange. Caller holds the transport's request guard.
    ///
    /// The response timeout covers the whole exchange, including waiting for
    /// another consumer to release the payload queue.
    pub(crate) async fn round_trip(&self) -> Result<Measurement> {
        let deadline = Instant::now() + self.response_timeout;

        let stale = self.bounded(deadline, self.transport.discard_pending()).await?;
        if stale > 0 {
            log::debug!("Dropped {} stale payloads before request", stale);
        }

        let request = MeasurementRequest::default().encode()?;
        self.bounded(deadline, self.transport.send(&request)).await??;
        let measurement = self.await_measurement(deadline).await?;

        self.history.lock().await.push(Sample { measurement, received_at: Utc::now() });
        Ok(measurement)
    }

    /// Pull payloads until one parses or the deadline passes. Garbage does not
    /// extend the deadline.
    async fn await_measurement(&self, deadline: Instant) -> Result<Measurement> {
        loop {
            let payload = self.bounded(deadline, self.transport.receive()).await??;
            match parse_measurement(&payload) {
                Ok(measurement) => return Ok(measurement),
                Err(e) => log::warn!("Invalid JSON received: {}", e),
            }
        }
    }

    async fn bounded<T>(&self, deadline: Instant, fut: impl Future<Output = T>) -> Result<T> {
        timeout_at(deadline, fut)
            .await
            .map_err(|_| ClientError::ResponseTimeout(self.response_timeout))
    }

    /// All measurements received so far, oldest first.
    pub async fn history(&self) -> Vec<Sample> {
        self.history.lock().await.clone()
    }

    /// Measurements whose device timestamp lies within `window` of the newest one.
    ///
    /// Samples without a device timestamp only appear when no sample has one.
    pub async fn recent(&self, window: Duration) -> Vec<Sample> {
        let history = self.history.lock().await;
        let Some(newest) = history.iter().filter_map(|s| s.measurement.timestamp_ms).max() else {
            return history.clone();
        };
        let cutoff = newest.saturating_sub(window.as_millis() as u64);
        history
            .iter()
            .filter(|s| s.measurement.timestamp_ms.is_some_and(|ts| ts >= cutoff))
            .cloned()
            .collect()
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }
}
