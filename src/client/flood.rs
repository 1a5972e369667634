//! Flood mode: many back-to-back requests reduced to one reading.
//!
//! This deliberately ignores the sensor's minimum measurement cycle; it exists
//! to show what happens to the averaged distance when the device is polled
//! faster than the HC-SR04 can settle.
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

use super::request::Client;
use super::{ClientError, Result};
use crate::config::ClientConfig;
use crate::serial::protocol::Measurement;
use crate::serial::Transport;

pub struct FloodClient {
    client: Client,
    batch_size: usize,
    last_rate_hz: StdMutex<Option<f64>>,
}

impl FloodClient {
    pub fn new(transport: Arc<Transport>) -> Result<Self> {
        Self::with_config(transport, &ClientConfig::default())
    }

    pub fn with_config(transport: Arc<Transport>, config: &ClientConfig) -> Result<Self> {
        if config.flood_batch_size == 0 {
            return Err(ClientError::EmptyBatch);
        }
        Ok(Self {
            client: Client::with_config(transport, config),
            batch_size: config.flood_batch_size,
            last_rate_hz: StdMutex::new(None),
        })
    }

    /// The single-request client the batch is built on; its history holds every reply.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Number of requests averaged into one measurement.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Request rate observed during the most recent completed batch.
    pub fn last_rate_hz(&self) -> Option<f64> {
        *self.last_rate_hz.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Request `batch_size` measurements in a tight loop (or paced at `rate_hz`)
    /// and average them.
    pub async fn request_measurement(&self, rate_hz: Option<f64>) -> Result<Measurement> {
        let _guard = self.client.transport().request_guard().await;

        let period = rate_hz.filter(|hz| hz.is_finite() && *hz > 0.0).and_then(|hz| {
            let period = Duration::try_from_secs_f64(1.0 / hz).ok();
            if period.is_none() {
                log::warn!("Rate {} Hz is too low to pace, flooding unpaced", hz);
            }
            period
        });

        let mut measurements = Vec::with_capacity(self.batch_size);
        let start = Instant::now();
        for i in 0..self.batch_size {
            measurements.push(self.client.round_trip().await?);
            if let Some(slot) = period.and_then(|p| slot_time(start, p, i)) {
                // Already past the slot: sleep_until returns immediately.
                sleep_until(slot).await;
            }
        }
        let elapsed = start.elapsed();

        let rate = self.batch_size as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        log::info!("Received {} measurements at {:.2} Hz", self.batch_size, rate);
        *self.last_rate_hz.lock().unwrap_or_else(|e| e.into_inner()) = Some(rate);

        average_batch(&measurements).ok_or(ClientError::EmptyBatch)
    }
}

/// When request `index` of a paced batch may complete, if representable.
fn slot_time(start: Instant, period: Duration, index: usize) -> Option<Instant> {
    let slots = u32::try_from(index).ok()?.checked_add(1)?;
    start.checked_add(period.checked_mul(slots)?)
}

/// Floor-average the distances and keep the first reply's timestamp.
pub fn average_batch(measurements: &[Measurement]) -> Option<Measurement> {
    let first = measurements.first()?;
    let total: u64 = measurements.iter().map(|m| u64::from(m.distance_mm)).sum();
    let average = total / measurements.len() as u64;
    Some(Measurement {
        // The mean of u32 values always fits in u32.
        distance_mm: average as u32,
        timestamp_ms: first.timestamp_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(distance_mm: u32, timestamp_ms: u64) -> Measurement {
        Measurement { distance_mm, timestamp_ms: Some(timestamp_ms) }
    }

    #[test]
    fn test_average_floors_and_keeps_first_timestamp() {
        let batch = [m(10, 100), m(11, 200), m(12, 300), m(13, 400)];
        assert_eq!(average_batch(&batch), Some(m(11, 100)));
    }

    #[test]
    fn test_average_of_large_values_does_not_overflow() {
        let batch = [m(u32::MAX, 1), m(u32::MAX, 2), m(u32::MAX - 1, 3)];
        assert_eq!(average_batch(&batch).unwrap().distance_mm, u32::MAX - 1);
    }

    #[test]
    fn test_slot_time_overflow_is_none() {
        let start = Instant::now();
        assert_eq!(slot_time(start, Duration::from_millis(20), 2), Some(start + Duration::from_millis(60)));
        assert_eq!(slot_time(start, Duration::MAX, 1), None);
    }

    #[test]
    fn test_average_of_empty_batch() {
        assert_eq!(average_batch(&[]), None);
    }
}
