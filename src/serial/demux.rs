//! Background loop splitting the device stream into log text and payloads.
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::classify::FrameClassifier;
use super::framing::FrameReader;
use super::transport::TransportState;

/// Receives free-form text the firmware printed.
pub trait LogSink: Send + Sync {
    fn device_text(&self, text: &str);
}

/// Forwards device text to the `log` facade under the `device` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateSink;

impl LogSink for LogCrateSink {
    fn device_text(&self, text: &str) {
        log::info!(target: "device", "{}", text);
    }
}

pub(crate) struct Demultiplexer<R> {
    pub frames: FrameReader<R>,
    pub classifier: FrameClassifier,
    pub sink: Arc<dyn LogSink>,
    pub payload_tx: mpsc::UnboundedSender<Vec<u8>>,
    pub shutdown: Arc<AtomicBool>,
    pub state_tx: Arc<watch::Sender<TransportState>>,
}

impl<R: Read> Demultiplexer<R> {
    pub fn run(mut self) {
        log::debug!("Serial demultiplexer started");
        let mut frames_read = 0u64;
        let mut payloads = 0u64;

        while !self.shutdown.load(Ordering::Acquire) {
            match self.frames.read_frame() {
                Ok(Some(frame)) => {
                    frames_read += 1;
                    if self.dispatch(frame.as_bytes()) {
                        payloads += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    log::error!("Serial error occurred: {}", e);
                    // A concurrent stop wins over the failure report.
                    self.state_tx.send_if_modified(|state| {
                        if *state == TransportState::Running {
                            *state = TransportState::Failed(e.to_string());
                            true
                        } else {
                            false
                        }
                    });
                    break;
                }
            }
        }

        log::debug!(
            "Serial demultiplexer exiting after {} frames ({} payloads)",
            frames_read,
            payloads
        );
    }

    /// Route one frame; returns whether a payload was queued.
    pub fn dispatch(&self, frame: &[u8]) -> bool {
        let classified = self.classifier.classify(frame);
        if let Some(text) = classified.log {
            self.sink.device_text(&text);
        }
        match classified.payload {
            // Only fails once the transport dropped the receiving end.
            Some(payload) => self.payload_tx.send(payload).is_ok(),
            None => false,
        }
    }
}
