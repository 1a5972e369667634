//! Owns the serial device, its demultiplexer thread and the payload queue.
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tokio::time::timeout;

use super::classify::FrameClassifier;
use super::demux::{Demultiplexer, LogCrateSink, LogSink};
use super::framing::FrameReader;
use super::interface::{self, PortEnumerator, PortOpener, SerialLink, SystemPortOpener, SystemPorts};
use super::{Result, SerialError};
use crate::config::TransportConfig;

const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of a `Transport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Starting,
    Running,
    /// The reader hit a transport error and exited; holds the error text.
    Failed(String),
}

struct LinkState {
    port_name: Option<String>,
    writer: Option<Box<dyn Write + Send>>,
    reader_thread: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

pub struct Transport {
    config: TransportConfig,
    enumerator: Arc<dyn PortEnumerator>,
    opener: Arc<dyn PortOpener>,
    sink: Arc<dyn LogSink>,
    link: Mutex<LinkState>,
    payload_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    state_tx: Arc<watch::Sender<TransportState>>,
    request_lock: Mutex<()>,
}

impl Transport {
    /// Transport over real serial ports.
    pub fn new(config: TransportConfig) -> Self {
        let opener = SystemPortOpener {
            baud_rate: config.baud_rate,
            read_timeout: config.read_timeout(),
        };
        Self::with_io(config, Arc::new(SystemPorts), Arc::new(opener))
    }

    /// Transport over the given port source and opener; tests pass the mock ones.
    pub fn with_io(
        config: TransportConfig,
        enumerator: Arc<dyn PortEnumerator>,
        opener: Arc<dyn PortOpener>,
    ) -> Self {
        let (state_tx, _) = watch::channel(TransportState::Stopped);
        Self {
            config,
            enumerator,
            opener,
            sink: Arc::new(LogCrateSink),
            link: Mutex::new(LinkState {
                port_name: None,
                writer: None,
                reader_thread: None,
                shutdown: Arc::new(AtomicBool::new(false)),
            }),
            payload_rx: Mutex::new(None),
            state_tx: Arc::new(state_tx),
            request_lock: Mutex::new(()),
        }
    }

    /// Replace the destination for device log text.
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransportState {
        self.state_tx.borrow().clone()
    }

    /// Watch lifecycle changes, e.g. to notice the reader failing.
    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.state_tx.subscribe()
    }

    /// Port the transport is attached to while running.
    pub async fn port_name(&self) -> Option<String> {
        self.link.lock().await.port_name.clone()
    }

    /// Open the device and start demultiplexing. No-op while running.
    pub async fn start(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        match self.state() {
            TransportState::Running => return Ok(()),
            TransportState::Failed(reason) => {
                log::info!("Restarting transport after failure: {}", reason);
                self.teardown(&mut link).await;
            }
            _ => {}
        }

        self.state_tx.send_replace(TransportState::Starting);
        match self.open_link(&mut link).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.teardown(&mut link).await;
                self.state_tx.send_replace(TransportState::Stopped);
                Err(e)
            }
        }
    }

    async fn open_link(&self, link: &mut LinkState) -> Result<()> {
        self.config
            .validate()
            .map_err(|e| SerialError::ConnectionFailed(e.to_string()))?;

        let port_name = match &self.config.port {
            Some(port) => port.clone(),
            None => {
                interface::find_device(self.enumerator.as_ref(), self.config.vid, self.config.pid)?.port_name
            }
        };
        let SerialLink { reader, writer } = self.opener.open(&port_name)?;

        let (payload_tx, payload_rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let demux = Demultiplexer {
            frames: FrameReader::new(reader, self.config.frame_delimiter.as_bytes())
                .with_max_frame_len(self.config.max_frame_len),
            classifier: FrameClassifier::new(self.config.classifier),
            sink: Arc::clone(&self.sink),
            payload_tx,
            shutdown: Arc::clone(&shutdown),
            state_tx: Arc::clone(&self.state_tx),
        };

        *self.payload_rx.lock().await = Some(payload_rx);
        link.port_name = Some(port_name.clone());
        link.writer = Some(writer);
        link.shutdown = shutdown;

        // Running must be published before the reader can report a failure.
        self.state_tx.send_replace(TransportState::Running);
        let handle = thread::Builder::new()
            .name("serial-demux".to_string())
            .spawn(move || demux.run())?;
        link.reader_thread = Some(handle);

        log::info!("Transport running on {}", port_name);
        Ok(())
    }

    /// Close the device and wait briefly for the reader to exit. No-op while stopped.
    pub async fn stop(&self) {
        let mut link = self.link.lock().await;
        if self.state() == TransportState::Stopped {
            return;
        }
        let port_name = link.port_name.clone();
        // Flag first so the reader treats the closing handle as shutdown, not failure.
        link.shutdown.store(true, Ordering::Release);
        self.state_tx.send_replace(TransportState::Stopped);
        self.teardown(&mut link).await;
        if let Some(port_name) = port_name {
            log::info!("Disconnected from {}", port_name);
        }
    }

    async fn teardown(&self, link: &mut LinkState) {
        link.shutdown.store(true, Ordering::Release);
        link.writer = None;
        link.port_name = None;

        if let Some(handle) = link.reader_thread.take() {
            let join = tokio::task::spawn_blocking(move || handle.join());
            match timeout(STOP_JOIN_TIMEOUT, join).await {
                Ok(Ok(Ok(()))) => {}
                Ok(_) => log::warn!("Serial reader thread panicked"),
                Err(_) => log::warn!("Serial reader did not exit within {:?}", STOP_JOIN_TIMEOUT),
            }
        }

        // A receiver still parked on the queue will see it close and report on its own.
        if let Ok(mut rx) = self.payload_rx.try_lock() {
            *rx = None;
        }
    }

    /// Write one request, appending the request terminator. Does not wait for a reply.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let mut link = self.link.lock().await;
        if let TransportState::Failed(_) = self.state() {
            return Err(SerialError::Disconnected);
        }
        let writer = link.writer.as_mut().ok_or(SerialError::NotRunning)?;

        let terminator = self.config.request_terminator.as_bytes();
        let mut frame = Vec::with_capacity(data.len() + terminator.len());
        frame.extend_from_slice(data);
        frame.extend_from_slice(terminator);

        log::debug!("Tx: {}", hex::encode(&frame));
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    /// Wait for the next payload fragment, in arrival order.
    ///
    /// Never times out by itself; fails once the reader has exited and the
    /// queue is drained.
    pub async fn receive(&self) -> Result<Vec<u8>> {
        if self.state() == TransportState::Stopped {
            return Err(SerialError::NotRunning);
        }
        let mut guard = self.payload_rx.lock().await;
        let rx = guard.as_mut().ok_or(SerialError::NotRunning)?;
        match rx.recv().await {
            Some(payload) => Ok(payload),
            None if self.state() == TransportState::Stopped => Err(SerialError::NotRunning),
            None => Err(SerialError::Disconnected),
        }
    }

    /// Drop payloads already queued, e.g. replies to a request that timed out.
    pub async fn discard_pending(&self) -> usize {
        let mut guard = self.payload_rx.lock().await;
        let Some(rx) = guard.as_mut() else {
            return 0;
        };
        let mut dropped = 0;
        while let Ok(payload) = rx.try_recv() {
            log::debug!("Discarding stale payload: {}", String::from_utf8_lossy(&payload));
            dropped += 1;
        }
        dropped
    }

    /// Serializes request/response round trips; the wire protocol has no correlation ids.
    pub async fn request_guard(&self) -> MutexGuard<'_, ()> {
        self.request_lock.lock().await
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.link.get_mut().shutdown.store(true, Ordering::Release);
    }
}
