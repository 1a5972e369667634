//! In-memory stand-in for the ESP32 firmware, for exercising the transport without hardware.
//!
//! Reads block with the configured timeout just like a real port, so the
//! transport's liveness ticks behave the same.
use std::io::{self, ErrorKind, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::interface::{PortEnumerator, PortOpener, SerialLink};
use super::{Result, SerialDeviceInfo, SerialError};

pub const MOCK_PORT: &str = "mock://esp32";

/// Device side of an in-memory link.
pub struct MockDevice {
    to_host: Mutex<Option<Sender<Vec<u8>>>>,
    from_host: Mutex<Receiver<Vec<u8>>>,
}

/// Host side; hands out the link once.
pub struct MockOpener {
    link: Mutex<Option<SerialLink>>,
}

impl MockDevice {
    /// Create a connected device/opener pair.
    pub fn pair(read_timeout: Duration) -> (Arc<MockDevice>, MockOpener) {
        let (to_host, host_rx) = mpsc::channel();
        let (host_tx, from_host) = mpsc::channel();
        let device = Arc::new(MockDevice {
            to_host: Mutex::new(Some(to_host)),
            from_host: Mutex::new(from_host),
        });
        let link = SerialLink {
            reader: Box::new(MockReader { rx: host_rx, read_timeout, pending: Vec::new() }),
            writer: Box::new(MockWriter { tx: host_tx }),
        };
        (device, MockOpener { link: Mutex::new(Some(link)) })
    }

    /// Push raw bytes to the host exactly as one read chunk.
    pub fn inject(&self, bytes: &[u8]) {
        // An empty chunk would read as end-of-stream.
        if bytes.is_empty() {
            return;
        }
        if let Some(tx) = self.to_host.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            let _ = tx.send(bytes.to_vec());
        }
    }

    /// Push a line terminated the way the firmware terminates it.
    pub fn inject_line(&self, line: &str) {
        self.inject(format!("{}\r\n", line).as_bytes());
    }

    /// Next chunk the host wrote, if any arrives within `timeout`.
    pub fn recv_written(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.from_host
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recv_timeout(timeout)
            .ok()
    }

    /// Simulate unplugging: the host's next read fails.
    pub fn disconnect(&self) {
        self.to_host.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Answer every host write with the lines `respond` returns, on a background thread.
    ///
    /// The thread ends when the host side of the link is dropped.
    pub fn spawn_responder<F>(self: &Arc<Self>, mut respond: F) -> thread::JoinHandle<()>
    where
        F: FnMut(&[u8]) -> Vec<String> + Send + 'static,
    {
        let device = Arc::clone(self);
        thread::spawn(move || loop {
            let written = {
                let rx = device.from_host.lock().unwrap_or_else(|e| e.into_inner());
                match rx.recv_timeout(Duration::from_millis(50)) {
                    Ok(bytes) => bytes,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            };
            for line in respond(&written) {
                device.inject_line(&line);
            }
        })
    }
}

impl PortOpener for MockOpener {
    fn open(&self, port_name: &str) -> Result<SerialLink> {
        self.link
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| SerialError::ConnectionFailed(format!("{}: mock link already opened", port_name)))
    }
}

/// Enumerator returning a fixed device list.
#[derive(Debug, Clone, Default)]
pub struct MockPorts(pub Vec<SerialDeviceInfo>);

impl MockPorts {
    pub fn single(vid: u16, pid: u16) -> Self {
        Self(vec![SerialDeviceInfo {
            port_name: MOCK_PORT.to_string(),
            vid,
            pid,
            serial_number: None,
            manufacturer: Some("Espressif".to_string()),
            product: Some("USB JTAG/serial debug unit".to_string()),
        }])
    }
}

impl PortEnumerator for MockPorts {
    fn available_devices(&self) -> Result<Vec<SerialDeviceInfo>> {
        Ok(self.0.clone())
    }
}

struct MockReader {
    rx: Receiver<Vec<u8>>,
    read_timeout: Duration,
    pending: Vec<u8>,
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(self.read_timeout) {
                Ok(bytes) => self.pending = bytes,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(ErrorKind::TimedOut, "Operation timed out"))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(ErrorKind::BrokenPipe, "device unplugged"))
                }
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

struct MockWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(ErrorKind::BrokenPipe, "device gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
