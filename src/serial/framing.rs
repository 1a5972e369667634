//! Delimiter-based framing of the raw serial byte stream.
//!
//! The device writes `\r\n` after every line, but USB-CDC delivers those lines in
//! arbitrary chunks. `FrameReader` keeps the unterminated tail between reads and
//! only hands out complete frames. The delimiter is stripped from every frame.
use std::io::{ErrorKind, Read};

use super::{Result, SerialError};

pub const DEFAULT_DELIMITER: &[u8] = b"\r\n";
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;
const READ_CHUNK: usize = 255;

/// One delimiter-terminated unit of the stream, delimiter removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    /// Frame contents without the delimiter.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the frame contents.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

pub struct FrameReader<R> {
    source: R,
    delimiter: Vec<u8>,
    max_frame_len: usize,
    partial: Vec<u8>,
    finished: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(source: R, delimiter: &[u8]) -> Self {
        assert!(!delimiter.is_empty(), "frame delimiter must not be empty");
        Self {
            source,
            delimiter: delimiter.to_vec(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            partial: Vec::new(),
            finished: false,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len.max(1);
        self
    }

    /// Bytes received but not yet part of a completed frame.
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }

    /// Read until one complete frame is buffered.
    ///
    /// Returns `Ok(None)` when the source timed out without completing a frame,
    /// which gives the caller a chance to check for shutdown.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.take_buffered() {
                return Ok(Some(frame));
            }

            match self.source.read(&mut buf) {
                Ok(0) => {
                    if !self.partial.is_empty() {
                        log::debug!(
                            "Discarding {} unterminated bytes at end of stream",
                            self.partial.len()
                        );
                        self.partial.clear();
                    }
                    return Err(SerialError::Disconnected);
                }
                Ok(n) => self.partial.extend_from_slice(&buf[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(None);
                }
                Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::InvalidData) => {
                    log::debug!("Retrying serial read after recoverable error: {}", e);
                }
                Err(e) => return Err(SerialError::Io(e)),
            }
        }
    }

    fn take_buffered(&mut self) -> Option<Frame> {
        if let Some(pos) = find_subsequence(&self.partial, &self.delimiter) {
            let mut frame: Vec<u8> = self.partial.drain(..pos + self.delimiter.len()).collect();
            frame.truncate(pos);
            log::debug!("Rx: {}", hex::encode(&frame));
            return Some(Frame(frame));
        }

        // Keep a possible delimiter prefix at the tail so it can complete on the next read.
        if self.partial.len() > self.max_frame_len {
            let keep = self.delimiter.len() - 1;
            let split = self.partial.len() - keep;
            let tail = self.partial.split_off(split);
            let frame = std::mem::replace(&mut self.partial, tail);
            log::warn!(
                "No delimiter within {} bytes, flushing partial frame",
                self.max_frame_len
            );
            return Some(Frame(frame));
        }
        None
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            match self.read_frame() {
                Ok(Some(frame)) => return Some(Ok(frame)),
                Ok(None) => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
