//! Newline-delimited framer for the console's serial stream.
//!
//! The console terminates text replies with LF and the binary LOOP packet
//! happens to contain LF bytes as well, so a packet arrives split over several
//! "frames". The delimiter is kept at the end of each frame so that
//! re-concatenating frames in the byte cache reproduces the exact stream.
use bytes::BytesMut;

/// Frame delimiter (bare LF).
pub const DELIMITER: u8 = b'\n';

/// Upper bound for an undelimited run before it is flushed as a frame anyway.
const MAX_FRAME_SIZE: usize = 4 * 1024;

#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame (delimiter included), if any. An oversized run with
    /// no delimiter is flushed whole so a noisy line cannot grow without bound.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if let Some(pos) = self.buf.iter().position(|&b| b == DELIMITER) {
            return Some(self.buf.split_to(pos + 1).to_vec());
        }
        if self.buf.len() >= MAX_FRAME_SIZE {
            return Some(self.buf.split().to_vec());
        }
        None
    }

    /// Bytes held back waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}
