//! Time-boxed accumulation of serial chunks.
//!
//! The console delivers a LOOP packet across several newline-delimited frames,
//! so bytes are concatenated here until the locator finds a complete record.
//! A partial packet left over from an earlier query must never be glued to a
//! fresh one: if nothing has arrived for longer than the staleness window the
//! buffer restarts from the new bytes.
use bytes::BytesMut;
use log::warn;
use std::time::{Duration, Instant};

use crate::logutil::hex_snippet;
use crate::metrics;

/// Default staleness window for buffered partial packets.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(65);

#[derive(Debug)]
pub struct ByteCache {
    buf: BytesMut,
    last_updated: Option<Instant>,
    stale_after: Duration,
}

impl ByteCache {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            last_updated: None,
            stale_after,
        }
    }

    /// Append a chunk received at `now`. Returns true when stale contents were
    /// discarded before the append.
    pub fn append(&mut self, bytes: &[u8], now: Instant) -> bool {
        let stale = self.is_stale(now);
        if stale {
            warn!(
                "Resetting stale serial cache ({} bytes buffered: {})",
                self.buf.len(),
                hex_snippet(&self.buf, 16)
            );
            metrics::inc_cache_stale_resets();
            self.buf.clear();
        }
        self.buf.extend_from_slice(bytes);
        self.last_updated = Some(now);
        stale
    }

    /// True when the buffered bytes are older than the staleness window at `now`.
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.last_updated {
            Some(updated) => now.saturating_duration_since(updated) > self.stale_after,
            None => false,
        }
    }

    /// Drop everything after a packet has been consumed.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.last_updated = None;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn last_updated(&self) -> Option<Instant> {
        self.last_updated
    }
}

impl Default for ByteCache {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER)
    }
}
