//! Locate a LOOP packet inside the byte cache.
//!
//! Pure scan, never mutates or drains the buffer. The result is an explicit
//! found/not-found value so that a marker at offset 0 is a normal hit.

/// ASCII `LOO`, the first three bytes of every LOOP packet.
pub const LOOP_MARKER: &[u8; 3] = b"LOO";
/// Buffers shorter than this cannot hold a packet.
pub const MIN_BUFFER_LEN: usize = 40;
/// Bytes required from the marker to the end of the buffer.
pub const MIN_TAIL_LEN: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketLocation {
    Found { offset: usize },
    TooShort { len: usize },
    NoMarker,
    InsufficientTail { offset: usize, remaining: usize },
}

impl PacketLocation {
    pub fn found(&self) -> bool {
        matches!(self, PacketLocation::Found { .. })
    }

    pub fn offset(&self) -> Option<usize> {
        match *self {
            PacketLocation::Found { offset } => Some(offset),
            _ => None,
        }
    }
}

/// Find the lowest offset of [`LOOP_MARKER`] with enough bytes after it.
pub fn locate(buffer: &[u8]) -> PacketLocation {
    let len = buffer.len();
    if len < MIN_BUFFER_LEN {
        return PacketLocation::TooShort { len };
    }
    // Offsets 0..len-3, exclusive, as the console tooling always scanned.
    let offset = match buffer[..len - 1]
        .windows(LOOP_MARKER.len())
        .position(|w| w == LOOP_MARKER)
    {
        Some(offset) => offset,
        None => return PacketLocation::NoMarker,
    };
    let remaining = len - offset;
    if remaining < MIN_TAIL_LEN {
        return PacketLocation::InsufficientTail { offset, remaining };
    }
    PacketLocation::Found { offset }
}
