//! Process-wide pipeline counters.
//! Cheap relaxed atomics; the server logs a [`snapshot`] periodically and the
//! smoketest prints one on exit.
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static CACHE_STALE_RESETS: AtomicU64 = AtomicU64::new(0);
static PACKETS_DECODED: AtomicU64 = AtomicU64::new(0);
static OBSERVATIONS_ACCEPTED: AtomicU64 = AtomicU64::new(0);
static OBSERVATIONS_DISREGARDED: AtomicU64 = AtomicU64::new(0);
static STRUCTURAL_REJECTS: AtomicU64 = AtomicU64::new(0);
static LINK_WRITE_ERRORS: AtomicU64 = AtomicU64::new(0);
static DELIVERY_SUCCEEDED: AtomicU64 = AtomicU64::new(0);
static DELIVERY_FAILED_NONRETRYABLE: AtomicU64 = AtomicU64::new(0);
static DELIVERY_FAILED_EXHAUSTED: AtomicU64 = AtomicU64::new(0);
static DELIVERY_RETRIES: AtomicU64 = AtomicU64::new(0);
static DELIVERY_SKIPPED: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_received() {
    FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_cache_stale_resets() {
    CACHE_STALE_RESETS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_packets_decoded() {
    PACKETS_DECODED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_observations_accepted() {
    OBSERVATIONS_ACCEPTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_observations_disregarded() {
    OBSERVATIONS_DISREGARDED.fetch_add(1, Ordering::Relaxed);
}
/// Accepted by the rules but re-routed by the dispatcher's structural gate.
/// Kept apart from `observations_disregarded` so each record is counted once.
pub fn inc_structural_rejects() {
    STRUCTURAL_REJECTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_link_write_errors() {
    LINK_WRITE_ERRORS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_delivery_succeeded() {
    DELIVERY_SUCCEEDED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_delivery_failed_nonretryable() {
    DELIVERY_FAILED_NONRETRYABLE.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_delivery_failed_exhausted() {
    DELIVERY_FAILED_EXHAUSTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_delivery_retries() {
    DELIVERY_RETRIES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_delivery_skipped() {
    DELIVERY_SKIPPED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Snapshot {
    pub frames_received: u64,
    pub cache_stale_resets: u64,
    pub packets_decoded: u64,
    pub observations_accepted: u64,
    pub observations_disregarded: u64,
    pub structural_rejects: u64,
    pub link_write_errors: u64,
    pub delivery_succeeded: u64,
    pub delivery_failed_nonretryable: u64,
    pub delivery_failed_exhausted: u64,
    pub delivery_retries: u64,
    pub delivery_skipped: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        frames_received: FRAMES_RECEIVED.load(Ordering::Relaxed),
        cache_stale_resets: CACHE_STALE_RESETS.load(Ordering::Relaxed),
        packets_decoded: PACKETS_DECODED.load(Ordering::Relaxed),
        observations_accepted: OBSERVATIONS_ACCEPTED.load(Ordering::Relaxed),
        observations_disregarded: OBSERVATIONS_DISREGARDED.load(Ordering::Relaxed),
        structural_rejects: STRUCTURAL_REJECTS.load(Ordering::Relaxed),
        link_write_errors: LINK_WRITE_ERRORS.load(Ordering::Relaxed),
        delivery_succeeded: DELIVERY_SUCCEEDED.load(Ordering::Relaxed),
        delivery_failed_nonretryable: DELIVERY_FAILED_NONRETRYABLE.load(Ordering::Relaxed),
        delivery_failed_exhausted: DELIVERY_FAILED_EXHAUSTED.load(Ordering::Relaxed),
        delivery_retries: DELIVERY_RETRIES.load(Ordering::Relaxed),
        delivery_skipped: DELIVERY_SKIPPED.load(Ordering::Relaxed),
    }
}

impl Snapshot {
    /// Compact single-line form for periodic stats logging.
    pub fn summary(&self) -> String {
        format!(
            "frames={} stale_resets={} decoded={} accepted={} disregarded={} structural_rejects={} write_errors={} delivered={} nonretryable={} exhausted={} retries={} skipped={}",
            self.frames_received,
            self.cache_stale_resets,
            self.packets_decoded,
            self.observations_accepted,
            self.observations_disregarded,
            self.structural_rejects,
            self.link_write_errors,
            self.delivery_succeeded,
            self.delivery_failed_nonretryable,
            self.delivery_failed_exhausted,
            self.delivery_retries,
            self.delivery_skipped,
        )
    }
}
