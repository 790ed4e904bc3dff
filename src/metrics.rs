//! Process-wide pipeline counters.
//! Logged at shutdown and printed by the `probe` command.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_DECODED: AtomicU64 = AtomicU64::new(0);
static CHUNKS_DISCARDED: AtomicU64 = AtomicU64::new(0);
static STABLE_READINGS: AtomicU64 = AtomicU64::new(0);
static FAULTS: AtomicU64 = AtomicU64::new(0);
static TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static TRIGGERS_SERVED: AtomicU64 = AtomicU64::new(0);
static TRIGGERS_REJECTED: AtomicU64 = AtomicU64::new(0);
static SUBSCRIBERS_DROPPED: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_decoded() {
    FRAMES_DECODED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_chunks_discarded() {
    CHUNKS_DISCARDED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_stable_readings() {
    STABLE_READINGS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_faults() {
    FAULTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_timeouts() {
    TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_triggers_served() {
    TRIGGERS_SERVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_triggers_rejected() {
    TRIGGERS_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_subscribers_dropped() {
    SUBSCRIBERS_DROPPED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Snapshot {
    pub frames_decoded: u64,
    /// Chunks read while no acquisition was pending.
    pub chunks_discarded: u64,
    pub stable_readings: u64,
    pub faults: u64,
    pub timeouts: u64,
    pub triggers_served: u64,
    pub triggers_rejected: u64,
    pub subscribers_dropped: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        frames_decoded: FRAMES_DECODED.load(Ordering::Relaxed),
        chunks_discarded: CHUNKS_DISCARDED.load(Ordering::Relaxed),
        stable_readings: STABLE_READINGS.load(Ordering::Relaxed),
        faults: FAULTS.load(Ordering::Relaxed),
        timeouts: TIMEOUTS.load(Ordering::Relaxed),
        triggers_served: TRIGGERS_SERVED.load(Ordering::Relaxed),
        triggers_rejected: TRIGGERS_REJECTED.load(Ordering::Relaxed),
        subscribers_dropped: SUBSCRIBERS_DROPPED.load(Ordering::Relaxed),
    }
}
