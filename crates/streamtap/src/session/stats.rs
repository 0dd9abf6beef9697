//! Session delivery counters
//!
//! Atomic counters bumped on the decoder thread's delivery path and read
//! from anywhere as a plain snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for one session (cumulative across decode sessions)
#[derive(Debug, Default)]
pub struct SessionStats {
    buffers_delivered: AtomicU64,
    frames_delivered: AtomicU64,
    metadata_updates: AtomicU64,
    decode_errors: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub buffers_delivered: u64,
    pub frames_delivered: u64,
    pub metadata_updates: u64,
    pub decode_errors: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// One buffer of `frames` frames was handed to the tap
    pub fn record_buffer(&self, frames: usize) {
        self.buffers_delivered.fetch_add(1, Ordering::Relaxed);
        self.frames_delivered
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    /// One metadata map was forwarded
    pub fn record_metadata(&self) {
        self.metadata_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// One decode error, recoverable or not
    pub fn record_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            buffers_delivered: self.buffers_delivered.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            metadata_updates: self.metadata_updates.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}
