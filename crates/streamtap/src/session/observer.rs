//! Session observers
//!
//! A session notifies at most one observer, held weakly so the session never
//! keeps its consumer alive. `ChannelObserver` turns the callbacks into
//! `SessionEvent`s for consumers that prefer polling a channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::audio::types::{AudioFormat, PcmBuffer, PlaybackState};
use crate::error::TapError;
use crate::stream::metadata::MetadataMap;

/// Receiver of session notifications.
///
/// Called on whichever thread produced the event, usually the decoder's.
/// Implementations must not call session control methods from inside a
/// callback.
pub trait SessionObserver: Send + Sync {
    fn playback_state_changed(&self, _state: PlaybackState) {}

    fn decode_error(&self, _error: &TapError) {}

    /// Raw decoded audio, only while the tap option is on and the session plays
    fn decoded_audio(&self, _buffer: &PcmBuffer<'_>, _frame_count: usize, _format: &AudioFormat) {}

    /// Full replacement of the current metadata
    fn metadata_updated(&self, _metadata: &MetadataMap) {}
}

/// Single weakly-held observer slot
#[derive(Default)]
pub(crate) struct ObserverSlot {
    inner: Mutex<Option<Weak<dyn SessionObserver>>>,
}

impl ObserverSlot {
    pub(crate) fn set(&self, observer: Weak<dyn SessionObserver>) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    pub(crate) fn clear(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Live observer, if any. The slot lock is released before returning.
    pub(crate) fn get(&self) -> Option<Arc<dyn SessionObserver>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

/// Owned form of a session notification
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(PlaybackState),
    Error {
        kind: &'static str,
        message: String,
    },
    Audio {
        frames: usize,
        format: AudioFormat,
    },
    Metadata(MetadataMap),
}

/// Observer that forwards notifications over a bounded channel.
///
/// Uses `try_send`, so a slow consumer loses events instead of stalling the
/// decoder thread. Lost events are counted.
pub struct ChannelObserver {
    tx: Sender<SessionEvent>,
    forward_audio: bool,
    dropped: AtomicU64,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> (Self, Receiver<SessionEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                forward_audio: true,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Skip `SessionEvent::Audio`, which can easily dominate the channel
    pub fn without_audio(mut self) -> Self {
        self.forward_audio = false;
        self
    }

    /// Events lost because the channel was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn forward(&self, event: SessionEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl SessionObserver for ChannelObserver {
    fn playback_state_changed(&self, state: PlaybackState) {
        self.forward(SessionEvent::StateChanged(state));
    }

    fn decode_error(&self, error: &TapError) {
        self.forward(SessionEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn decoded_audio(&self, _buffer: &PcmBuffer<'_>, frame_count: usize, format: &AudioFormat) {
        if self.forward_audio {
            self.forward(SessionEvent::Audio {
                frames: frame_count,
                format: *format,
            });
        }
    }

    fn metadata_updated(&self, metadata: &MetadataMap) {
        self.forward(SessionEvent::Metadata(metadata.clone()));
    }
}
