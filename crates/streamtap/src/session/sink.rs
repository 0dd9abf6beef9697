//! Decoder collaborator interface
//!
//! A session drives a `StreamDecoder` and hands it a `DecoderSink` for each
//! decode session it starts. Every sink carries the generation it was issued
//! for; once the session stops or restarts, calls through an old sink are
//! ignored. Deliveries hold the session lock shared, `stop()` takes it
//! exclusively, so nothing is delivered after `stop()` returns.
//!
//! State transitions and their notifications happen under one transitions
//! lock, so the observer sees them in the order they took effect. The
//! decoder is never called with that lock held.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::audio::tap::AudioTap;
use crate::audio::types::{AudioFormat, PcmBuffer, PlaybackState, TapDescriptor};
use crate::error::{Result, TapError};
use crate::stream::metadata::MetadataMap;

use super::controller::SessionOptions;
use super::observer::ObserverSlot;
use super::stats::SessionStats;

/// Source of decoded audio and metadata for a session.
///
/// `start` must return promptly; decoding happens elsewhere and reports back
/// through the sink. `stop` must be idempotent and may be called while the
/// decoder is still delivering.
pub trait StreamDecoder: Send {
    fn start(&mut self, url: &str, sink: DecoderSink) -> Result<()>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
}

pub(crate) struct SessionCore {
    pub(crate) state: PlaybackState,
    pub(crate) generation: u64,
}

#[derive(Default)]
pub(crate) struct TapSlot {
    pub(crate) tap: Option<Box<dyn AudioTap>>,
    /// Format the tap was last prepared for
    pub(crate) prepared: Option<AudioFormat>,
}

/// State shared between a session and the sinks it issued
pub(crate) struct SessionShared {
    pub(crate) options: SessionOptions,
    transitions: Mutex<()>,
    core: RwLock<SessionCore>,
    tap: Mutex<TapSlot>,
    metadata: Mutex<Option<MetadataMap>>,
    pub(crate) observer: ObserverSlot,
    pub(crate) stats: SessionStats,
}

impl SessionShared {
    pub(crate) fn new(options: SessionOptions) -> Self {
        Self {
            options,
            transitions: Mutex::new(()),
            core: RwLock::new(SessionCore {
                state: PlaybackState::Stopped,
                generation: 0,
            }),
            tap: Mutex::new(TapSlot::default()),
            metadata: Mutex::new(None),
            observer: ObserverSlot::default(),
            stats: SessionStats::new(),
        }
    }

    /// Held from a state change until its notification has gone out.
    /// Taken before the core lock, never while holding it.
    pub(crate) fn lock_transitions(&self) -> MutexGuard<'_, ()> {
        self.transitions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn read_core(&self) -> RwLockReadGuard<'_, SessionCore> {
        self.core.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_core(&self) -> RwLockWriteGuard<'_, SessionCore> {
        self.core.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_tap(&self) -> MutexGuard<'_, TapSlot> {
        self.tap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_metadata(&self) -> MutexGuard<'_, Option<MetadataMap>> {
        self.metadata.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify_state(&self, state: PlaybackState) {
        if let Some(observer) = self.observer.get() {
            observer.playback_state_changed(state);
        }
    }

    /// End decode session `generation`, optionally with an error.
    ///
    /// Only the first call for a live generation has any effect: the session
    /// goes Stopped, then the observer sees the error (if any) and Stopped.
    pub(crate) fn end_session(&self, generation: u64, error: Option<TapError>) {
        let _transition = self.lock_transitions();
        let ended = {
            let mut core = self.write_core();
            if core.generation != generation || core.state == PlaybackState::Stopped {
                false
            } else {
                core.state = PlaybackState::Stopped;
                core.generation += 1;
                true
            }
        };

        if !ended {
            if let Some(err) = error {
                log::debug!("Ignoring error from finished decode session: {}", err);
            }
            return;
        }

        let observer = self.observer.get();
        match error {
            Some(err) => {
                self.stats.record_error();
                log::error!("Stream failed: {}", err);
                if let Some(observer) = &observer {
                    observer.decode_error(&err);
                }
            }
            None => log::info!("Stream finished"),
        }
        if let Some(observer) = &observer {
            observer.playback_state_changed(PlaybackState::Stopped);
        }
    }
}

/// Handle a decoder reports through, bound to one decode session
#[derive(Clone)]
pub struct DecoderSink {
    shared: Arc<SessionShared>,
    generation: u64,
}

impl DecoderSink {
    pub(crate) fn new(shared: Arc<SessionShared>, generation: u64) -> Self {
        Self { shared, generation }
    }

    fn is_current(&self, core: &SessionCore) -> bool {
        core.generation == self.generation && core.state != PlaybackState::Stopped
    }

    /// True while this sink's decode session is running or paused
    pub fn is_active(&self) -> bool {
        self.is_current(&self.shared.read_core())
    }

    /// A track's format is known; returns the descriptor for installing the tap
    pub fn track_prepared(&self, format: &AudioFormat) -> Result<TapDescriptor> {
        if !self.shared.options.tap_enabled {
            return Err(TapError::TapUnavailable(
                "audio tap is disabled for this session".to_string(),
            ));
        }

        let core = self.shared.read_core();
        if !self.is_current(&core) {
            return Err(TapError::TapUnavailable(
                "decode session is no longer active".to_string(),
            ));
        }

        log::info!("Track prepared: {}", format);
        let mut slot = self.shared.lock_tap();
        let descriptor = match slot.tap.as_mut() {
            Some(tap) => tap.prepare_for_track(format)?,
            None => {
                format.validate()?;
                TapDescriptor::new(*format)
            }
        };
        slot.prepared = Some(*format);
        Ok(descriptor)
    }

    /// Forward one decoded buffer to the tap and the observer.
    ///
    /// Dropped unless the tap option is on and the session is Playing. A
    /// format change re-prepares the tap before the buffer reaches it.
    pub fn decoded(&self, buffer: &PcmBuffer<'_>, frame_count: usize, format: &AudioFormat) {
        if !self.shared.options.tap_enabled {
            return;
        }

        let core = self.shared.read_core();
        if core.generation != self.generation || core.state != PlaybackState::Playing {
            return;
        }

        let frames = frame_count.min(buffer.frames_available(format.channels));
        {
            let mut guard = self.shared.lock_tap();
            let slot = &mut *guard;
            if let Some(tap) = slot.tap.as_mut() {
                if slot.prepared != Some(*format) {
                    match tap.prepare_for_track(format) {
                        Ok(_) => slot.prepared = Some(*format),
                        Err(e) => log::warn!("Tap rejected format {}: {}", format, e),
                    }
                }
                if slot.prepared == Some(*format) {
                    tap.deliver(buffer, frames);
                    self.shared.stats.record_buffer(frames);
                }
            }
        }

        if let Some(observer) = self.shared.observer.get() {
            observer.decoded_audio(buffer, frames, format);
        }
        drop(core);
    }

    /// Replace the current metadata and forward it.
    ///
    /// Dropped entirely when the metadata option is off: the session neither
    /// stores nor reports it.
    pub fn metadata(&self, metadata: MetadataMap) {
        if !self.shared.options.metadata_enabled {
            return;
        }

        let core = self.shared.read_core();
        if !self.is_current(&core) {
            return;
        }

        *self.shared.lock_metadata() = Some(metadata.clone());
        self.shared.stats.record_metadata();
        log::debug!("Metadata update: {:?}", metadata);
        if let Some(observer) = self.shared.observer.get() {
            observer.metadata_updated(&metadata);
        }
        drop(core);
    }

    /// A packet failed to decode but the stream goes on
    pub fn recoverable_error(&self, error: TapError) {
        if !self.is_active() {
            return;
        }
        self.shared.stats.record_error();
        log::warn!("Recoverable decode error: {}", error);
    }

    /// The decoder cannot continue; the session stops
    pub fn fail(&self, error: TapError) {
        self.shared.end_session(self.generation, Some(error));
    }

    /// Clean end of stream; the session stops without an error
    pub fn finished(&self) {
        self.shared.end_session(self.generation, None);
    }
}
