//! Stream session controller
//!
//! Owns the playback state machine for one stream URL:
//!
//! ```text
//! Stopped --play--> Playing --pause--> Paused --play--> Playing
//! Playing | Paused --stop--> Stopped
//! ```
//!
//! Each real transition notifies the observer once; no-op calls notify
//! nothing. Decoding itself is delegated to a `StreamDecoder`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Deserialize;

use crate::audio::tap::AudioTap;
use crate::audio::types::{AudioFormat, PlaybackState};
use crate::error::{Result, TapError};
use crate::stream::metadata::{MetadataMap, TrackInfo};

use super::observer::SessionObserver;
use super::sink::{DecoderSink, SessionShared, StreamDecoder};
use super::stats::StatsSnapshot;

/// Per-session feature switches, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Route decoded PCM to the tap and the observer
    pub tap_enabled: bool,
    /// Forward stream metadata to the observer
    pub metadata_enabled: bool,
}

/// Playback session for one stream
pub struct StreamSession {
    url: String,
    shared: Arc<SessionShared>,
    decoder: Mutex<Box<dyn StreamDecoder>>,
}

impl StreamSession {
    pub fn new(
        url: impl Into<String>,
        options: SessionOptions,
        decoder: Box<dyn StreamDecoder>,
    ) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(TapError::InvalidArgument(
                "stream URL must not be empty".to_string(),
            ));
        }
        Ok(Self {
            url,
            shared: Arc::new(SessionShared::new(options)),
            decoder: Mutex::new(decoder),
        })
    }

    fn lock_decoder(&self) -> MutexGuard<'_, Box<dyn StreamDecoder>> {
        self.decoder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start decoding from Stopped, resume from Paused; no-op while Playing.
    ///
    /// Start failures are reported like any decode failure: an error
    /// notification followed by Stopped.
    pub fn play(&self) {
        let transition = self.shared.lock_transitions();
        let generation = {
            let mut core = self.shared.write_core();
            match core.state {
                PlaybackState::Playing => return,
                PlaybackState::Paused => {
                    core.state = PlaybackState::Playing;
                    None
                }
                PlaybackState::Stopped => {
                    core.state = PlaybackState::Playing;
                    core.generation += 1;
                    Some(core.generation)
                }
            }
        };

        match generation {
            None => {
                log::info!("Resuming {}", self.url);
                self.shared.notify_state(PlaybackState::Playing);
                drop(transition);
                self.lock_decoder().resume();
            }
            Some(generation) => {
                log::info!("Playing {}", self.url);
                *self.shared.lock_metadata() = None;
                self.shared.lock_tap().prepared = None;
                self.shared.notify_state(PlaybackState::Playing);
                drop(transition);

                let sink = DecoderSink::new(self.shared.clone(), generation);
                let started = self.lock_decoder().start(&self.url, sink);
                if let Err(e) = started {
                    self.shared.end_session(generation, Some(e));
                }
            }
        }
    }

    /// Pause while Playing; silently ignored in any other state
    pub fn pause(&self) {
        {
            let _transition = self.shared.lock_transitions();
            {
                let mut core = self.shared.write_core();
                if core.state != PlaybackState::Playing {
                    return;
                }
                core.state = PlaybackState::Paused;
            }
            log::info!("Paused {}", self.url);
            self.shared.notify_state(PlaybackState::Paused);
        }
        self.lock_decoder().pause();
    }

    /// Tear down the decode session. Idempotent.
    ///
    /// Waits for in-flight deliveries; none happen after this returns.
    pub fn stop(&self) {
        {
            let _transition = self.shared.lock_transitions();
            let changed = {
                let mut core = self.shared.write_core();
                if core.state == PlaybackState::Stopped {
                    false
                } else {
                    core.state = PlaybackState::Stopped;
                    core.generation += 1;
                    true
                }
            };
            if changed {
                log::info!("Stopped {}", self.url);
                self.shared.notify_state(PlaybackState::Stopped);
            }
        }
        self.lock_decoder().stop();
    }

    /// Install the tap that receives decoded PCM, replacing any previous one
    pub fn set_tap(&self, tap: Box<dyn AudioTap>) -> Result<()> {
        if !self.shared.options.tap_enabled {
            return Err(TapError::TapUnavailable(
                "audio tap is disabled for this session".to_string(),
            ));
        }
        let mut slot = self.shared.lock_tap();
        slot.tap = Some(tap);
        slot.prepared = None;
        Ok(())
    }

    /// Remove and return the installed tap
    pub fn take_tap(&self) -> Option<Box<dyn AudioTap>> {
        let mut slot = self.shared.lock_tap();
        slot.prepared = None;
        slot.tap.take()
    }

    /// Register the observer, held weakly. Replaces any previous one.
    pub fn set_observer<O: SessionObserver + 'static>(&self, observer: &Arc<O>) {
        let weak = Arc::downgrade(observer);
        self.shared.observer.set(weak as Weak<dyn SessionObserver>);
    }

    pub fn clear_observer(&self) {
        self.shared.observer.clear();
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> SessionOptions {
        self.shared.options
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.read_core().state
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == PlaybackState::Stopped
    }

    /// Latest metadata map of the current decode session
    pub fn current_metadata(&self) -> Option<MetadataMap> {
        self.shared.lock_metadata().clone()
    }

    /// Title/artist/album derived from the current metadata
    pub fn track_info(&self) -> Option<TrackInfo> {
        self.shared
            .lock_metadata()
            .as_ref()
            .map(TrackInfo::from_metadata)
            .filter(|info| !info.is_empty())
    }

    /// Format the tap was last prepared for in the current decode session
    pub fn current_format(&self) -> Option<AudioFormat> {
        self.shared.lock_tap().prepared
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        {
            let mut core = self.shared.write_core();
            core.state = PlaybackState::Stopped;
            core.generation += 1;
        }
        self.lock_decoder().stop();
    }
}
