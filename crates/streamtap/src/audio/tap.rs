//! Decoded-audio tap
//!
//! `AudioTap` is the capability a session hands decoded PCM to. It is pure
//! forwarding: no return value, no buffering on the session side. Heavy
//! work belongs to the tap implementation, which runs on the decoder's
//! thread and must stay bounded.

use crate::error::Result;

use super::analyzer::SpectrumAnalyzer;
use super::types::{AudioFormat, PcmBuffer, TapDescriptor};

/// Consumer of raw decoded frames
pub trait AudioTap: Send {
    /// Called when the decoder announces a track, before any audio for it.
    ///
    /// The default accepts any well-formed format and has no buffer size
    /// preference.
    fn prepare_for_track(&mut self, format: &AudioFormat) -> Result<TapDescriptor> {
        format.validate()?;
        Ok(TapDescriptor::new(*format))
    }

    /// Receive one decoded buffer. The buffer is only valid for this call.
    fn deliver(&mut self, buffer: &PcmBuffer<'_>, frame_count: usize);
}

impl AudioTap for SpectrumAnalyzer {
    fn prepare_for_track(&mut self, format: &AudioFormat) -> Result<TapDescriptor> {
        SpectrumAnalyzer::prepare_for_track(self, format)
    }

    fn deliver(&mut self, buffer: &PcmBuffer<'_>, frame_count: usize) {
        self.process(buffer, frame_count);
    }
}
