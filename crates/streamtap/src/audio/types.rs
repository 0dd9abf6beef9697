//! Shared audio types
//!
//! Pure data types used across the tap pipeline: the sample format
//! descriptor, borrowed PCM buffer views, playback state and tap descriptors.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, TapError};

/// Current playback state of a stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "Stopped"),
            PlaybackState::Playing => write!(f, "Playing"),
            PlaybackState::Paused => write!(f, "Paused"),
        }
    }
}

/// Numeric encoding of PCM samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    Float,
    SignedInt,
}

/// How channels are arranged inside a PCM buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelLayout {
    /// `L R L R ...`
    #[default]
    Interleaved,
    /// `L L ... R R ...`, each channel a contiguous run of equal length
    Planar,
}

/// Sample format descriptor for one track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub encoding: SampleEncoding,
    pub layout: ChannelLayout,
}

impl AudioFormat {
    /// Interleaved 32-bit float, the shape most decoders hand out
    pub fn interleaved_f32(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 32,
            encoding: SampleEncoding::Float,
            layout: ChannelLayout::Interleaved,
        }
    }

    /// Interleaved signed 16-bit integer
    pub fn interleaved_i16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
            encoding: SampleEncoding::SignedInt,
            layout: ChannelLayout::Interleaved,
        }
    }

    /// Same format with a different channel layout
    pub fn with_layout(mut self, layout: ChannelLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Reject descriptors no decoder could have produced
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(TapError::InvalidArgument(
                "sample rate must be non-zero".to_string(),
            ));
        }
        if self.channels == 0 {
            return Err(TapError::InvalidArgument(
                "channel count must be non-zero".to_string(),
            ));
        }
        if self.bits_per_sample == 0 {
            return Err(TapError::InvalidArgument(
                "bits per sample must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channel_str = match self.channels {
            1 => "Mono".to_string(),
            2 => "Stereo".to_string(),
            n => format!("{n} ch"),
        };
        let kind = match self.encoding {
            SampleEncoding::Float => "float",
            SampleEncoding::SignedInt => "int",
        };
        write!(
            f,
            "{} Hz · {}-bit {} · {}",
            self.sample_rate, self.bits_per_sample, kind, channel_str
        )?;
        if self.layout == ChannelLayout::Planar {
            write!(f, " · planar")?;
        }
        Ok(())
    }
}

/// Borrowed view of one decoded PCM buffer.
///
/// Owned by the producer; consumers only see it for the duration of a
/// callback and must copy anything they want to keep.
#[derive(Debug, Clone, Copy)]
pub enum PcmBuffer<'a> {
    F32(&'a [f32]),
    I16(&'a [i16]),
    I32(&'a [i32]),
}

impl PcmBuffer<'_> {
    /// Total number of samples across all channels
    pub fn len(&self) -> usize {
        match self {
            PcmBuffer::F32(s) => s.len(),
            PcmBuffer::I16(s) => s.len(),
            PcmBuffer::I32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample at `index`, normalised to `[-1.0, 1.0)` for integer encodings
    #[inline]
    pub fn sample(&self, index: usize) -> f32 {
        match self {
            PcmBuffer::F32(s) => s[index],
            PcmBuffer::I16(s) => s[index] as f32 / 32_768.0,
            PcmBuffer::I32(s) => (s[index] as f64 / 2_147_483_648.0) as f32,
        }
    }

    /// Whole frames actually present for the given channel count
    pub fn frames_available(&self, channels: u16) -> usize {
        if channels == 0 {
            return 0;
        }
        self.len() / channels as usize
    }
}

static NEXT_TAP_ID: AtomicU64 = AtomicU64::new(1);

/// Handle given to the decoding collaborator so it can install a tap on a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapDescriptor {
    id: u64,
    format: AudioFormat,
    preferred_frames: Option<usize>,
}

impl TapDescriptor {
    /// Descriptor for a tap with no buffer size preference
    pub fn new(format: AudioFormat) -> Self {
        Self {
            id: NEXT_TAP_ID.fetch_add(1, Ordering::Relaxed),
            format,
            preferred_frames: None,
        }
    }

    /// Descriptor for a tap that consumes audio in windows of `frames`
    pub fn with_preferred_frames(format: AudioFormat, frames: usize) -> Self {
        Self {
            preferred_frames: Some(frames),
            ..Self::new(format)
        }
    }

    /// Unique id of this preparation
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Track format the tap was prepared for
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Frames per buffer the tap works best with, if it has a preference
    pub fn preferred_frames(&self) -> Option<usize> {
        self.preferred_frames
    }
}
