//! streamtap: real-time spectrum and metadata tap for audio streams
//!
//! Sits between a streaming decoder and a visualization consumer: decoded PCM
//! is tapped as it arrives, windowed through an FFT, smoothed per bin, and
//! handed to a delegate. Stream metadata travels on a side channel.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamtap::audio::{AnalyzerConfig, AudioFormat, SharedSpectrum, SpectrumAnalyzer};
//! use streamtap::decode::SymphoniaDecoder;
//! use streamtap::session::{SessionOptions, StreamSession};
//!
//! let spectrum = Arc::new(SharedSpectrum::new());
//! let mut analyzer =
//!     SpectrumAnalyzer::new(AudioFormat::interleaved_f32(44100, 2), AnalyzerConfig::default())?;
//! analyzer.set_observer(&spectrum);
//!
//! let options = SessionOptions { tap_enabled: true, metadata_enabled: true };
//! let session = StreamSession::new(
//!     "http://example.com/stream.mp3",
//!     options,
//!     Box::new(SymphoniaDecoder::new()),
//! )?;
//! session.set_tap(Box::new(analyzer))?;
//! session.play();
//! # Ok::<(), streamtap::error::TapError>(())
//! ```

pub mod audio;
pub mod config;
pub mod decode;
pub mod error;
pub mod session;
pub mod stream;
