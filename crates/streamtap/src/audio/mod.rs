//! Audio subsystem
//!
//! Format descriptors, the moving-average smoother, the spectrum analyzer
//! and the tap interface that feeds it.

pub mod analyzer;
pub mod smoother;
pub mod tap;
pub mod types;

pub use analyzer::{
    fold_bands, AnalyzerConfig, SharedSpectrum, SpectrumAnalyzer, SpectrumFrame, SpectrumObserver,
    WindowFunction,
};
pub use smoother::MovingAverage;
pub use tap::AudioTap;
pub use types::{AudioFormat, ChannelLayout, PcmBuffer, PlaybackState, SampleEncoding, TapDescriptor};
