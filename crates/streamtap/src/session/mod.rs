//! Stream session
//!
//! Playback lifecycle for one stream, the decoder collaborator interface,
//! observer fan-out and delivery counters.

pub mod controller;
pub mod observer;
pub mod sink;
pub mod stats;

pub use controller::{SessionOptions, StreamSession};
pub use observer::{ChannelObserver, SessionEvent, SessionObserver};
pub use sink::{DecoderSink, StreamDecoder};
pub use stats::{SessionStats, StatsSnapshot};
