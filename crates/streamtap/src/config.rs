//! Configuration constants for the streamtap pipeline

/// Spectrum analysis defaults
pub mod analysis {
    /// FFT window size (frames per analysed window)
    pub const DEFAULT_WINDOW_SIZE: usize = 1024;

    /// Number of windows averaged per bin by the smoother
    pub const DEFAULT_SMOOTHING_LENGTH: usize = 4;
}

/// Observer delivery configuration
pub mod observer {
    /// Capacity of the channel used by `ChannelObserver`; events beyond it are dropped
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}

/// Reference decoder configuration
pub mod decode {
    /// How long the decode thread sleeps between checks while paused (milliseconds)
    pub const PAUSE_POLL_MS: u64 = 20;

    /// Real-time pacing only sleeps once decoding runs ahead by this much (milliseconds)
    pub const PACING_SLACK_MS: u64 = 50;
}

/// Network-related configuration
pub mod network {
    /// User agent for HTTP requests
    pub const USER_AGENT: &str = concat!("streamtap/", env!("CARGO_PKG_VERSION"));

    /// Connection timeout in seconds
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Read timeout in seconds
    pub const READ_TIMEOUT_SECS: u64 = 30;
}
