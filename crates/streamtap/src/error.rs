//! Error types for streamtap
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// Main error type for the tap pipeline
#[derive(Error, Debug)]
pub enum TapError {
    /// Bad construction parameter (window length, transform size, format)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The decoder failed; the current session cannot continue
    #[error("Decode error: {0}")]
    DecodeFailure(String),

    /// A tap was requested where the session or track cannot provide one
    #[error("Tap unavailable: {0}")]
    TapUnavailable(String),

    #[error("{}", friendly_network_error(.0))]
    Network(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TapError {
    /// Short kind label, stable across message changes
    pub fn kind(&self) -> &'static str {
        match self {
            TapError::InvalidArgument(_) => "InvalidArgument",
            TapError::DecodeFailure(_) => "DecodeFailure",
            TapError::TapUnavailable(_) => "TapUnavailable",
            TapError::Network(_) => "Network",
            TapError::Io(_) => "Io",
        }
    }
}

/// Result type alias for streamtap
pub type Result<T> = std::result::Result<T, TapError>;

fn friendly_network_error(e: &reqwest::Error) -> String {
    if e.is_builder() {
        if let Some(url) = e.url() {
            return format!("Invalid URL: {url}");
        }
        return "Invalid URL".to_string();
    }
    if e.is_connect() {
        if let Some(url) = e.url() {
            return format!("Could not connect to {}", url.host_str().unwrap_or("server"));
        }
        return "Could not connect to server".to_string();
    }
    if e.is_timeout() {
        return "Connection timed out".to_string();
    }
    format!("Network error: {e}")
}
