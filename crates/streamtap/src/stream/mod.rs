//! Stream sources and metadata
//!
//! ICY (Icecast/Shoutcast) demuxing and the metadata map types shared by the
//! decoder and the session.

pub mod icy;
pub mod metadata;

pub use icy::{IcyHeaders, IcyReader};
pub use metadata::{MetadataMap, TrackInfo};
