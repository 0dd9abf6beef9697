//! ICY stream demuxer
//!
//! Connects to Icecast/Shoutcast streams with in-band metadata enabled and
//! strips the metadata blocks out of the byte stream, so the decoder only
//! ever sees audio. Each changed metadata block is sent as a full map.

use std::io::{self, Read};
use std::time::Duration;

use crossbeam_channel::Sender;
use reqwest::header::HeaderMap;

use crate::config::network::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, USER_AGENT};
use crate::error::Result;
use crate::stream::metadata::{extract_icy_metadata, MetadataMap};

/// Headers parsed from an ICY stream response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IcyHeaders {
    pub metaint: usize,
    pub station_name: Option<String>,
    pub genre: Option<String>,
    pub content_type: Option<String>,
    pub bitrate: Option<u32>,
}

impl IcyHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        Self {
            metaint: text("icy-metaint")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0),
            station_name: text("icy-name"),
            genre: text("icy-genre"),
            content_type: text("content-type"),
            bitrate: text("icy-br").and_then(|v| v.parse::<u32>().ok()),
        }
    }

    /// Station-level fields that accompany every metadata map
    pub fn station_fields(&self) -> MetadataMap {
        let mut map = MetadataMap::new();
        if let Some(name) = &self.station_name {
            map.insert("icy-name".to_string(), name.clone());
        }
        if let Some(genre) = &self.genre {
            map.insert("icy-genre".to_string(), genre.clone());
        }
        map
    }
}

/// Open an HTTP(S) stream asking the server for in-band ICY metadata.
///
/// Non-success statuses become `TapError::Network`.
pub fn connect(url: &str) -> Result<(reqwest::blocking::Response, IcyHeaders)> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
        .build()?;

    let response = client
        .get(url)
        .header("Icy-MetaData", "1")
        .send()?
        .error_for_status()?;

    let headers = IcyHeaders::from_headers(response.headers());
    log::info!(
        "Connected to {} (metaint={}, station={:?}, type={:?})",
        url,
        headers.metaint,
        headers.station_name,
        headers.content_type
    );
    Ok((response, headers))
}

/// Reader that passes audio bytes through and pulls ICY metadata out.
///
/// With `metaint == 0` the stream carries no metadata and bytes pass through
/// untouched. Otherwise every `metaint` audio bytes are followed by one
/// length byte and `length * 16` bytes of null-padded metadata.
pub struct IcyReader<R> {
    inner: R,
    metaint: usize,
    bytes_until_meta: usize,
    station: MetadataMap,
    last_sent: Option<MetadataMap>,
    metadata_tx: Sender<MetadataMap>,
}

impl<R: Read> IcyReader<R> {
    /// Wrap `inner`; station fields from `headers`, if any, are sent right away
    pub fn new(inner: R, headers: &IcyHeaders, metadata_tx: Sender<MetadataMap>) -> Self {
        let mut reader = Self {
            inner,
            metaint: headers.metaint,
            bytes_until_meta: headers.metaint,
            station: headers.station_fields(),
            last_sent: None,
            metadata_tx,
        };
        if !reader.station.is_empty() {
            let station = reader.station.clone();
            reader.publish(station);
        }
        reader
    }

    fn publish(&mut self, map: MetadataMap) {
        if self.last_sent.as_ref() == Some(&map) {
            return;
        }
        // Receiver gone just means nobody listens for metadata anymore
        let _ = self.metadata_tx.send(map.clone());
        self.last_sent = Some(map);
    }

    /// Consume one metadata block. Returns false on clean EOF before the length byte.
    fn read_metadata_block(&mut self) -> io::Result<bool> {
        let mut len_byte = [0u8; 1];
        loop {
            match self.inner.read(&mut len_byte) {
                Ok(0) => return Ok(false),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let meta_len = len_byte[0] as usize * 16;
        if meta_len > 0 {
            let mut block = vec![0u8; meta_len];
            self.inner.read_exact(&mut block)?;

            let parsed = extract_icy_metadata(&block);
            if !parsed.is_empty() {
                let mut map = self.station.clone();
                map.extend(parsed);
                log::debug!("ICY metadata block: {:?}", map);
                self.publish(map);
            }
        }

        self.bytes_until_meta = self.metaint;
        Ok(true)
    }
}

impl<R: Read> Read for IcyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.metaint == 0 {
            return self.inner.read(buf);
        }

        if self.bytes_until_meta == 0 && !self.read_metadata_block()? {
            return Ok(0);
        }

        let to_read = buf.len().min(self.bytes_until_meta);
        let n = self.inner.read(&mut buf[..to_read])?;
        self.bytes_until_meta -= n;
        Ok(n)
    }
}
