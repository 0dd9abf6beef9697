//! Stream metadata types and ICY parsing
//!
//! Metadata travels as a full key/value map that replaces the previous one
//! on every update. ICY (Icecast/Shoutcast) blocks are parsed into such a
//! map; `TrackInfo` pulls the displayable fields back out of it.

use std::collections::HashMap;
use std::fmt;

/// Full metadata snapshot; each update replaces the previous map wholesale
pub type MetadataMap = HashMap<String, String>;

/// Parse an ICY metadata string into a map.
///
/// ICY metadata format: `StreamTitle='Artist - Song';StreamUrl='...';`
/// Values run to the next `';`, so embedded quotes survive. Empty values are
/// skipped, and for repeated keys the first occurrence wins.
pub fn parse_icy_metadata(metadata: &str) -> MetadataMap {
    let mut map = MetadataMap::new();
    let mut rest = metadata;

    while let Some(eq) = rest.find("='") {
        let key = icy_key(&rest[..eq]);
        let after = &rest[eq + 2..];

        let (value, next) = match after.find("';") {
            Some(end) => (&after[..end], &after[end + 2..]),
            None => match after.trim_end().strip_suffix('\'') {
                Some(value) => (value, ""),
                // Unterminated value: nothing trustworthy left
                None => break,
            },
        };

        let value = value.trim();
        if !key.is_empty() && !value.is_empty() {
            map.entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
        rest = next;
    }

    map
}

/// Key in front of `='`: whatever follows the last `;`, without stray
/// whitespace, padding or undecodable bytes around it
fn icy_key(prefix: &str) -> &str {
    let key = prefix.rsplit(';').next().unwrap_or(prefix);
    key.trim_matches(|c: char| !c.is_ascii_graphic())
}

/// Parse a raw metadata block (with null padding).
///
/// Raw ICY metadata blocks are null-padded to a multiple of 16 bytes.
/// This strips null bytes, converts to UTF-8, then parses the pairs.
pub fn extract_icy_metadata(raw_block: &[u8]) -> MetadataMap {
    let end = raw_block
        .iter()
        .rposition(|&b| b != 0)
        .map(|p| p + 1)
        .unwrap_or(0);
    if end == 0 {
        return MetadataMap::new();
    }

    let meta_str = String::from_utf8_lossy(&raw_block[..end]);
    parse_icy_metadata(&meta_str)
}

fn lookup<'a>(map: &'a MetadataMap, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|wanted| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(wanted))
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    })
}

/// Displayable track fields derived from a metadata map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl TrackInfo {
    /// Create track info from a bare title string.
    ///
    /// Splits on first ` - ` separator: "Artist - Title" → artist="Artist", title="Title".
    /// If no separator found, the whole string becomes the title.
    pub fn from_title(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::default();
        }

        if let Some(pos) = raw.find(" - ") {
            let artist = raw[..pos].trim().to_string();
            let title = raw[pos + 3..].trim().to_string();
            Self {
                title: if title.is_empty() { None } else { Some(title) },
                artist: if artist.is_empty() {
                    None
                } else {
                    Some(artist)
                },
                album: None,
            }
        } else {
            Self {
                title: Some(raw.to_string()),
                ..Self::default()
            }
        }
    }

    /// Pull title/artist/album out of a metadata map.
    ///
    /// Keys are matched case-insensitively; ICY `StreamTitle` counts as a
    /// title. When no artist is given the title is split like `from_title`,
    /// since many stations send `"Artist - Track"` as the title alone.
    pub fn from_metadata(map: &MetadataMap) -> Self {
        let title = lookup(map, &["title", "StreamTitle"]);
        let artist = lookup(map, &["artist"]);
        let album = lookup(map, &["album"]).map(str::to_string);

        match (title, artist) {
            (Some(title), None) => Self {
                album,
                ..Self::from_title(title)
            },
            (title, artist) => Self {
                title: title.map(str::to_string),
                artist: artist.map(str::to_string),
                album,
            },
        }
    }

    /// True when nothing displayable was found
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none()
    }
}

impl fmt::Display for TrackInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.artist, &self.title) {
            (Some(artist), Some(title)) => write!(f, "{} - {}", artist, title),
            (Some(artist), None) => write!(f, "{}", artist),
            (None, Some(title)) => write!(f, "{}", title),
            (None, None) => Ok(()),
        }
    }
}
