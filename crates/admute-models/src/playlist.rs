//! Live media playlist model.
//!
//! The playlist is the plain-text, line-oriented manifest a player polls to
//! learn which segments are currently available:
//!
//! ```text
//! #EXTM3U
//! #EXT-X-VERSION:3
//! #EXT-X-TARGETDURATION:10
//! #EXT-X-MEDIA-SEQUENCE:4
//! #EXTINF:3.000,
//! 4.ts
//! #EXTINF:3.000,
//! 5.ts
//! ```
//!
//! Only the rolling window of the most recent entries is kept.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::segment::parse_segment_index;

/// Playlist version tag written by this crate.
pub const PLAYLIST_VERSION: u32 = 3;

/// Default number of entries kept in the live window.
pub const DEFAULT_WINDOW: usize = 6;

/// Default target duration before any entry has been published.
pub const DEFAULT_TARGET_DURATION: u64 = 10;

/// Errors from parsing a playlist.
#[derive(Debug, Error, PartialEq)]
pub enum PlaylistError {
    #[error("missing #EXTM3U header")]
    MissingHeader,

    #[error("invalid value for {tag}: {value}")]
    InvalidTag { tag: &'static str, value: String },
}

/// One segment entry in the playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Segment file name, relative to the playlist
    pub uri: String,
    /// Segment duration in seconds
    pub duration: f64,
}

impl ManifestEntry {
    pub fn new(uri: impl Into<String>, duration: f64) -> Self {
        Self {
            uri: uri.into(),
            duration,
        }
    }
}

/// Parsed state of a live playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPlaylist {
    pub version: u32,
    pub target_duration: u64,
    pub media_sequence: u64,
    /// Entries, oldest first
    pub entries: Vec<ManifestEntry>,
}

impl Default for MediaPlaylist {
    fn default() -> Self {
        Self::with_target_duration(DEFAULT_TARGET_DURATION)
    }
}

impl MediaPlaylist {
    /// Empty playlist with the given initial target duration.
    pub fn with_target_duration(target_duration: u64) -> Self {
        Self {
            version: PLAYLIST_VERSION,
            target_duration,
            media_sequence: 0,
            entries: Vec::new(),
        }
    }

    /// Parse playlist text.
    ///
    /// Unknown tags are ignored. A playlist without entries is valid.
    pub fn parse(contents: &str) -> Result<Self, PlaylistError> {
        if !contents.trim_start().starts_with("#EXTM3U") {
            return Err(PlaylistError::MissingHeader);
        }

        let mut playlist = Self::with_target_duration(0);
        let mut pending_duration: Option<f64> = None;

        for line in contents.lines().map(str::trim) {
            if let Some(value) = line.strip_prefix("#EXT-X-VERSION:") {
                playlist.version = value.parse().map_err(|_| PlaylistError::InvalidTag {
                    tag: "EXT-X-VERSION",
                    value: value.to_string(),
                })?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                let target: f64 = value.parse().map_err(|_| PlaylistError::InvalidTag {
                    tag: "EXT-X-TARGETDURATION",
                    value: value.to_string(),
                })?;
                playlist.target_duration = target.max(0.0).ceil() as u64;
            } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                playlist.media_sequence =
                    value.parse().map_err(|_| PlaylistError::InvalidTag {
                        tag: "EXT-X-MEDIA-SEQUENCE",
                        value: value.to_string(),
                    })?;
            } else if let Some(value) = line.strip_prefix("#EXTINF:") {
                let duration = value.split(',').next().unwrap_or_default().trim();
                pending_duration =
                    Some(duration.parse().map_err(|_| PlaylistError::InvalidTag {
                        tag: "EXTINF",
                        value: value.to_string(),
                    })?);
            } else if line.starts_with('#') || line.is_empty() {
                continue;
            } else if let Some(duration) = pending_duration.take() {
                playlist.entries.push(ManifestEntry::new(line, duration));
            }
        }

        Ok(playlist)
    }

    /// Render the playlist as text.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(96 + self.entries.len() * 32);
        out.push_str("#EXTM3U\n");
        out.push_str(&format!("#EXT-X-VERSION:{}\n", self.version));
        out.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", self.target_duration));
        out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", self.media_sequence));
        for entry in &self.entries {
            out.push_str(&format!("#EXTINF:{:.3},\n", entry.duration));
            out.push_str(&entry.uri);
            out.push('\n');
        }
        out
    }

    /// Append an entry and slide the window.
    ///
    /// - An entry whose uri is already listed is updated in place.
    /// - Entries beyond `window` are dropped oldest-first, and the media
    ///   sequence follows the index of the oldest surviving entry (or
    ///   advances by the number dropped when that index is not parseable).
    /// - The target duration never decreases.
    ///
    /// Returns the number of entries dropped.
    pub fn publish(&mut self, entry: ManifestEntry, window: usize) -> usize {
        match self.entries.iter_mut().find(|e| e.uri == entry.uri) {
            Some(existing) => existing.duration = entry.duration,
            None => self.entries.push(entry),
        }

        let window = window.max(1);
        let dropped = self.entries.len().saturating_sub(window);
        if dropped > 0 {
            self.entries.drain(..dropped);
        }

        let derived = self
            .entries
            .first()
            .and_then(|oldest| parse_segment_index(&oldest.uri))
            .unwrap_or(self.media_sequence + dropped as u64);
        self.media_sequence = self.media_sequence.max(derived);

        self.target_duration = self.target_duration.max(self.max_entry_duration_ceil());
        dropped
    }

    /// Duration listed for `uri`, if present.
    pub fn duration_of(&self, uri: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.uri == uri || e.uri.rsplit('/').next() == Some(uri))
            .map(|e| e.duration)
    }

    /// Highest segment index listed, from entry file names.
    pub fn newest_index(&self) -> Option<u64> {
        self.entries
            .iter()
            .filter_map(|e| parse_segment_index(&e.uri))
            .max()
    }

    /// Ceiling of the longest entry duration, at millisecond precision.
    fn max_entry_duration_ceil(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| ((e.duration * 1000.0).round() / 1000.0).ceil())
            .fold(0.0_f64, f64::max) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_render_cycle() {
        let text = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:7\n#EXTINF:3.500,\n7.ts\n#EXTINF:3.000,\n8.ts\n";
        let playlist = MediaPlaylist::parse(text).unwrap();
        assert_eq!(playlist.media_sequence, 7);
        assert_eq!(playlist.target_duration, 4);
        assert_eq!(playlist.entries.len(), 2);
        assert_eq!(playlist.render(), text);
    }

    #[test]
    fn test_parse_without_entries() {
        let playlist = MediaPlaylist::parse("#EXTM3U\n#EXT-X-VERSION:3\n").unwrap();
        assert!(playlist.entries.is_empty());
    }

    #[test]
    fn test_parse_rejects_missing_header() {
        assert_eq!(
            MediaPlaylist::parse("#EXTINF:1.0,\n1.ts\n"),
            Err(PlaylistError::MissingHeader)
        );
    }

    #[test]
    fn test_parse_rejects_bad_extinf() {
        let err = MediaPlaylist::parse("#EXTM3U\n#EXTINF:abc,\n1.ts\n").unwrap_err();
        assert!(matches!(err, PlaylistError::InvalidTag { tag: "EXTINF", .. }));
    }

    #[test]
    fn test_publish_slides_window() {
        let mut playlist = MediaPlaylist::default();
        for i in 0..10u64 {
            playlist.publish(ManifestEntry::new(format!("{i}.ts"), 3.0), 6);
            assert!(playlist.entries.len() <= 6);
        }
        assert_eq!(playlist.entries.len(), 6);
        assert_eq!(playlist.entries[0].uri, "4.ts");
        assert_eq!(playlist.media_sequence, 4);
    }

    #[test]
    fn test_publish_sequence_never_decreases() {
        let mut playlist = MediaPlaylist::default();
        let mut last = 0;
        for name in ["3.ts", "4.ts", "a.ts", "b.ts", "5.ts", "c.ts"] {
            playlist.publish(ManifestEntry::new(name, 2.0), 2);
            assert!(playlist.media_sequence >= last);
            last = playlist.media_sequence;
        }
    }

    #[test]
    fn test_publish_unparseable_names_advance_by_dropped() {
        let mut playlist = MediaPlaylist::default();
        for name in ["a.ts", "b.ts", "c.ts"] {
            playlist.publish(ManifestEntry::new(name, 2.0), 2);
        }
        assert_eq!(playlist.media_sequence, 1);
    }

    #[test]
    fn test_publish_same_uri_updates_in_place() {
        let mut playlist = MediaPlaylist::default();
        playlist.publish(ManifestEntry::new("1.ts", 2.0), 6);
        playlist.publish(ManifestEntry::new("1.ts", 2.5), 6);
        assert_eq!(playlist.entries.len(), 1);
        assert_eq!(playlist.entries[0].duration, 2.5);
    }

    #[test]
    fn test_target_duration_monotonic() {
        let mut playlist = MediaPlaylist::with_target_duration(2);
        playlist.publish(ManifestEntry::new("0.ts", 3.2), 2);
        assert_eq!(playlist.target_duration, 4);
        playlist.publish(ManifestEntry::new("1.ts", 1.0), 2);
        playlist.publish(ManifestEntry::new("2.ts", 1.0), 2);
        assert_eq!(playlist.target_duration, 4);
    }

    #[test]
    fn test_exact_duration_does_not_round_up() {
        let mut playlist = MediaPlaylist::with_target_duration(0);
        playlist.publish(ManifestEntry::new("0.ts", 3.0), 6);
        assert_eq!(playlist.target_duration, 3);
    }

    #[test]
    fn test_duration_of() {
        let mut playlist = MediaPlaylist::default();
        playlist.publish(ManifestEntry::new("seg/9.ts", 4.0), 6);
        assert_eq!(playlist.duration_of("9.ts"), Some(4.0));
        assert_eq!(playlist.duration_of("10.ts"), None);
    }

    #[test]
    fn test_newest_index() {
        let mut playlist = MediaPlaylist::default();
        assert_eq!(playlist.newest_index(), None);
        playlist.publish(ManifestEntry::new("segment3.ts", 2.0), 6);
        playlist.publish(ManifestEntry::new("segment4.ts", 2.0), 6);
        assert_eq!(playlist.newest_index(), Some(4));
    }
}
