//! Shared data models for the AdMute live stream censor.
//!
//! This crate provides Serde-serializable types for:
//! - Timestamped transcript words and sentence fragments
//! - Ad regions and their merge rule
//! - The rolling live playlist (parse, render, windowed publish)
//! - Segment file naming

pub mod playlist;
pub mod region;
pub mod segment;
pub mod transcript;

// Re-export common types
pub use playlist::{ManifestEntry, MediaPlaylist, PlaylistError};
pub use region::{merge_regions, AdRegion};
pub use segment::{file_name_of, has_extension, parse_segment_index};
pub use transcript::{TranscriptFragment, TranscriptWord};
