#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper for segment audio processing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with timeouts
//! - Segment probing (duration, stream layout)
//! - In-memory mono PCM buffers with duration-preserving tone splicing
//! - The [`CodecService`] seam used by the worker, with an FFmpeg backend
//! - Atomic file replacement for live-read outputs

pub mod audio;
pub mod codec;
pub mod command;
pub mod error;
pub mod fs_utils;
pub mod probe;

pub use audio::{generate_tone, splice_regions, splice_tone, AudioBuffer, ToneConfig};
pub use codec::{CodecService, FfmpegCodec, FfmpegCodecConfig, DEFAULT_SAMPLE_RATE};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{copy_atomic, move_file, write_atomic};
pub use probe::{probe_media, MediaInfo};
