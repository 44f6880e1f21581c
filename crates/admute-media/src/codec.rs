//! Codec and mux operations on stream segments.
//!
//! The worker only ever talks to [`CodecService`]; [`FfmpegCodec`] is the
//! production implementation backed by the FFmpeg/FFprobe CLIs. Every
//! operation may fail, and callers treat failures as recoverable.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::debug;

use crate::audio::AudioBuffer;
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::move_file;
use crate::probe::probe_media;

/// Default sample rate for extracted audio (speech models expect 16kHz).
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Substrings FFmpeg prints when the input has nothing to map into `-vn` output.
const NO_AUDIO_MARKERS: &[&str] = &[
    "does not contain any stream",
    "matches no streams",
    "Output file is empty",
];

/// Audio extraction and remux operations on a segment file.
#[async_trait]
pub trait CodecService: Send + Sync {
    /// Decode the segment's audio track as mono PCM.
    ///
    /// `scratch_dir` is a stream-scoped directory for temporary files.
    async fn extract_audio(&self, segment: &Path, scratch_dir: &Path) -> MediaResult<AudioBuffer>;

    /// Write a copy of `original` to `output` with its audio replaced by `audio`.
    async fn remux(
        &self,
        original: &Path,
        audio: &AudioBuffer,
        output: &Path,
        scratch_dir: &Path,
    ) -> MediaResult<()>;

    /// Container duration of the segment, when known.
    async fn probe_duration(&self, segment: &Path) -> MediaResult<Option<f64>>;
}

/// Configuration for [`FfmpegCodec`].
#[derive(Debug, Clone)]
pub struct FfmpegCodecConfig {
    /// Sample rate of extracted audio
    pub sample_rate: u32,
    /// Per-invocation timeout for ffmpeg/ffprobe
    pub timeout_secs: u64,
    /// AAC bitrate of the remuxed audio track
    pub audio_bitrate: String,
}

impl Default for FfmpegCodecConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            timeout_secs: 60,
            audio_bitrate: "128k".to_string(),
        }
    }
}

/// [`CodecService`] backed by the FFmpeg CLI.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCodec {
    config: FfmpegCodecConfig,
}

impl FfmpegCodec {
    pub fn new(config: FfmpegCodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FfmpegCodecConfig {
        &self.config
    }

    fn runner(&self) -> FfmpegRunner {
        FfmpegRunner::new().with_timeout(self.config.timeout_secs)
    }

    fn scratch_path(scratch_dir: &Path, extension: &str) -> PathBuf {
        scratch_dir.join(format!("{}.{}", uuid::Uuid::new_v4().simple(), extension))
    }
}

#[async_trait]
impl CodecService for FfmpegCodec {
    async fn extract_audio(&self, segment: &Path, scratch_dir: &Path) -> MediaResult<AudioBuffer> {
        if !segment.exists() {
            return Err(MediaError::FileNotFound(segment.to_path_buf()));
        }
        fs::create_dir_all(scratch_dir).await?;

        let temp_audio = NamedTempFile::new_in(scratch_dir)?;
        let cmd = FfmpegCommand::new(segment, temp_audio.path())
            .no_video()
            .channels(1)
            .sample_rate(self.config.sample_rate)
            .format("f32le");

        if let Err(e) = self.runner().run(&cmd).await {
            return Err(match e {
                MediaError::FfmpegFailed {
                    stderr: Some(ref stderr),
                    ..
                } if NO_AUDIO_MARKERS.iter().any(|m| stderr.contains(m)) => {
                    MediaError::NoAudio(segment.to_path_buf())
                }
                other => other,
            });
        }

        let bytes = fs::read(temp_audio.path()).await?;
        if bytes.len() < 4 {
            return Err(MediaError::NoAudio(segment.to_path_buf()));
        }

        let audio = AudioBuffer::from_f32le_bytes(&bytes, self.config.sample_rate);
        debug!(
            segment = %segment.display(),
            samples = audio.len(),
            duration_secs = audio.duration_secs(),
            "Extracted segment audio"
        );
        Ok(audio)
    }

    async fn remux(
        &self,
        original: &Path,
        audio: &AudioBuffer,
        output: &Path,
        scratch_dir: &Path,
    ) -> MediaResult<()> {
        fs::create_dir_all(scratch_dir).await?;

        let info = probe_media(original, self.config.timeout_secs).await?;

        let raw_audio = NamedTempFile::new_in(scratch_dir)?;
        fs::write(raw_audio.path(), audio.to_f32le_bytes()).await?;

        let staged = Self::scratch_path(scratch_dir, "ts");
        let cmd = if info.has_video {
            FfmpegCommand::new(original, &staged)
                .add_input(raw_audio.path())
                .raw_pcm_input("f32le", audio.sample_rate(), 1)
                .video_codec("copy")
                .audio_codec("aac")
                .audio_bitrate(self.config.audio_bitrate.clone())
                .map("0:v:0")
                .map("1:a:0")
                .shortest()
                .output_args(["-avoid_negative_ts", "make_zero"])
                .format("mpegts")
        } else {
            FfmpegCommand::new(raw_audio.path(), &staged)
                .raw_pcm_input("f32le", audio.sample_rate(), 1)
                .audio_codec("aac")
                .audio_bitrate(self.config.audio_bitrate.clone())
                .format("mpegts")
        };

        if let Err(e) = self.runner().run(&cmd).await {
            let _ = fs::remove_file(&staged).await;
            return Err(e);
        }

        debug!(
            original = %original.display(),
            output = %output.display(),
            has_video = info.has_video,
            "Remuxed segment with replacement audio"
        );

        if let Err(e) = move_file(&staged, output).await {
            let _ = fs::remove_file(&staged).await;
            return Err(e);
        }
        Ok(())
    }

    async fn probe_duration(&self, segment: &Path) -> MediaResult<Option<f64>> {
        Ok(probe_media(segment, self.config.timeout_secs).await?.duration)
    }
}
