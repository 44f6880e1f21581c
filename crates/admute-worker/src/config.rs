//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use admute_media::{ToneConfig, DEFAULT_SAMPLE_RATE};
use admute_models::playlist::{DEFAULT_TARGET_DURATION, DEFAULT_WINDOW};

use crate::error::{WorkerError, WorkerResult};

/// Segment discovery and stabilization settings.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// How often a stream's input directory is scanned for new files
    pub scan_interval: Duration,
    /// Delay before the first size poll of a newly seen segment
    pub initial_delay: Duration,
    /// Interval between size polls
    pub poll_interval: Duration,
    /// Give up on a segment whose size has not settled after this long
    pub max_wait: Duration,
    /// A segment must grow past this size to count as written (one MPEG-TS packet)
    pub min_size_bytes: u64,
    /// Extension of segment files, without the dot
    pub extension: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(250),
            initial_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(200),
            max_wait: Duration::from_secs(10),
            min_size_bytes: 188,
            extension: "ts".to_string(),
        }
    }
}

/// Output manifest settings.
#[derive(Debug, Clone)]
pub struct ManifestConfig {
    /// Number of entries kept in the live window
    pub window: usize,
    /// File name of both the input and the output manifest
    pub file_name: String,
    /// Target duration written to a fresh manifest
    pub initial_target_duration: u64,
    /// Duration published when nothing better is known
    pub default_segment_duration: f64,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            file_name: "index.m3u8".to_string(),
            initial_target_duration: DEFAULT_TARGET_DURATION,
            default_segment_duration: 6.0,
        }
    }
}

/// Audio extraction, gating and tone settings.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub tone: ToneConfig,
    /// Audio shorter than this is not transcribed
    pub min_audio_secs: f64,
    /// Audio quieter than this RMS level is not transcribed
    pub silence_threshold_dbfs: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            tone: ToneConfig::default(),
            min_audio_secs: 0.5,
            silence_threshold_dbfs: -55.0,
        }
    }
}

/// Transcript fragmenting settings.
#[derive(Debug, Clone)]
pub struct FragmenterConfig {
    /// Minimum total duration of valid words for a transcript to count as speech
    pub min_speech_secs: f64,
    /// A pause at least this long closes a fragment
    pub min_pause_secs: f64,
    /// A fragment closes once it holds this many words
    pub max_words: usize,
    /// Words shorter than this are noise
    pub min_word_secs: f64,
    /// Fragments with a shorter sentence are dropped
    pub min_sentence_chars: usize,
}

impl Default for FragmenterConfig {
    fn default() -> Self {
        Self {
            min_speech_secs: 0.3,
            min_pause_secs: 0.15,
            max_words: 10,
            min_word_secs: 0.05,
            min_sentence_chars: 3,
        }
    }
}

/// Ad region detection settings.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Confidence a context-free positive needs to count on its own
    pub solo_confidence_threshold: f32,
    /// Regions closer than this are merged
    pub merge_gap_secs: f64,
    /// Characters of trailing text carried forward as context
    pub context_chars: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            solo_confidence_threshold: 0.9,
            merge_gap_secs: 0.5,
            context_chars: 50,
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory holding one input directory per stream key
    pub input_root: PathBuf,
    /// Directory receiving one output directory per stream key
    pub output_root: PathBuf,
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// How often the input root is polled for stream keys
    pub discovery_interval: Duration,
    /// Per-invocation timeout for ffmpeg/ffprobe
    pub ffmpeg_timeout_secs: u64,
    /// Prometheus listener address, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
    pub watcher: WatcherConfig,
    pub manifest: ManifestConfig,
    pub audio: AudioConfig,
    pub fragmenter: FragmenterConfig,
    pub detector: DetectorConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from("./hls_data/input"),
            output_root: PathBuf::from("./hls_data/output"),
            work_dir: PathBuf::from("/tmp/admute"),
            discovery_interval: Duration::from_secs(2),
            ffmpeg_timeout_secs: 60,
            metrics_addr: None,
            watcher: WatcherConfig::default(),
            manifest: ManifestConfig::default(),
            audio: AudioConfig::default(),
            fragmenter: FragmenterConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let watcher = WatcherConfig::default();
        let manifest = ManifestConfig::default();
        let audio = AudioConfig::default();
        let fragmenter = FragmenterConfig::default();
        let detector = DetectorConfig::default();

        Self {
            input_root: std::env::var("ADMUTE_INPUT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.input_root),
            output_root: std::env::var("ADMUTE_OUTPUT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_root),
            work_dir: std::env::var("ADMUTE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            discovery_interval: env_millis(
                "ADMUTE_DISCOVERY_INTERVAL_MS",
                defaults.discovery_interval,
            ),
            ffmpeg_timeout_secs: env_parse(
                "ADMUTE_FFMPEG_TIMEOUT_SECS",
                defaults.ffmpeg_timeout_secs,
            ),
            metrics_addr: std::env::var("ADMUTE_METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
            watcher: WatcherConfig {
                scan_interval: env_millis("ADMUTE_SCAN_INTERVAL_MS", watcher.scan_interval),
                initial_delay: env_millis("ADMUTE_STABILIZE_DELAY_MS", watcher.initial_delay),
                poll_interval: env_millis("ADMUTE_STABILIZE_POLL_MS", watcher.poll_interval),
                max_wait: env_millis("ADMUTE_STABILIZE_MAX_WAIT_MS", watcher.max_wait),
                min_size_bytes: env_parse("ADMUTE_MIN_SEGMENT_BYTES", watcher.min_size_bytes),
                extension: std::env::var("ADMUTE_SEGMENT_EXTENSION")
                    .map(|s| s.trim_start_matches('.').to_string())
                    .unwrap_or(watcher.extension),
            },
            manifest: ManifestConfig {
                window: env_parse("ADMUTE_PLAYLIST_WINDOW", manifest.window),
                file_name: std::env::var("ADMUTE_PLAYLIST_NAME").unwrap_or(manifest.file_name),
                initial_target_duration: env_parse(
                    "ADMUTE_TARGET_DURATION",
                    manifest.initial_target_duration,
                ),
                default_segment_duration: env_parse(
                    "ADMUTE_DEFAULT_SEGMENT_DURATION",
                    manifest.default_segment_duration,
                ),
            },
            audio: AudioConfig {
                sample_rate: env_parse("ADMUTE_SAMPLE_RATE", audio.sample_rate),
                tone: ToneConfig {
                    frequency_hz: env_parse("ADMUTE_TONE_FREQUENCY", audio.tone.frequency_hz),
                    volume: env_parse("ADMUTE_TONE_VOLUME", audio.tone.volume),
                },
                min_audio_secs: env_parse("ADMUTE_MIN_AUDIO_SECS", audio.min_audio_secs),
                silence_threshold_dbfs: env_parse(
                    "ADMUTE_SILENCE_DBFS",
                    audio.silence_threshold_dbfs,
                ),
            },
            fragmenter: FragmenterConfig {
                min_speech_secs: env_parse("ADMUTE_MIN_SPEECH_SECS", fragmenter.min_speech_secs),
                min_pause_secs: env_parse("ADMUTE_MIN_PAUSE_SECS", fragmenter.min_pause_secs),
                max_words: env_parse("ADMUTE_MAX_FRAGMENT_WORDS", fragmenter.max_words),
                ..fragmenter
            },
            detector: DetectorConfig {
                solo_confidence_threshold: env_parse(
                    "ADMUTE_SOLO_THRESHOLD",
                    detector.solo_confidence_threshold,
                ),
                merge_gap_secs: env_parse("ADMUTE_MERGE_GAP_SECS", detector.merge_gap_secs),
                context_chars: env_parse("ADMUTE_CONTEXT_CHARS", detector.context_chars),
            },
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.manifest.window == 0 {
            return Err(WorkerError::config_error("playlist window must be at least 1"));
        }
        if self.manifest.file_name.is_empty() {
            return Err(WorkerError::config_error("playlist name must not be empty"));
        }
        if self.audio.sample_rate == 0 {
            return Err(WorkerError::config_error("sample rate must be positive"));
        }
        if !(0.0..=1.0).contains(&self.audio.tone.volume) {
            return Err(WorkerError::config_error(format!(
                "tone volume {} is outside 0.0-1.0",
                self.audio.tone.volume
            )));
        }
        if self.fragmenter.max_words == 0 {
            return Err(WorkerError::config_error("max fragment words must be at least 1"));
        }
        if !(self.manifest.default_segment_duration > 0.0) {
            return Err(WorkerError::config_error(
                "default segment duration must be positive",
            ));
        }
        if self.watcher.poll_interval.is_zero() || self.watcher.scan_interval.is_zero() {
            return Err(WorkerError::config_error("poll intervals must be non-zero"));
        }
        if self.watcher.extension.is_empty() {
            return Err(WorkerError::config_error("segment extension must not be empty"));
        }
        Ok(())
    }

    /// Input directory of a stream.
    pub fn stream_input_dir(&self, stream_key: &str) -> PathBuf {
        self.input_root.join(stream_key)
    }

    /// Output directory of a stream.
    pub fn stream_output_dir(&self, stream_key: &str) -> PathBuf {
        self.output_root.join(stream_key)
    }

    /// Scratch directory of a stream.
    pub fn stream_work_dir(&self, stream_key: &str) -> PathBuf {
        self.work_dir.join(stream_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.manifest.window, 6);
        assert_eq!(config.manifest.file_name, "index.m3u8");
        assert_eq!(config.watcher.min_size_bytes, 188);
        assert_eq!(config.audio.sample_rate, 16000);
        assert!((config.detector.solo_confidence_threshold - 0.9).abs() < f32::EPSILON);
        assert!(config.metrics_addr.is_none());
        assert_ok!(config.validate());
    }

    #[test]
    fn test_validate_rejects_empty_window() {
        let mut config = WorkerConfig::default();
        config.manifest.window = 0;
        assert!(matches!(
            config.validate(),
            Err(WorkerError::ConfigError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_tone_volume() {
        let mut config = WorkerConfig::default();
        config.audio.tone.volume = 1.5;
        assert_err!(config.validate());
    }

    #[test]
    fn test_stream_dirs_are_namespaced() {
        let config = WorkerConfig::default();
        assert_eq!(
            config.stream_output_dir("cam1"),
            PathBuf::from("./hls_data/output/cam1")
        );
        assert_eq!(config.stream_work_dir("cam1"), PathBuf::from("/tmp/admute/cam1"));
    }
}
