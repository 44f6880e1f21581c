//! Rolling live manifest maintenance.
//!
//! One [`ManifestWriter`] per stream owns the output manifest. Every publish
//! runs under the writer's lock: reload the file, apply the windowed update,
//! and atomically replace the file so players never see a partial manifest.

use std::path::{Path, PathBuf};

use admute_media::write_atomic;
use admute_models::{parse_segment_index, ManifestEntry, MediaPlaylist};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::ManifestConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::retry::{retry_async, RetryConfig, RetryResult};

/// Serialized writer of one stream's output manifest.
pub struct ManifestWriter {
    path: PathBuf,
    config: ManifestConfig,
    retry: RetryConfig,
    state: Mutex<WriterState>,
}

struct WriterState {
    playlist: MediaPlaylist,
    /// The last write failed, so the file lags behind `playlist`.
    unwritten: bool,
}

impl ManifestWriter {
    pub fn new(path: impl Into<PathBuf>, config: ManifestConfig) -> Self {
        let playlist = MediaPlaylist::with_target_duration(config.initial_target_duration);
        Self {
            path: path.into(),
            config,
            retry: RetryConfig::new("manifest_write").with_max_retries(3),
            state: Mutex::new(WriterState {
                playlist,
                unwritten: false,
            }),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reuse an existing manifest, or write an empty one.
    pub async fn initialize(&self) -> WorkerResult<()> {
        let mut state = self.state.lock().await;

        if let Some(existing) = self.load().await {
            debug!(
                path = %self.path.display(),
                entries = existing.entries.len(),
                media_sequence = existing.media_sequence,
                "Reusing existing manifest"
            );
            state.playlist = existing;
            state.unwritten = false;
            return Ok(());
        }

        let result = self.write(&state.playlist).await;
        state.unwritten = result.is_err();
        result
    }

    /// Add (or update) an entry and rewrite the manifest.
    ///
    /// Returns `false` without touching the manifest when `uri` is a new
    /// segment older than the newest listed one; players only accept
    /// entries appended in index order.
    ///
    /// On a write failure the entry stays in memory and is written by the
    /// next successful publish.
    pub async fn publish(&self, uri: &str, duration: f64) -> WorkerResult<bool> {
        let mut state = self.state.lock().await;

        if state.unwritten {
            // The file is stale; reloading it would lose unwritten entries
            debug!(path = %self.path.display(), "Retrying unwritten manifest state");
        } else if let Some(on_disk) = self.load().await {
            // Keep counters monotonic even if the file was rewritten externally
            let media_sequence = state.playlist.media_sequence.max(on_disk.media_sequence);
            let target_duration = state.playlist.target_duration.max(on_disk.target_duration);
            state.playlist = on_disk;
            state.playlist.media_sequence = media_sequence;
            state.playlist.target_duration = target_duration;
        }

        if state.playlist.duration_of(uri).is_none() {
            if let (Some(index), Some(newest)) =
                (parse_segment_index(uri), state.playlist.newest_index())
            {
                if index <= newest {
                    warn!(uri, newest_index = newest, "Segment older than manifest head, not listing");
                    return Ok(false);
                }
            }
        }

        let dropped = state
            .playlist
            .publish(ManifestEntry::new(uri, duration), self.config.window);
        debug!(
            uri,
            duration,
            dropped,
            media_sequence = state.playlist.media_sequence,
            target_duration = state.playlist.target_duration,
            "Publishing manifest entry"
        );

        let result = self.write(&state.playlist).await;
        state.unwritten = result.is_err();
        result.map(|()| true)
    }

    /// Current in-memory manifest.
    pub async fn snapshot(&self) -> MediaPlaylist {
        self.state.lock().await.playlist.clone()
    }

    async fn load(&self) -> Option<MediaPlaylist> {
        let contents = fs::read_to_string(&self.path).await.ok()?;
        match MediaPlaylist::parse(&contents) {
            Ok(playlist) => Some(playlist),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable manifest");
                None
            }
        }
    }

    async fn write(&self, playlist: &MediaPlaylist) -> WorkerResult<()> {
        let body = playlist.render();
        match retry_async(&self.retry, || write_atomic(&self.path, body.as_bytes())).await {
            RetryResult::Success(()) => Ok(()),
            RetryResult::Failed { error, attempts } => {
                warn!(
                    path = %self.path.display(),
                    attempts,
                    error = %error,
                    "Manifest write failed"
                );
                Err(WorkerError::manifest_failed(format!(
                    "{}: {}",
                    self.path.display(),
                    error
                )))
            }
        }
    }
}

/// Duration listed for `uri` in a stream's input manifest, if any.
pub async fn input_manifest_duration(manifest_path: &Path, uri: &str) -> Option<f64> {
    let contents = fs::read_to_string(manifest_path).await.ok()?;
    MediaPlaylist::parse(&contents)
        .ok()?
        .duration_of(uri)
        .filter(|d| d.is_finite() && *d > 0.0)
}
