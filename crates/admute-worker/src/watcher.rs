//! Segment discovery and stabilization.
//!
//! The watcher scans a stream's input directory, turns new or changed
//! segment files into notifications, and runs one debounced stabilization
//! task per segment index. A task waits until the file size stops changing
//! and then hands the file to the [`SegmentProcessor`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Instant, SystemTime};

use admute_models::{file_name_of, has_extension, parse_segment_index};
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::processor::SegmentProcessor;

/// Result of waiting for a file to be fully written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stabilization {
    /// Size unchanged across two polls and strictly above the floor
    Stable { size: u64 },
    /// Still changing (or missing) when the maximum wait ran out
    Abandoned { last_size: Option<u64> },
}

/// Poll `path` until its size settles or `config.max_wait` elapses.
pub async fn wait_for_stable(path: &Path, config: &WatcherConfig) -> Stabilization {
    let deadline = Instant::now() + config.max_wait;
    let mut previous: Option<u64> = None;

    loop {
        let size = fs::metadata(path).await.ok().map(|m| m.len());

        if let (Some(size), Some(prev)) = (size, previous) {
            if size == prev && size > config.min_size_bytes {
                return Stabilization::Stable { size };
            }
        }
        previous = size;

        if Instant::now() >= deadline {
            return Stabilization::Abandoned { last_size: size };
        }
        tokio::time::sleep(config.poll_interval).await;
    }
}

struct PendingTimer {
    generation: u64,
    /// Set once the task has handed the segment to the processor; from then
    /// on it is waited for, not cancelled.
    fired: bool,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

struct WatcherInner {
    config: WatcherConfig,
    processor: Arc<SegmentProcessor>,
    timers: Mutex<HashMap<u64, PendingTimer>>,
    processed: Mutex<HashSet<u64>>,
    seen: Mutex<HashMap<PathBuf, FileStamp>>,
    next_generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Debounced stabilization front end of one stream.
#[derive(Clone)]
pub struct SegmentWatcher {
    inner: Arc<WatcherInner>,
}

impl SegmentWatcher {
    pub fn new(config: WatcherConfig, processor: Arc<SegmentProcessor>) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                config,
                processor,
                timers: Mutex::new(HashMap::new()),
                processed: Mutex::new(HashSet::new()),
                seen: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Schedule stabilization of `path` as segment `index`.
    ///
    /// A pending task for the same index is cancelled and replaced. Indices
    /// already processed, or currently being processed, are ignored.
    pub fn on_segment_file_appeared(&self, path: PathBuf, index: u64) {
        if lock(&self.inner.processed).contains(&index) {
            debug!(segment_index = index, "Segment already processed, ignoring");
            return;
        }

        let mut timers = lock(&self.inner.timers);
        if let Some(existing) = timers.get(&index) {
            if existing.fired {
                debug!(segment_index = index, "Segment is being processed, ignoring");
                return;
            }
        }
        if let Some(replaced) = timers.remove(&index) {
            replaced.handle.abort();
            debug!(segment_index = index, "Rescheduled segment stabilization");
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.stabilize_and_submit(path, index, generation).await;
        });
        timers.insert(
            index,
            PendingTimer {
                generation,
                fired: false,
                handle,
            },
        );
    }

    /// Scan the input directory once and notify new or changed segments.
    pub async fn scan_once(&self, input_dir: &Path) -> std::io::Result<()> {
        let mut entries = fs::read_dir(input_dir).await?;
        let mut present = HashSet::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            present.insert(path.clone());

            let stamp = FileStamp {
                modified: metadata.modified().ok(),
                len: metadata.len(),
            };
            let changed = lock(&self.inner.seen).insert(path.clone(), stamp) != Some(stamp);
            if !changed {
                continue;
            }

            if has_extension(&path, &self.inner.config.extension) {
                let index = file_name_of(&path)
                    .and_then(|name| parse_segment_index(&name))
                    .unwrap_or_else(|| lock(&self.inner.processed).len() as u64);
                self.on_segment_file_appeared(path, index);
            } else if has_extension(&path, "m3u8") {
                debug!(path = %path.display(), "Input manifest changed");
            }
        }

        lock(&self.inner.seen).retain(|path, _| present.contains(path));
        Ok(())
    }

    /// Number of stabilization tasks not yet finished.
    pub fn pending(&self) -> usize {
        lock(&self.inner.timers).len()
    }

    pub fn is_processed(&self, index: u64) -> bool {
        lock(&self.inner.processed).contains(&index)
    }

    /// Cancel pending stabilizations and wait for in-flight submissions.
    pub async fn shutdown(&self) {
        let drained: Vec<PendingTimer> = lock(&self.inner.timers)
            .drain()
            .map(|(_, timer)| timer)
            .collect();

        let mut cancelled = 0;
        for timer in drained {
            if timer.fired {
                let _ = timer.handle.await;
            } else {
                timer.handle.abort();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(cancelled, "Cancelled pending segment stabilizations");
        }
    }
}

impl WatcherInner {
    async fn stabilize_and_submit(self: Arc<Self>, path: PathBuf, index: u64, generation: u64) {
        tokio::time::sleep(self.config.initial_delay).await;

        match wait_for_stable(&path, &self.config).await {
            Stabilization::Stable { size } => {
                if !self.begin_processing(index, generation) {
                    return;
                }
                debug!(segment_index = index, size, "Segment stable");
                self.processor.submit(&path, index).await;
            }
            Stabilization::Abandoned { last_size } => {
                warn!(
                    segment_index = index,
                    path = %path.display(),
                    last_size = ?last_size,
                    "Segment never stabilized, skipping"
                );
            }
        }

        let mut timers = lock(&self.timers);
        if timers.get(&index).map(|t| t.generation) == Some(generation) {
            timers.remove(&index);
        }
    }

    /// Claim `index` for processing. Fails if this task was superseded or
    /// the index was already processed.
    fn begin_processing(&self, index: u64, generation: u64) -> bool {
        let mut timers = lock(&self.timers);
        let Some(timer) = timers.get_mut(&index) else {
            return false;
        };
        if timer.generation != generation {
            return false;
        }
        if !lock(&self.processed).insert(index) {
            debug!(segment_index = index, "Segment already processed");
            timers.remove(&index);
            return false;
        }
        timer.fired = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_config() -> WatcherConfig {
        WatcherConfig {
            scan_interval: Duration::from_millis(10),
            initial_delay: Duration::from_millis(5),
            poll_interval: Duration::from_millis(20),
            max_wait: Duration::from_millis(200),
            min_size_bytes: 4,
            extension: "ts".to_string(),
        }
    }

    #[tokio::test]
    async fn test_stable_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("segment0.ts");
        fs::write(&path, vec![1u8; 64]).await.unwrap();

        let result = wait_for_stable(&path, &fast_config()).await;
        assert_eq!(result, Stabilization::Stable { size: 64 });
    }

    #[tokio::test]
    async fn test_file_below_floor_is_abandoned() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("segment0.ts");
        fs::write(&path, vec![1u8; 2]).await.unwrap();

        let result = wait_for_stable(&path, &fast_config()).await;
        assert_eq!(result, Stabilization::Abandoned { last_size: Some(2) });
    }

    #[tokio::test]
    async fn test_file_at_floor_is_abandoned() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("segment0.ts");
        fs::write(&path, vec![1u8; 4]).await.unwrap();

        let result = wait_for_stable(&path, &fast_config()).await;
        assert_eq!(result, Stabilization::Abandoned { last_size: Some(4) });
    }

    #[tokio::test]
    async fn test_missing_file_is_abandoned() {
        let dir = TempDir::new().unwrap();
        let result = wait_for_stable(&dir.path().join("nope.ts"), &fast_config()).await;
        assert_eq!(result, Stabilization::Abandoned { last_size: None });
    }

    #[tokio::test]
    async fn test_growing_file_is_abandoned() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("segment0.ts");
        fs::write(&path, vec![1u8; 8]).await.unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for i in 0..60 {
                fs::write(&writer_path, vec![1u8; 16 + i * 8]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let result = wait_for_stable(&path, &fast_config()).await;
        assert!(matches!(result, Stabilization::Abandoned { .. }));
        writer.abort();
    }
}
