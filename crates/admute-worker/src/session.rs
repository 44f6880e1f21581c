//! Per-stream session: watcher, processor and manifest wired together.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, Instrument};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::StreamLogger;
use crate::manifest::ManifestWriter;
use crate::processor::{EmittedSegment, PipelineServices, SegmentProcessor, StreamPaths};
use crate::retry::FailureTracker;
use crate::watcher::SegmentWatcher;

/// A running stream.
///
/// Owns everything scoped to one stream key. Streams share no mutable state.
pub struct StreamSession {
    stream_key: String,
    paths: StreamPaths,
    logger: StreamLogger,
    manifest: Arc<ManifestWriter>,
    processor: Arc<SegmentProcessor>,
    watcher: SegmentWatcher,
    shutdown_tx: watch::Sender<bool>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl StreamSession {
    /// Prepare the stream's directories and manifest and start scanning.
    pub async fn start(
        config: &WorkerConfig,
        stream_key: &str,
        services: &PipelineServices,
    ) -> WorkerResult<Self> {
        let paths = StreamPaths::for_stream(config, stream_key);
        let logger = StreamLogger::new(stream_key, "session");

        for dir in [&paths.output_dir, &paths.scratch_dir] {
            fs::create_dir_all(dir).await.map_err(|e| {
                WorkerError::session_failed(format!(
                    "{}: cannot create {}: {}",
                    stream_key,
                    dir.display(),
                    e
                ))
            })?;
        }

        let manifest = Arc::new(ManifestWriter::new(
            &paths.output_manifest,
            config.manifest.clone(),
        ));
        manifest.initialize().await?;

        let processor = Arc::new(SegmentProcessor::new(
            stream_key,
            paths.clone(),
            services,
            config,
            Arc::clone(&manifest),
        ));
        let watcher = SegmentWatcher::new(config.watcher.clone(), Arc::clone(&processor));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scan_task = tokio::spawn(
            scan_loop(
                watcher.clone(),
                paths.input_dir.clone(),
                config.watcher.scan_interval,
                shutdown_rx,
                logger.clone(),
            )
            .instrument(logger.create_span()),
        );

        logger.log_start(&format!(
            "watching {} -> {}",
            paths.input_dir.display(),
            paths.output_dir.display()
        ));

        Ok(Self {
            stream_key: stream_key.to_string(),
            paths,
            logger,
            manifest,
            processor,
            watcher,
            shutdown_tx,
            scan_task: Mutex::new(Some(scan_task)),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn paths(&self) -> &StreamPaths {
        &self.paths
    }

    pub fn manifest(&self) -> &Arc<ManifestWriter> {
        &self.manifest
    }

    pub fn processor(&self) -> &Arc<SegmentProcessor> {
        &self.processor
    }

    pub fn watcher(&self) -> &SegmentWatcher {
        &self.watcher
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop the stream and emit its buffered segment.
    ///
    /// Returns what the final flush emitted. Later calls return nothing.
    pub async fn shutdown(&self) -> Vec<EmittedSegment> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }

        async {
            let _ = self.shutdown_tx.send(true);
            if let Some(task) = self.scan_task.lock().await.take() {
                let _ = task.await;
            }

            self.watcher.shutdown().await;
            let emitted = self.processor.flush().await;

            self.logger.log_completion(&format!(
                "flushed {} buffered segment(s)",
                emitted.len()
            ));
            emitted
        }
        .instrument(self.logger.create_span())
        .await
    }
}

async fn scan_loop(
    watcher: SegmentWatcher,
    input_dir: PathBuf,
    scan_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    logger: StreamLogger,
) {
    let mut ticker = tokio::time::interval(scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = FailureTracker::new(3);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Scan loop stopping");
                    break;
                }
            }
            _ = ticker.tick() => {
                match watcher.scan_once(&input_dir).await {
                    Ok(()) => failures.record_success(),
                    Err(e) => {
                        if failures.record_failure() {
                            logger.log_warning(&format!(
                                "cannot scan {}: {}",
                                input_dir.display(),
                                e
                            ));
                        }
                    }
                }
            }
        }
    }
}
