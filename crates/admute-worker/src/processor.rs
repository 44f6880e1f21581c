//! Segment processor: the per-stream censoring state machine.
//!
//! Segments are emitted one step behind ingestion. Segment N is held in a
//! lag buffer (with its interior ads already toned) until N+1 arrives, so
//! that an ad crossing the N/N+1 join can be found by transcribing the two
//! segments' audio back to back. Only then is N remuxed, written to the
//! output directory and published to the manifest.
//!
//! Every stage that talks to an external service yields a [`Stage`]. A
//! degraded extraction or remux makes the segment pass through raw; a
//! degraded transcription means "no ads found". A segment is never dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use admute_media::{copy_atomic, splice_regions, AudioBuffer, CodecService};
use admute_ml_client::{Classifier, Transcriber};
use admute_models::{file_name_of, merge_regions, AdRegion, TranscriptFragment, TranscriptWord};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{AudioConfig, WorkerConfig};
use crate::detector::AdDetector;
use crate::error::WorkerResult;
use crate::fragmenter::Fragmenter;
use crate::manifest::{input_manifest_duration, ManifestWriter};
use crate::metrics;

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage<T> {
    Ready(T),
    /// The stage could not produce its output; the reason is for logs.
    Degraded(String),
}

impl<T> Stage<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Stage::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Stage::Ready(value) => Some(value),
            Stage::Degraded(_) => None,
        }
    }
}

/// Lifecycle of a stream's processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorPhase {
    AwaitingFirstSegment,
    SteadyState,
    Flushed,
}

/// A segment written to the output directory and published.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedSegment {
    pub index: u64,
    pub uri: String,
    pub duration: f64,
    /// Regions replaced with tone (empty for passthrough)
    pub regions: Vec<AdRegion>,
    /// Whether the original bytes were copied unchanged
    pub passthrough: bool,
}

/// External collaborators of the pipeline.
#[derive(Clone)]
pub struct PipelineServices {
    pub codec: Arc<dyn CodecService>,
    pub transcriber: Arc<dyn Transcriber>,
    pub classifier: Arc<dyn Classifier>,
}

/// Directories a stream's processor works in.
#[derive(Debug, Clone)]
pub struct StreamPaths {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub input_manifest: PathBuf,
    pub output_manifest: PathBuf,
}

impl StreamPaths {
    pub fn for_stream(config: &WorkerConfig, stream_key: &str) -> Self {
        let input_dir = config.stream_input_dir(stream_key);
        let output_dir = config.stream_output_dir(stream_key);
        Self {
            input_manifest: input_dir.join(&config.manifest.file_name),
            output_manifest: output_dir.join(&config.manifest.file_name),
            scratch_dir: config.stream_work_dir(stream_key),
            input_dir,
            output_dir,
        }
    }
}

/// The ingested-but-not-emitted segment.
struct LagBuffer {
    index: u64,
    file_name: String,
    /// Retained copy of the source container (or the source itself)
    source: PathBuf,
    retained: bool,
    raw_audio: AudioBuffer,
    /// Audio with all regions found so far toned
    audio: AudioBuffer,
    regions: Vec<AdRegion>,
    fragments: Vec<TranscriptFragment>,
    /// Detector context from before this segment
    context_before: String,
}

struct ProcessorState {
    phase: ProcessorPhase,
    lag: Option<LagBuffer>,
    context: String,
    last_index: Option<u64>,
}

struct Analysis {
    regions: Vec<AdRegion>,
    fragments: Vec<TranscriptFragment>,
    context: String,
}

#[derive(Default)]
struct BoundarySplit {
    /// Regions at the end of the buffered segment
    tail: Vec<AdRegion>,
    /// Regions at the start of the current segment, re-based to 0
    head: Vec<AdRegion>,
}

/// Per-stream segment processor.
///
/// All mutation happens under one lock, so at most one segment is in the
/// pipeline per stream at any time.
pub struct SegmentProcessor {
    stream_key: String,
    paths: StreamPaths,
    codec: Arc<dyn CodecService>,
    transcriber: Arc<dyn Transcriber>,
    detector: AdDetector,
    fragmenter: Fragmenter,
    audio: AudioConfig,
    merge_gap_secs: f64,
    default_duration: f64,
    manifest: Arc<ManifestWriter>,
    state: Mutex<ProcessorState>,
}

impl SegmentProcessor {
    pub fn new(
        stream_key: impl Into<String>,
        paths: StreamPaths,
        services: &PipelineServices,
        config: &WorkerConfig,
        manifest: Arc<ManifestWriter>,
    ) -> Self {
        Self {
            stream_key: stream_key.into(),
            paths,
            codec: Arc::clone(&services.codec),
            transcriber: Arc::clone(&services.transcriber),
            detector: AdDetector::new(Arc::clone(&services.classifier), config.detector.clone()),
            fragmenter: Fragmenter::new(config.fragmenter.clone()),
            audio: config.audio.clone(),
            merge_gap_secs: config.detector.merge_gap_secs,
            default_duration: config.manifest.default_segment_duration,
            manifest,
            state: Mutex::new(ProcessorState {
                phase: ProcessorPhase::AwaitingFirstSegment,
                lag: None,
                context: String::new(),
                last_index: None,
            }),
        }
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn paths(&self) -> &StreamPaths {
        &self.paths
    }

    pub async fn phase(&self) -> ProcessorPhase {
        self.state.lock().await.phase
    }

    /// Index of the segment held in the lag buffer, if any.
    pub async fn buffered_index(&self) -> Option<u64> {
        self.state.lock().await.lag.as_ref().map(|lag| lag.index)
    }

    /// Ingest a stable segment.
    ///
    /// Returns the segments emitted by this call: usually the previously
    /// buffered one, sometimes the current one as well (passthrough), or
    /// nothing for the first segment of a stream.
    ///
    /// A segment at or below the last accepted index is copied to the output
    /// raw, but the manifest only lists it when nothing newer is listed yet.
    pub async fn submit(&self, path: &Path, index: u64) -> Vec<EmittedSegment> {
        let started = Instant::now();
        let mut state = self.state.lock().await;

        let Some(file_name) = file_name_of(path) else {
            error!(path = %path.display(), "Segment path has no file name, skipping");
            return Vec::new();
        };

        if state.phase == ProcessorPhase::Flushed {
            warn!(segment_index = index, "Segment arrived after flush, passing through");
            return self
                .emit_raw(path, &file_name, index, None, "after_flush")
                .await
                .into_iter()
                .collect();
        }

        if let Some(last) = state.last_index {
            if index <= last {
                warn!(
                    segment_index = index,
                    last_index = last,
                    "Out-of-order segment, passing through"
                );
                return self
                    .emit_raw(path, &file_name, index, None, "late_segment")
                    .await
                    .into_iter()
                    .collect();
            }
        }
        state.last_index = Some(index);

        let mut emitted = Vec::new();
        match self.extract(path).await {
            Stage::Ready(audio) => {
                match self.advance(&mut state, path, &file_name, index, &audio).await {
                    Ok(prior) => emitted.extend(prior),
                    Err(e) => {
                        error!(
                            segment_index = index,
                            error = %e,
                            "Segment pipeline failed, passing through"
                        );
                        emitted.extend(self.flush_lag(&mut state).await);
                        emitted.extend(
                            self.emit_raw(path, &file_name, index, Some(&audio), "pipeline_error")
                                .await,
                        );
                        state.phase = ProcessorPhase::AwaitingFirstSegment;
                    }
                }
            }
            Stage::Degraded(reason) => {
                warn!(segment_index = index, reason = %reason, "No usable audio, passing through");
                emitted.extend(self.flush_lag(&mut state).await);
                emitted.extend(
                    self.emit_raw(path, &file_name, index, None, "no_audio")
                        .await,
                );
                state.phase = ProcessorPhase::AwaitingFirstSegment;
            }
        }

        metrics::record_processing_duration(&self.stream_key, started.elapsed().as_secs_f64());
        emitted
    }

    /// Emit the buffered segment, if any, and stop accepting segments.
    ///
    /// Calling it again is a no-op.
    pub async fn flush(&self) -> Vec<EmittedSegment> {
        let mut state = self.state.lock().await;
        let emitted = self.flush_lag(&mut state).await;
        if state.phase != ProcessorPhase::Flushed {
            debug!(emitted = emitted.len(), "Processor flushed");
        }
        state.phase = ProcessorPhase::Flushed;
        emitted
    }

    /// Run detection on the current segment, finalize the buffered one and
    /// buffer the current one. Fallible steps all run before any state is
    /// committed.
    async fn advance(
        &self,
        state: &mut ProcessorState,
        path: &Path,
        file_name: &str,
        index: u64,
        audio: &AudioBuffer,
    ) -> WorkerResult<Vec<EmittedSegment>> {
        let context_before = state.context.clone();
        let interior = self.analyze(audio, &context_before).await;

        let boundary = match state.lag.as_ref() {
            Some(lag) => Some(self.analyze_boundary(lag, audio).await),
            None => None,
        };

        let mut regions = interior.regions.clone();
        if let Some(split) = &boundary {
            regions.extend(split.head.iter().copied());
        }
        let regions = merge_regions(&regions, self.merge_gap_secs);
        let spliced = splice_regions(audio, &regions, &self.audio.tone)?;

        let prior_audio = match (state.lag.as_ref(), &boundary) {
            (Some(lag), Some(split)) if !split.tail.is_empty() => {
                Some(splice_regions(&lag.audio, &split.tail, &self.audio.tone)?)
            }
            _ => None,
        };

        let mut emitted = Vec::new();
        if let Some(mut lag) = state.lag.take() {
            if let (Some(prior_audio), Some(split)) = (prior_audio, &boundary) {
                info!(
                    segment_index = lag.index,
                    next_index = index,
                    regions = split.tail.len(),
                    "Boundary ad crosses into next segment"
                );
                lag.audio = prior_audio;
                let mut all = lag.regions.clone();
                all.extend(split.tail.iter().copied());
                lag.regions = merge_regions(&all, self.merge_gap_secs);
            }
            emitted.extend(self.emit_processed(lag).await);
        }

        let (source, retained) = self.retain_source(path, file_name).await;
        debug!(
            segment_index = index,
            fragments = interior.fragments.len(),
            regions = regions.len(),
            "Segment buffered"
        );
        state.lag = Some(LagBuffer {
            index,
            file_name: file_name.to_string(),
            source,
            retained,
            raw_audio: audio.clone(),
            audio: spliced,
            regions,
            fragments: interior.fragments,
            context_before,
        });
        state.context = interior.context;
        state.phase = ProcessorPhase::SteadyState;

        Ok(emitted)
    }

    async fn flush_lag(&self, state: &mut ProcessorState) -> Vec<EmittedSegment> {
        match state.lag.take() {
            Some(lag) => self.emit_processed(lag).await.into_iter().collect(),
            None => Vec::new(),
        }
    }

    async fn extract(&self, path: &Path) -> Stage<AudioBuffer> {
        match self.codec.extract_audio(path, &self.paths.scratch_dir).await {
            Ok(audio) if audio.is_empty() => Stage::Degraded("empty audio track".to_string()),
            Ok(audio) => Stage::Ready(audio),
            Err(e) if e.is_no_audio() => Stage::Degraded("no audio stream".to_string()),
            Err(e) => Stage::Degraded(format!("audio extraction failed: {}", e)),
        }
    }

    /// Transcribe audio that passes the quality gate.
    async fn transcribe(&self, audio: &AudioBuffer) -> Stage<Vec<TranscriptWord>> {
        if audio.duration_secs() < self.audio.min_audio_secs {
            return Stage::Degraded(format!("audio too short ({:.2}s)", audio.duration_secs()));
        }
        let level = audio.rms_dbfs();
        if level < self.audio.silence_threshold_dbfs {
            return Stage::Degraded(format!("audio too quiet ({:.1} dBFS)", level));
        }

        match self
            .transcriber
            .transcribe(audio.samples(), audio.sample_rate())
            .await
        {
            Ok(words) => Stage::Ready(words),
            Err(e) => {
                warn!(error = %e, "Transcription failed, assuming no ads");
                Stage::Degraded(format!("transcription failed: {}", e))
            }
        }
    }

    /// Interior detection for one segment.
    async fn analyze(&self, audio: &AudioBuffer, context: &str) -> Analysis {
        let nothing = || Analysis {
            regions: Vec::new(),
            fragments: Vec::new(),
            context: context.to_string(),
        };

        let words = match self.transcribe(audio).await {
            Stage::Ready(words) => words,
            Stage::Degraded(reason) => {
                debug!(reason = %reason, "Skipping detection");
                return nothing();
            }
        };
        if !self.fragmenter.has_enough_speech(&words) {
            debug!(words = words.len(), "Not enough speech for detection");
            return nothing();
        }

        let fragments = self.fragmenter.fragment(&words);
        let detection = self.detector.detect(&fragments, context).await;
        Analysis {
            regions: detection.regions,
            fragments,
            context: detection.context,
        }
    }

    /// Find ads crossing the join between the buffered segment and `current`.
    async fn analyze_boundary(&self, lag: &LagBuffer, current: &AudioBuffer) -> BoundarySplit {
        let boundary = lag.raw_audio.duration_secs();
        let combined = match lag.raw_audio.concat(current) {
            Ok(combined) => combined,
            Err(e) => {
                warn!(error = %e, "Cannot join segment audio, skipping boundary analysis");
                return BoundarySplit::default();
            }
        };

        let words = match self.transcribe(&combined).await {
            Stage::Ready(words) if self.fragmenter.has_enough_speech(&words) => words,
            _ => return BoundarySplit::default(),
        };
        let fragments = self.fragmenter.fragment(&words);

        let Some(position) = fragments.iter().position(|f| f.straddles(boundary)) else {
            return BoundarySplit::default();
        };
        let context = fragments[..position]
            .iter()
            .fold(lag.context_before.clone(), |context, f| {
                self.detector.extend_context(&context, &f.sentence)
            });

        let detection = self
            .detector
            .detect(&fragments[position..=position], &context)
            .await;

        let current_len = current.duration_secs();
        let mut split = BoundarySplit::default();
        for region in detection.regions {
            split.tail.extend(region.clamp_to(boundary));
            split
                .head
                .extend(region.shifted(-boundary).clamp_to(current_len));
        }
        split
    }

    /// Keep a private copy of the source so it survives the input window
    /// rolling past it while buffered.
    async fn retain_source(&self, path: &Path, file_name: &str) -> (PathBuf, bool) {
        let retained = self.paths.scratch_dir.join(format!("lag-{}", file_name));
        match copy_atomic(path, &retained).await {
            Ok(_) => (retained, true),
            Err(e) => {
                warn!(error = %e, "Could not retain segment source, using original path");
                (path.to_path_buf(), false)
            }
        }
    }

    async fn emit_processed(&self, lag: LagBuffer) -> Option<EmittedSegment> {
        let output = self.paths.output_dir.join(&lag.file_name);

        let remuxed = match self
            .codec
            .remux(&lag.source, &lag.audio, &output, &self.paths.scratch_dir)
            .await
        {
            Ok(()) => Stage::Ready(()),
            Err(e) => Stage::Degraded(e.to_string()),
        };

        let emitted = match remuxed {
            Stage::Ready(()) => {
                let duration = self
                    .segment_duration(&lag.file_name, &lag.source, Some(&lag.audio))
                    .await;
                self.publish(&lag.file_name, duration).await;
                metrics::record_segment_processed(&self.stream_key);
                metrics::record_ad_regions(&self.stream_key, lag.regions.len());
                if !lag.regions.is_empty() {
                    info!(
                        segment_index = lag.index,
                        regions = ?lag.regions,
                        fragments = lag.fragments.len(),
                        "Emitted censored segment"
                    );
                }
                Some(EmittedSegment {
                    index: lag.index,
                    uri: lag.file_name.clone(),
                    duration,
                    regions: lag.regions.clone(),
                    passthrough: false,
                })
            }
            Stage::Degraded(reason) => {
                warn!(segment_index = lag.index, reason = %reason, "Remux failed, passing through");
                self.emit_raw(
                    &lag.source,
                    &lag.file_name,
                    lag.index,
                    Some(&lag.raw_audio),
                    "remux_failed",
                )
                .await
            }
        };

        if lag.retained {
            if let Err(e) = fs::remove_file(&lag.source).await {
                debug!(path = %lag.source.display(), error = %e, "Could not remove retained source");
            }
        }
        emitted
    }

    /// Copy the segment unchanged to the output and publish it.
    async fn emit_raw(
        &self,
        source: &Path,
        file_name: &str,
        index: u64,
        audio: Option<&AudioBuffer>,
        reason: &str,
    ) -> Option<EmittedSegment> {
        let output = self.paths.output_dir.join(file_name);
        if let Err(e) = copy_atomic(source, &output).await {
            error!(
                segment_index = index,
                source = %source.display(),
                error = %e,
                "Could not copy segment to output"
            );
            return None;
        }

        metrics::record_segment_passthrough(&self.stream_key, reason);
        let duration = self.segment_duration(file_name, source, audio).await;
        self.publish(file_name, duration).await;

        Some(EmittedSegment {
            index,
            uri: file_name.to_string(),
            duration,
            regions: Vec::new(),
            passthrough: true,
        })
    }

    async fn publish(&self, uri: &str, duration: f64) {
        if let Err(e) = self.manifest.publish(uri, duration).await {
            error!(uri, error = %e, "Manifest publish failed, entry kept for next publish");
        }
    }

    /// Best-known duration: input manifest, decoded audio, probe, default.
    async fn segment_duration(
        &self,
        file_name: &str,
        source: &Path,
        audio: Option<&AudioBuffer>,
    ) -> f64 {
        if let Some(duration) = input_manifest_duration(&self.paths.input_manifest, file_name).await
        {
            return duration;
        }
        if let Some(duration) = audio.map(AudioBuffer::duration_secs).filter(|d| *d > 0.0) {
            return duration;
        }
        match self.codec.probe_duration(source).await {
            Ok(Some(duration)) if duration.is_finite() && duration > 0.0 => duration,
            _ => self.default_duration,
        }
    }
}
