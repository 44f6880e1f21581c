//! Live segment ad-censoring worker.
//!
//! This crate provides:
//! - Stream discovery and per-stream sessions
//! - Segment stabilization with debounced, cancellable timers
//! - The one-segment-lag censoring pipeline (transcribe, detect, tone, remux)
//! - Rolling output manifest maintenance
//! - Graceful shutdown with lag buffer flush

pub mod config;
pub mod detector;
pub mod error;
pub mod fragmenter;
pub mod logging;
pub mod manager;
pub mod manifest;
pub mod metrics;
pub mod processor;
pub mod retry;
pub mod session;
pub mod watcher;

#[doc(hidden)]
pub mod testing;

pub use config::WorkerConfig;
pub use detector::{AdDetector, Detection};
pub use error::{WorkerError, WorkerResult};
pub use fragmenter::Fragmenter;
pub use logging::StreamLogger;
pub use manager::{DiscoveryReport, SessionManager};
pub use manifest::ManifestWriter;
pub use processor::{
    EmittedSegment, PipelineServices, ProcessorPhase, SegmentProcessor, Stage, StreamPaths,
};
pub use session::StreamSession;
pub use watcher::{wait_for_stable, SegmentWatcher, Stabilization};
