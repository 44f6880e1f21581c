//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    pub const SEGMENTS_PROCESSED_TOTAL: &str = "admute_segments_processed_total";
    pub const SEGMENTS_PASSTHROUGH_TOTAL: &str = "admute_segments_passthrough_total";
    pub const AD_REGIONS_TOTAL: &str = "admute_ad_regions_total";
    pub const SEGMENT_PROCESSING_SECONDS: &str = "admute_segment_processing_seconds";
    pub const ACTIVE_STREAMS: &str = "admute_active_streams";
}

/// Record a segment emitted with (possibly empty) censoring applied.
pub fn record_segment_processed(stream_key: &str) {
    let labels = [("stream", stream_key.to_string())];
    counter!(names::SEGMENTS_PROCESSED_TOTAL, &labels).increment(1);
}

/// Record a segment emitted raw because a stage degraded.
pub fn record_segment_passthrough(stream_key: &str, reason: &str) {
    let labels = [
        ("stream", stream_key.to_string()),
        ("reason", reason.to_string()),
    ];
    counter!(names::SEGMENTS_PASSTHROUGH_TOTAL, &labels).increment(1);
}

pub fn record_ad_regions(stream_key: &str, count: usize) {
    if count == 0 {
        return;
    }
    let labels = [("stream", stream_key.to_string())];
    counter!(names::AD_REGIONS_TOTAL, &labels).increment(count as u64);
}

pub fn record_processing_duration(stream_key: &str, duration_secs: f64) {
    let labels = [("stream", stream_key.to_string())];
    histogram!(names::SEGMENT_PROCESSING_SECONDS, &labels).record(duration_secs);
}

pub fn set_active_streams(count: usize) {
    gauge!(names::ACTIVE_STREAMS).set(count as f64);
}
