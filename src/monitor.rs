//! Pluggable telemetry-recording hook.
//!
//! The pipeline reports per-inference and per-analysis latency through a
//! [`MetricsRecorder`]. The default is [`NoopRecorder`]; operators that want
//! the numbers in their logs can install [`TracingRecorder`], and a metrics
//! exporter can implement the trait directly.

use tracing::debug;

pub trait MetricsRecorder: Send + Sync {
    /// One detection pass. `label` is `NORMAL`, `WARNING` or `CRITICAL`.
    fn record_inference(&self, latency_ms: f64, is_anomaly: bool, label: &str);

    /// One causal analysis pass.
    fn record_analysis(&self, latency_ms: f64, root_causes: usize, confidence: f64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn record_inference(&self, _latency_ms: f64, _is_anomaly: bool, _label: &str) {}

    fn record_analysis(&self, _latency_ms: f64, _root_causes: usize, _confidence: f64) {}
}

/// Emits each measurement as a `tracing` debug event under the
/// `meshmedic::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl MetricsRecorder for TracingRecorder {
    fn record_inference(&self, latency_ms: f64, is_anomaly: bool, label: &str) {
        debug!(target: "meshmedic::metrics", latency_ms, is_anomaly, label, "inference");
    }

    fn record_analysis(&self, latency_ms: f64, root_causes: usize, confidence: f64) {
        debug!(target: "meshmedic::metrics", latency_ms, root_causes, confidence, "analysis");
    }
}
