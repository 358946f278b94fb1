use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};

/// Engine-wide telemetry vecs, labeled by list resolution.
///
/// All metrics use the "fluxagg" namespace and are registered once against
/// the embedder's registry; lists bind per-resolution children at
/// construction.
pub struct EngineMetrics {
    encode_errors: IntCounterVec,
    flush_collected: IntCounterVec,
    flush_success: IntCounterVec,
    flush_errors: IntCounterVec,
    flush_duration: HistogramVec,
}

/// Per-resolution children cut from [`EngineMetrics`], held by one list.
pub struct ListTelemetry {
    /// Samples dropped because a record failed to encode.
    pub encode_errors: IntCounter,
    /// Tombstoned elements physically removed after a flush.
    pub flush_collected: IntCounter,
    /// Frames accepted by the sink.
    pub flush_success: IntCounter,
    /// Frames the sink rejected (dropped, never retried).
    pub flush_errors: IntCounter,
    /// Wall time of one whole flush, boundary sampling through collection.
    pub flush_duration: Histogram,
}

impl EngineMetrics {
    /// Creates and registers the metric vecs.
    pub fn new(registry: &Registry) -> Result<Arc<Self>> {
        let encode_errors = IntCounterVec::new(
            Opts::new(
                "encode_errors_total",
                "Samples dropped because encoding failed.",
            )
            .namespace("fluxagg"),
            &["resolution"],
        )?;
        let flush_collected = IntCounterVec::new(
            Opts::new(
                "flush_collected_total",
                "Finished elements collected from lists after a flush.",
            )
            .namespace("fluxagg"),
            &["resolution"],
        )?;
        let flush_success = IntCounterVec::new(
            Opts::new("flush_success_total", "Frames accepted by the sink.")
                .namespace("fluxagg"),
            &["resolution"],
        )?;
        let flush_errors = IntCounterVec::new(
            Opts::new("flush_errors_total", "Frames rejected by the sink.")
                .namespace("fluxagg"),
            &["resolution"],
        )?;
        let flush_duration = HistogramVec::new(
            HistogramOpts::new("flush_duration_seconds", "Wall time of one flush.")
                .namespace("fluxagg")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["resolution"],
        )?;

        registry.register(Box::new(encode_errors.clone()))?;
        registry.register(Box::new(flush_collected.clone()))?;
        registry.register(Box::new(flush_success.clone()))?;
        registry.register(Box::new(flush_errors.clone()))?;
        registry.register(Box::new(flush_duration.clone()))?;

        Ok(Arc::new(Self {
            encode_errors,
            flush_collected,
            flush_success,
            flush_errors,
            flush_duration,
        }))
    }

    /// Metrics bound to a private registry; for embedders that do not scrape.
    pub fn detached() -> Arc<Self> {
        Self::new(&Registry::new()).expect("registering into a fresh registry cannot collide")
    }

    /// Binds the per-resolution children for one list.
    pub fn for_resolution(&self, resolution: Duration) -> ListTelemetry {
        let label = resolution_label(resolution);
        let label = label.as_str();
        ListTelemetry {
            encode_errors: self.encode_errors.with_label_values(&[label]),
            flush_collected: self.flush_collected.with_label_values(&[label]),
            flush_success: self.flush_success.with_label_values(&[label]),
            flush_errors: self.flush_errors.with_label_values(&[label]),
            flush_duration: self.flush_duration.with_label_values(&[label]),
        }
    }

    // Counter readbacks, used by tests and health reporting.

    pub fn encode_errors(&self, resolution: Duration) -> u64 {
        self.encode_errors
            .with_label_values(&[resolution_label(resolution).as_str()])
            .get()
    }

    pub fn flush_collected(&self, resolution: Duration) -> u64 {
        self.flush_collected
            .with_label_values(&[resolution_label(resolution).as_str()])
            .get()
    }

    pub fn flush_success(&self, resolution: Duration) -> u64 {
        self.flush_success
            .with_label_values(&[resolution_label(resolution).as_str()])
            .get()
    }

    pub fn flush_errors(&self, resolution: Duration) -> u64 {
        self.flush_errors
            .with_label_values(&[resolution_label(resolution).as_str()])
            .get()
    }
}

fn resolution_label(resolution: Duration) -> String {
    format!("{resolution:?}")
}
