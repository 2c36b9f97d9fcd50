use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider, UpDownCounter},
    KeyValue,
};
use prometheus::Registry;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Failed to build prometheus exporter: {0}")]
    Exporter(String),
}

/// Why a frame never reached the detector or never came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    Busy,
    Failed,
    Disconnected,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Malformed => "malformed",
            DropReason::Busy => "busy",
            DropReason::Failed => "failed",
            DropReason::Disconnected => "disconnected",
        }
    }
}

pub struct Metrics {
    frames_received: Counter<u64>,
    frames_dropped: Counter<u64>,
    frames_processed: Counter<u64>,
    inference_duration: Histogram<u64>,
    active_sessions: UpDownCounter<i64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| MetricsError::Exporter(e.to_string()))?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("frame_relay");
        global::set_meter_provider(provider);

        let frames_received = meter
            .u64_counter("frames_received")
            .with_description("Frames received from clients")
            .build();

        let frames_dropped = meter
            .u64_counter("frames_dropped")
            .with_description("Frames that produced no reply")
            .build();

        let frames_processed = meter
            .u64_counter("frames_processed")
            .with_description("Annotated frames sent back to clients")
            .build();

        let boundaries = generate_boundaries((100, 500, 1000, 5000, 30000));

        let inference_duration = meter
            .u64_histogram("inference_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of detector round trips in milliseconds")
            .build();

        let active_sessions = meter
            .i64_up_down_counter("active_sessions")
            .with_description("Connected relay sessions")
            .build();

        Ok(Metrics {
            frames_received,
            frames_dropped,
            frames_processed,
            inference_duration,
            active_sessions,
            registry,
        })
    }

    pub fn record_frame_received(&self) {
        self.frames_received.add(1, &[]);
    }

    pub fn record_frame_dropped(&self, reason: DropReason) {
        let attributes = [KeyValue::new("reason", reason.as_str())];
        self.frames_dropped.add(1, &attributes);
    }

    pub fn record_frame_processed(&self) {
        self.frames_processed.add(1, &[]);
    }

    pub fn record_inference_duration(&self, duration_ms: u64, success: bool) {
        let attributes = [KeyValue::new("success", success)];
        self.inference_duration.record(duration_ms, &attributes);
    }

    pub fn session_opened(&self) {
        self.active_sessions.add(1, &[]);
    }

    pub fn session_closed(&self) {
        self.active_sessions.add(-1, &[]);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 100;
    let middle_step: usize = 250;
    let end_step: usize = 1000;
    let tail_step: usize = 5000;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
