//! Observability infrastructure for the telemetry pipeline
//!
//! Provides:
//! - Prometheus metrics (ingest latency, rejections by reason, alerts by severity,
//!   node and connectivity gauges)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::error::{DetectionError, RejectReason};
use crate::models::{Alert, Severity};

/// Histogram buckets for per-reading ingest latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.05, 0.1,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    ingest_latency_seconds: Histogram,
    readings_ingested: IntCounter,
    readings_rejected: IntCounterVec,
    alerts_emitted: IntCounterVec,
    stage_failures: IntCounterVec,
    tracked_nodes: IntGauge,
    active_nodes: IntGauge,
    avg_pressure_kpa: Gauge,
    feed_connected: IntGauge,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            ingest_latency_seconds: register_histogram!(
                "medgas_ingest_latency_seconds",
                "Time spent applying one reading through the pipeline",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register ingest_latency_seconds"),

            readings_ingested: register_int_counter!(
                "medgas_readings_ingested_total",
                "Total number of accepted sensor readings"
            )
            .expect("Failed to register readings_ingested"),

            readings_rejected: register_int_counter_vec!(
                "medgas_readings_rejected_total",
                "Total number of rejected sensor readings by reason",
                &["reason"]
            )
            .expect("Failed to register readings_rejected"),

            alerts_emitted: register_int_counter_vec!(
                "medgas_alerts_emitted_total",
                "Total number of alerts emitted by severity",
                &["severity"]
            )
            .expect("Failed to register alerts_emitted"),

            stage_failures: register_int_counter_vec!(
                "medgas_stage_failures_total",
                "Detector and prescription failures that were isolated",
                &["stage"]
            )
            .expect("Failed to register stage_failures"),

            tracked_nodes: register_int_gauge!(
                "medgas_tracked_nodes",
                "Number of nodes with a live window"
            )
            .expect("Failed to register tracked_nodes"),

            active_nodes: register_int_gauge!(
                "medgas_active_nodes",
                "Number of nodes reporting within the staleness horizon"
            )
            .expect("Failed to register active_nodes"),

            avg_pressure_kpa: register_gauge!(
                "medgas_avg_pressure_kpa",
                "Average pressure over the trailing reading set"
            )
            .expect("Failed to register avg_pressure_kpa"),

            feed_connected: register_int_gauge!(
                "medgas_feed_connected",
                "Whether the reading feed is currently connected (1) or not (0)"
            )
            .expect("Failed to register feed_connected"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    pub fn observe_ingest_latency(&self, duration_secs: f64) {
        self.inner().ingest_latency_seconds.observe(duration_secs);
    }

    pub fn inc_readings_ingested(&self) {
        self.inner().readings_ingested.inc();
    }

    pub fn inc_readings_rejected(&self, reason: &RejectReason) {
        self.inner()
            .readings_rejected
            .with_label_values(&[reason.label()])
            .inc();
    }

    pub fn inc_alerts_emitted(&self, severity: Severity) {
        self.inner()
            .alerts_emitted
            .with_label_values(&[severity.as_str()])
            .inc();
    }

    /// Count an isolated failure in `stage` ("detector" or "prescription")
    pub fn inc_stage_failure(&self, stage: &str) {
        self.inner().stage_failures.with_label_values(&[stage]).inc();
    }

    pub fn set_nodes(&self, tracked: usize, active: usize) {
        self.inner().tracked_nodes.set(tracked as i64);
        self.inner().active_nodes.set(active as i64);
    }

    pub fn set_avg_pressure(&self, kpa: f64) {
        self.inner().avg_pressure_kpa.set(kpa);
    }

    pub fn set_feed_connected(&self, connected: bool) {
        self.inner().feed_connected.set(i64::from(connected));
    }

    /// Render the default registry in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Structured logger for pipeline events
///
/// Emits consistent JSON-shaped records for alerts, rejections, connectivity
/// changes and isolated failures.
#[derive(Clone)]
pub struct StructuredLogger {
    site: String,
}

impl StructuredLogger {
    pub fn new(site: impl Into<String>) -> Self {
        Self { site: site.into() }
    }

    /// Log an emitted alert
    pub fn log_alert(&self, alert: &Alert) {
        let action = alert
            .prescription
            .as_ref()
            .map(|p| p.action.as_str())
            .unwrap_or("none");
        let actuator = alert
            .prescription
            .as_ref()
            .map(|p| p.target_actuator_id.as_str())
            .unwrap_or("none");

        match alert.severity {
            Severity::Critical | Severity::High => {
                warn!(
                    event = "alert_emitted",
                    site = %self.site,
                    alert_id = %alert.id,
                    alert_type = %alert.alert_type,
                    severity = %alert.severity,
                    hospital_id = %alert.context.hospital_id,
                    plant_id = %alert.context.plant_id,
                    node_id = %alert.context.node_id,
                    score = alert.evidence.score,
                    action = %action,
                    actuator = %actuator,
                    "Alert emitted"
                );
            }
            _ => {
                info!(
                    event = "alert_emitted",
                    site = %self.site,
                    alert_id = %alert.id,
                    alert_type = %alert.alert_type,
                    severity = %alert.severity,
                    node_id = %alert.context.node_id,
                    score = alert.evidence.score,
                    "Alert emitted"
                );
            }
        }
    }

    /// Log a rejected reading
    pub fn log_rejection(&self, node_id: &str, reason: &RejectReason) {
        debug!(
            event = "reading_rejected",
            site = %self.site,
            node_id = %node_id,
            reason = reason.label(),
            details = %reason,
            "Reading rejected"
        );
    }

    /// Log a feed connectivity transition
    pub fn log_connectivity(&self, connected: bool, uptime_percent: f64) {
        if connected {
            info!(
                event = "feed_connectivity",
                site = %self.site,
                connected,
                uptime_percent,
                "Reading feed connected"
            );
        } else {
            warn!(
                event = "feed_connectivity",
                site = %self.site,
                connected,
                uptime_percent,
                "Reading feed disconnected"
            );
        }
    }

    /// Log an isolated detector or prescription failure
    pub fn log_stage_failure(&self, stage: &str, node_id: &str, error: &DetectionError) {
        warn!(
            event = "detector_failure",
            site = %self.site,
            stage = %stage,
            node_id = %node_id,
            error = %error,
            "Pipeline stage failed; reading kept"
        );
    }

    /// Log pipeline startup
    pub fn log_startup(&self, version: &str, feed_mode: &str) {
        info!(
            event = "pipeline_started",
            site = %self.site,
            version = %version,
            feed_mode = %feed_mode,
            "Telemetry pipeline started"
        );
    }

    /// Log pipeline shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "pipeline_shutdown",
            site = %self.site,
            reason = %reason,
            "Telemetry pipeline shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle_is_shared() {
        let a = PipelineMetrics::new();
        let b = a.clone();
        a.inc_readings_ingested();
        b.set_feed_connected(true);

        let text = a.render().unwrap();
        assert!(text.contains("medgas_readings_ingested_total"));
        assert!(text.contains("medgas_feed_connected"));
    }

    #[test]
    fn test_rejections_labelled_by_reason() {
        let metrics = PipelineMetrics::new();
        metrics.inc_readings_rejected(&RejectReason::MissingIdentity("nodeId"));

        let text = metrics.render().unwrap();
        assert!(text.contains("medgas_readings_rejected_total{reason=\"missing_identity\"}"));
    }
}
