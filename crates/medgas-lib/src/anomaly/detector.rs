//! Threshold-plus-trend anomaly detection
//!
//! A rule fires when the newest value of a metric has crossed an absolute
//! level *and* is still moving in the same direction faster than a rate
//! threshold. Requiring both keeps a single noisy sample from raising an alert.
//! A second, more extreme level escalates the severity to critical.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::stats::WindowStats;
use crate::error::DetectionError;
use crate::models::{Anomaly, AnomalyEvidence, Metric, SensorReading, Severity};

/// Alert type emitted by the pressure rule
pub const PRESSURE_DROP: &str = "pressure_drop_anomaly";
/// Alert type emitted by the flow rule
pub const FLOW_SURGE: &str = "flow_surge_anomaly";
/// Alert type emitted by the temperature rule
pub const TEMPERATURE_RISE: &str = "temperature_rise_anomaly";

/// |z| at which the z-score contribution to the confidence saturates
const Z_SATURATION: f64 = 4.0;

/// A detection rule evaluated over one node's window
pub trait AnomalyRule: Send + Sync {
    /// Name used in logs and failure reports
    fn name(&self) -> &str;

    /// Evaluate the ordered window (oldest first)
    ///
    /// # Returns
    /// * `Ok(Some(_))` when the rule matched
    /// * `Ok(None)` when it did not or there is not enough data
    fn evaluate(&self, window: &[SensorReading]) -> Result<Option<Anomaly>, DetectionError>;
}

/// Which way a metric has to move to be anomalous
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Falling,
    Rising,
}

/// Generic level-and-rate rule for a single metric
#[derive(Debug, Clone)]
pub struct ThresholdTrendRule {
    /// Alert type tag
    pub anomaly_type: String,
    pub metric: Metric,
    pub direction: Direction,
    /// Level the newest value must be beyond to fire
    pub trigger_level: f64,
    /// Level beyond which the anomaly is critical
    pub critical_level: f64,
    /// Minimum rate of change magnitude (units per second) in `direction`
    pub rate_threshold: f64,
}

impl ThresholdTrendRule {
    /// Pressure below 450 kPa while falling faster than 0.5 kPa/s; critical below 400
    pub fn pressure_drop() -> Self {
        Self {
            anomaly_type: PRESSURE_DROP.to_string(),
            metric: Metric::Pressure,
            direction: Direction::Falling,
            trigger_level: 450.0,
            critical_level: 400.0,
            rate_threshold: 0.5,
        }
    }

    /// Flow above 40 L/min while rising faster than 2 L/min per second; critical above 60
    pub fn flow_surge() -> Self {
        Self {
            anomaly_type: FLOW_SURGE.to_string(),
            metric: Metric::Flow,
            direction: Direction::Rising,
            trigger_level: 40.0,
            critical_level: 60.0,
            rate_threshold: 2.0,
        }
    }

    /// Temperature above 35 °C while rising faster than 0.1 °C/s; critical above 45
    pub fn temperature_rise() -> Self {
        Self {
            anomaly_type: TEMPERATURE_RISE.to_string(),
            metric: Metric::Temperature,
            direction: Direction::Rising,
            trigger_level: 35.0,
            critical_level: 45.0,
            rate_threshold: 0.1,
        }
    }

    fn level_crossed(&self, value: f64) -> bool {
        match self.direction {
            Direction::Falling => value < self.trigger_level,
            Direction::Rising => value > self.trigger_level,
        }
    }

    fn trending(&self, rate: f64) -> bool {
        match self.direction {
            Direction::Falling => rate < -self.rate_threshold,
            Direction::Rising => rate > self.rate_threshold,
        }
    }

    fn severity(&self, value: f64) -> Severity {
        let critical = match self.direction {
            Direction::Falling => value < self.critical_level,
            Direction::Rising => value > self.critical_level,
        };
        if critical {
            Severity::Critical
        } else {
            Severity::High
        }
    }

    /// How far past the trigger level toward the critical level, in [0, 1]
    fn depth(&self, value: f64) -> f64 {
        let span = (self.critical_level - self.trigger_level).abs();
        if span < f64::EPSILON {
            return 1.0;
        }
        ((value - self.trigger_level).abs() / span).clamp(0.0, 1.0)
    }

    fn score(&self, stats: &WindowStats) -> f64 {
        let depth = self.depth(stats.latest);
        let z = (stats.z_score().abs() / Z_SATURATION).min(1.0);
        (0.6 + 0.25 * depth + 0.15 * z).min(1.0)
    }
}

impl AnomalyRule for ThresholdTrendRule {
    fn name(&self) -> &str {
        &self.anomaly_type
    }

    fn evaluate(&self, window: &[SensorReading]) -> Result<Option<Anomaly>, DetectionError> {
        let Some(stats) = WindowStats::compute(window, self.metric) else {
            return Ok(None);
        };
        let Some(newest) = window.last() else {
            return Ok(None);
        };

        if !self.level_crossed(stats.latest) || !self.trending(stats.rate_per_sec) {
            return Ok(None);
        }

        let metric = self.metric.as_str();
        let features = [
            (format!("zscore_{}", metric), stats.z_score()),
            (format!("rate_{}_per_s", metric), stats.rate_per_sec),
            (format!("mean_{}", metric), stats.mean),
            (format!("std_{}", metric), stats.std_dev),
            (format!("latest_{}", metric), stats.latest),
        ];

        if let Some((name, _)) = features.iter().find(|(_, v)| !v.is_finite()) {
            return Err(DetectionError::NonFiniteFeature {
                rule: self.anomaly_type.clone(),
                feature: name.clone(),
            });
        }

        Ok(Some(Anomaly {
            anomaly_type: self.anomaly_type.clone(),
            severity: self.severity(stats.latest),
            context: newest.context(),
            timestamp: newest.timestamp,
            evidence: AnomalyEvidence {
                score: self.score(&stats),
                window_seconds: stats.window_seconds,
                features: features.into_iter().collect(),
            },
        }))
    }
}

/// Result of running every rule over a window
#[derive(Debug, Default)]
pub struct Detection {
    /// Most severe anomaly found, if any
    pub anomaly: Option<Anomaly>,
    /// Rules that failed; their failure counts as "no anomaly"
    pub failures: Vec<DetectionError>,
}

/// Runs a set of rules and keeps the most severe match
#[derive(Clone)]
pub struct AnomalyDetector {
    rules: Vec<Arc<dyn AnomalyRule>>,
}

impl AnomalyDetector {
    /// Detector with no rules
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Pressure-drop rule plus the flow and temperature rules
    pub fn with_extended_rules() -> Self {
        Self::default()
            .with_rule(ThresholdTrendRule::flow_surge())
            .with_rule(ThresholdTrendRule::temperature_rise())
    }

    pub fn with_rule(mut self, rule: impl AnomalyRule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.name().to_string()).collect()
    }

    /// Evaluate a window, discarding rule failures
    pub fn evaluate(&self, window: &[SensorReading]) -> Option<Anomaly> {
        self.detect(window).anomaly
    }

    /// Evaluate a window, isolating each rule's errors and panics
    pub fn detect(&self, window: &[SensorReading]) -> Detection {
        let mut detection = Detection::default();

        for rule in &self.rules {
            let outcome = catch_unwind(AssertUnwindSafe(|| rule.evaluate(window)))
                .unwrap_or_else(|payload| {
                    Err(DetectionError::Panicked {
                        rule: rule.name().to_string(),
                        message: panic_message(payload.as_ref()),
                    })
                });

            match outcome {
                Ok(Some(anomaly)) => {
                    let more_severe = detection
                        .anomaly
                        .as_ref()
                        .map(|current| anomaly.severity > current.severity)
                        .unwrap_or(true);
                    if more_severe {
                        detection.anomaly = Some(anomaly);
                    }
                }
                Ok(None) => {}
                Err(e) => detection.failures.push(e),
            }
        }

        detection
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::empty().with_rule(ThresholdTrendRule::pressure_drop())
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReadingMeta, SensorValues};
    use chrono::{TimeZone, Utc};

    fn window_with(values: &[(f64, f64, f64)], step_secs: i64) -> Vec<SensorReading> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, (p, f, t))| SensorReading {
                timestamp: t0 + chrono::Duration::seconds(i as i64 * step_secs),
                hospital_id: "HSP-001".to_string(),
                plant_id: "OXI-A".to_string(),
                node_id: "N1".to_string(),
                sensors: SensorValues {
                    pressure_kpa: *p,
                    flow_lpm: *f,
                    temperature_c: *t,
                },
                meta: ReadingMeta {
                    firmware_version: "1.2.0".to_string(),
                    rssi_dbm: -70.0,
                    battery_v: 3.7,
                },
            })
            .collect()
    }

    fn pressures(values: &[f64]) -> Vec<SensorReading> {
        let rows: Vec<_> = values.iter().map(|p| (*p, 20.0, 22.0)).collect();
        window_with(&rows, 2)
    }

    #[test]
    fn test_single_reading_is_insufficient() {
        let detector = AnomalyDetector::default();
        assert!(detector.evaluate(&pressures(&[300.0])).is_none());
    }

    #[test]
    fn test_drop_to_430_is_high() {
        let detector = AnomalyDetector::default();
        let anomaly = detector.evaluate(&pressures(&[480.0, 430.0])).unwrap();

        assert_eq!(anomaly.anomaly_type, PRESSURE_DROP);
        assert_eq!(anomaly.severity, Severity::High);
        assert_eq!(anomaly.context.node_id, "N1");
        assert_eq!(anomaly.evidence.features["rate_pressure_per_s"], -25.0);
        // Single-sample baseline has no variance; the z-score is clamped
        assert_eq!(anomaly.evidence.features["zscore_pressure"], 0.0);
    }

    #[test]
    fn test_flat_baseline_still_alerts_on_level_and_trend() {
        let detector = AnomalyDetector::default();
        let anomaly = detector
            .evaluate(&pressures(&[480.0, 480.0, 480.0, 430.0]))
            .unwrap();

        assert_eq!(anomaly.severity, Severity::High);
        assert_eq!(anomaly.evidence.features["std_pressure"], 0.0);
        assert_eq!(anomaly.evidence.features["zscore_pressure"], 0.0);
    }

    #[test]
    fn test_drop_to_390_is_critical() {
        let detector = AnomalyDetector::default();
        let anomaly = detector.evaluate(&pressures(&[480.0, 390.0])).unwrap();
        assert_eq!(anomaly.severity, Severity::Critical);
        assert!(anomaly.evidence.score > 0.8 && anomaly.evidence.score <= 1.0);
    }

    #[test]
    fn test_increasing_pressure_never_alerts() {
        let detector = AnomalyDetector::default();
        // Low but strictly increasing: level crossed, trend is not
        let values: Vec<f64> = (0..30).map(|i| 300.0 + i as f64 * 3.0).collect();

        for end in 1..=values.len() {
            assert!(detector.evaluate(&pressures(&values[..end])).is_none());
        }
    }

    #[test]
    fn test_slow_drift_below_trigger_is_ignored() {
        let detector = AnomalyDetector::default();
        // 0.25 kPa/s decline is under the rate threshold
        assert!(detector.evaluate(&pressures(&[441.0, 440.5])).is_none());
    }

    #[test]
    fn test_fast_drop_above_trigger_is_ignored() {
        let detector = AnomalyDetector::default();
        assert!(detector.evaluate(&pressures(&[520.0, 460.0])).is_none());
    }

    #[test]
    fn test_evidence_carries_window_span() {
        let detector = AnomalyDetector::default();
        let anomaly = detector
            .evaluate(&pressures(&[480.0, 478.0, 395.0]))
            .unwrap();

        assert_eq!(anomaly.severity, Severity::Critical);
        assert_eq!(anomaly.evidence.window_seconds, 4.0);
        assert!(anomaly.evidence.features["zscore_pressure"] < 0.0);
        assert_eq!(anomaly.evidence.features["latest_pressure"], 395.0);
    }

    #[test]
    fn test_extended_rules_pick_most_severe() {
        let detector = AnomalyDetector::with_extended_rules();
        let window = window_with(&[(480.0, 20.0, 22.0), (430.0, 70.0, 22.0)], 2);

        let anomaly = detector.evaluate(&window).unwrap();
        // Flow is past its critical level, pressure only high
        assert_eq!(anomaly.anomaly_type, FLOW_SURGE);
        assert_eq!(anomaly.severity, Severity::Critical);
    }

    #[test]
    fn test_temperature_rule() {
        let detector = AnomalyDetector::empty().with_rule(ThresholdTrendRule::temperature_rise());
        let window = window_with(&[(480.0, 20.0, 30.0), (480.0, 20.0, 38.0)], 2);

        let anomaly = detector.evaluate(&window).unwrap();
        assert_eq!(anomaly.anomaly_type, TEMPERATURE_RISE);
        assert_eq!(anomaly.severity, Severity::High);
    }

    struct PanickingRule;

    impl AnomalyRule for PanickingRule {
        fn name(&self) -> &str {
            "panicking"
        }

        fn evaluate(&self, _window: &[SensorReading]) -> Result<Option<Anomaly>, DetectionError> {
            panic!("rule blew up");
        }
    }

    #[test]
    fn test_failing_rule_is_isolated() {
        let detector = AnomalyDetector::empty()
            .with_rule(PanickingRule)
            .with_rule(ThresholdTrendRule::pressure_drop());

        let detection = detector.detect(&pressures(&[480.0, 390.0]));

        assert_eq!(detection.failures.len(), 1);
        assert!(matches!(
            &detection.failures[0],
            DetectionError::Panicked { rule, message } if rule == "panicking" && message == "rule blew up"
        ));
        assert_eq!(detection.anomaly.unwrap().severity, Severity::Critical);
    }

    #[test]
    fn test_custom_levels() {
        let rule = ThresholdTrendRule {
            trigger_level: 500.0,
            critical_level: 470.0,
            rate_threshold: 1.0,
            ..ThresholdTrendRule::pressure_drop()
        };

        let detector = AnomalyDetector::empty().with_rule(rule);
        let anomaly = detector.evaluate(&pressures(&[510.0, 480.0])).unwrap();
        assert_eq!(anomaly.severity, Severity::High);
    }
}
