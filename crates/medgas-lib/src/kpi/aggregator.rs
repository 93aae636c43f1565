//! Fleet-wide KPI rollups
//!
//! Snapshots are derived from the trailing set of recent readings, the window
//! store (for node liveness), the alert sink and the connectivity history.
//! Trends compare against the snapshot of the previous input revision, so
//! asking again without new input returns the same values and trends.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::anomaly::AlertSink;
use crate::models::{KpiMetric, KpiSnapshot, KpiStatus, KpiValues, NodeState, SensorReading, Trend};
use crate::window::WindowStore;

/// Deltas at or below this magnitude count as no change
const TREND_EPSILON: f64 = 1e-9;

/// Per-metric status thresholds
#[derive(Debug, Clone)]
pub struct KpiThresholds {
    /// Average pressure below this is critical (kPa)
    pub pressure_critical_below: f64,
    /// Average pressure below this is a warning (kPa)
    pub pressure_warning_below: f64,
    /// Average flow outside this band is a warning (L/min)
    pub flow_warning_band: (f64, f64),
    /// Average flow outside this band is critical (L/min)
    pub flow_critical_band: (f64, f64),
    /// Average temperature above this is a warning (°C)
    pub temperature_warning_above: f64,
    /// Average temperature below this is a warning (°C)
    pub temperature_warning_below: f64,
    /// Average temperature above this is critical (°C)
    pub temperature_critical_above: f64,
    /// Alerts per trailing window at or above this are a warning
    pub alert_rate_warning: usize,
    /// Alerts per trailing window at or above this are critical
    pub alert_rate_critical: usize,
    /// Uptime below this percentage is a warning
    pub uptime_warning_below: f64,
    /// Uptime below this percentage is critical
    pub uptime_critical_below: f64,
    /// Fewer active nodes than this is a warning (0 disables)
    pub expected_nodes: usize,
}

impl Default for KpiThresholds {
    fn default() -> Self {
        Self {
            pressure_critical_below: 450.0,
            pressure_warning_below: 470.0,
            flow_warning_band: (10.0, 40.0),
            flow_critical_band: (5.0, 60.0),
            temperature_warning_above: 30.0,
            temperature_warning_below: 10.0,
            temperature_critical_above: 35.0,
            alert_rate_warning: 5,
            alert_rate_critical: 10,
            uptime_warning_below: 99.0,
            uptime_critical_below: 95.0,
            expected_nodes: 0,
        }
    }
}

impl KpiThresholds {
    fn pressure_status(&self, avg: f64, samples: usize) -> KpiStatus {
        if samples == 0 {
            KpiStatus::Warning
        } else if avg < self.pressure_critical_below {
            KpiStatus::Critical
        } else if avg < self.pressure_warning_below {
            KpiStatus::Warning
        } else {
            KpiStatus::Normal
        }
    }

    fn flow_status(&self, avg: f64, samples: usize) -> KpiStatus {
        let outside = |(lo, hi): (f64, f64)| avg < lo || avg > hi;
        if samples == 0 {
            KpiStatus::Warning
        } else if outside(self.flow_critical_band) {
            KpiStatus::Critical
        } else if outside(self.flow_warning_band) {
            KpiStatus::Warning
        } else {
            KpiStatus::Normal
        }
    }

    fn temperature_status(&self, avg: f64, samples: usize) -> KpiStatus {
        if samples == 0 {
            KpiStatus::Warning
        } else if avg > self.temperature_critical_above {
            KpiStatus::Critical
        } else if avg > self.temperature_warning_above || avg < self.temperature_warning_below {
            KpiStatus::Warning
        } else {
            KpiStatus::Normal
        }
    }

    fn active_nodes_status(&self, active: usize) -> KpiStatus {
        if active == 0 {
            KpiStatus::Critical
        } else if active < self.expected_nodes {
            KpiStatus::Warning
        } else {
            KpiStatus::Normal
        }
    }

    fn alert_rate_status(&self, rate: usize) -> KpiStatus {
        if rate >= self.alert_rate_critical {
            KpiStatus::Critical
        } else if rate >= self.alert_rate_warning {
            KpiStatus::Warning
        } else {
            KpiStatus::Normal
        }
    }

    fn uptime_status(&self, uptime: f64) -> KpiStatus {
        if uptime < self.uptime_critical_below {
            KpiStatus::Critical
        } else if uptime < self.uptime_warning_below {
            KpiStatus::Warning
        } else {
            KpiStatus::Normal
        }
    }
}

/// Configuration for KPI aggregation
#[derive(Debug, Clone)]
pub struct KpiConfig {
    /// Size of the trailing reading set the sensor averages use
    pub trailing_readings: usize,
    /// Window for the alert-rate count
    pub alert_rate_window: Duration,
    pub thresholds: KpiThresholds,
}

impl Default for KpiConfig {
    fn default() -> Self {
        Self {
            trailing_readings: 10,
            alert_rate_window: Duration::from_secs(60 * 60),
            thresholds: KpiThresholds::default(),
        }
    }
}

/// Everything a snapshot is derived from
pub struct KpiInputs<'a> {
    /// Recent accepted readings across all nodes, oldest first
    pub recent: &'a [SensorReading],
    pub store: &'a WindowStore,
    pub alerts: &'a AlertSink,
    pub uptime_percent: f64,
    pub now: DateTime<Utc>,
    /// Input revision the snapshot is computed at
    pub revision: u64,
}

/// Computes KPI snapshots and remembers the previous revision's values
#[derive(Debug, Clone, Default)]
pub struct KpiAggregator {
    config: KpiConfig,
    current: Option<(u64, KpiValues)>,
    baseline: Option<KpiValues>,
}

impl KpiAggregator {
    pub fn new(config: KpiConfig) -> Self {
        Self {
            config,
            current: None,
            baseline: None,
        }
    }

    pub fn config(&self) -> &KpiConfig {
        &self.config
    }

    /// Compute the raw rollups without touching trend state
    pub fn values(&self, inputs: &KpiInputs<'_>) -> KpiValues {
        let skip = inputs
            .recent
            .len()
            .saturating_sub(self.config.trailing_readings);
        let trailing = &inputs.recent[skip..];
        let samples = trailing.len();

        let mean = |f: fn(&SensorReading) -> f64| -> f64 {
            if samples == 0 {
                0.0
            } else {
                trailing.iter().map(f).sum::<f64>() / samples as f64
            }
        };

        let active_nodes = trailing
            .iter()
            .map(|r| r.node_id.as_str())
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|id| inputs.store.node_state(id, inputs.now) == NodeState::Active)
            .count();

        KpiValues {
            active_nodes,
            avg_pressure: mean(|r| r.sensors.pressure_kpa),
            avg_flow: mean(|r| r.sensors.flow_lpm),
            avg_temperature: mean(|r| r.sensors.temperature_c),
            alert_rate: inputs
                .alerts
                .count_since(self.config.alert_rate_window, inputs.now),
            uptime_percent: inputs.uptime_percent,
            sample_count: samples,
        }
    }

    /// Compute a snapshot at the given input revision
    pub fn snapshot(&mut self, inputs: KpiInputs<'_>) -> KpiSnapshot {
        let values = self.values(&inputs);

        match self.current {
            Some((revision, _)) if revision == inputs.revision => {}
            _ => self.baseline = self.current.map(|(_, v)| v),
        }
        self.current = Some((inputs.revision, values));

        self.build(values, self.baseline, inputs.now, inputs.revision)
    }

    fn build(
        &self,
        values: KpiValues,
        previous: Option<KpiValues>,
        now: DateTime<Utc>,
        revision: u64,
    ) -> KpiSnapshot {
        let t = &self.config.thresholds;
        let prev = |f: fn(&KpiValues) -> f64| previous.as_ref().map(f);

        KpiSnapshot {
            generated_at: now,
            revision,
            values,
            pressure: metric(
                "Avg Pressure",
                values.avg_pressure,
                1,
                "kPa",
                t.pressure_status(values.avg_pressure, values.sample_count),
                prev(|v| v.avg_pressure),
            ),
            flow: metric(
                "Avg Flow",
                values.avg_flow,
                1,
                "L/min",
                t.flow_status(values.avg_flow, values.sample_count),
                prev(|v| v.avg_flow),
            ),
            temperature: metric(
                "Avg Temperature",
                values.avg_temperature,
                1,
                "°C",
                t.temperature_status(values.avg_temperature, values.sample_count),
                prev(|v| v.avg_temperature),
            ),
            active_nodes: metric(
                "Active Nodes",
                values.active_nodes as f64,
                0,
                "nodes",
                t.active_nodes_status(values.active_nodes),
                prev(|v| v.active_nodes as f64),
            ),
            alert_rate: metric(
                "Alert Rate",
                values.alert_rate as f64,
                0,
                "alerts/h",
                t.alert_rate_status(values.alert_rate),
                prev(|v| v.alert_rate as f64),
            ),
            uptime: metric(
                "System Uptime",
                values.uptime_percent,
                1,
                "%",
                t.uptime_status(values.uptime_percent),
                prev(|v| v.uptime_percent),
            ),
        }
    }
}

fn metric(
    label: &str,
    value: f64,
    precision: usize,
    unit: &str,
    status: KpiStatus,
    previous: Option<f64>,
) -> KpiMetric {
    let (trend, change_percent) = match previous {
        None => (Trend::Stable, 0.0),
        Some(prev) => {
            let delta = value - prev;
            let trend = if delta > TREND_EPSILON {
                Trend::Up
            } else if delta < -TREND_EPSILON {
                Trend::Down
            } else {
                Trend::Stable
            };
            let change = if prev.abs() > TREND_EPSILON {
                delta / prev.abs() * 100.0
            } else {
                0.0
            };
            (trend, change)
        }
    };

    KpiMetric {
        label: label.to_string(),
        value,
        precision,
        unit: unit.to_string(),
        status,
        trend,
        change_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::AlertIdGenerator;
    use crate::models::{AlertContext, Anomaly, AnomalyEvidence, ReadingMeta, SensorValues, Severity};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn reading(node: &str, offset_secs: i64, pressure: f64) -> SensorReading {
        SensorReading {
            timestamp: t0() + chrono::Duration::seconds(offset_secs),
            hospital_id: "HSP-001".to_string(),
            plant_id: "OXI-A".to_string(),
            node_id: node.to_string(),
            sensors: SensorValues {
                pressure_kpa: pressure,
                flow_lpm: 20.0,
                temperature_c: 22.0,
            },
            meta: ReadingMeta {
                firmware_version: "1.2.0".to_string(),
                rssi_dbm: -70.0,
                battery_v: 3.7,
            },
        }
    }

    fn inputs<'a>(
        recent: &'a [SensorReading],
        store: &'a WindowStore,
        alerts: &'a AlertSink,
        now: DateTime<Utc>,
        revision: u64,
    ) -> KpiInputs<'a> {
        KpiInputs {
            recent,
            store,
            alerts,
            uptime_percent: 100.0,
            now,
            revision,
        }
    }

    #[test]
    fn test_empty_store_has_zero_values() {
        let store = WindowStore::default();
        let alerts = AlertSink::default();
        let mut aggregator = KpiAggregator::default();

        let snapshot = aggregator.snapshot(inputs(&[], &store, &alerts, t0(), 0));

        assert_eq!(snapshot.values.avg_pressure, 0.0);
        assert_eq!(snapshot.values.active_nodes, 0);
        assert!(!snapshot.values.avg_pressure.is_nan());
        assert_eq!(snapshot.pressure.status, KpiStatus::Warning);
        assert_eq!(snapshot.active_nodes.status, KpiStatus::Critical);
    }

    #[test]
    fn test_averages_over_trailing_set() {
        let store = WindowStore::default();
        let alerts = AlertSink::default();
        let mut recent = Vec::new();
        for (i, p) in [480.0, 478.0, 395.0].into_iter().enumerate() {
            let r = reading("N1", i as i64 * 2, p);
            store.record(r.clone());
            recent.push(r);
        }

        let mut aggregator = KpiAggregator::default();
        let now = t0() + chrono::Duration::seconds(4);
        let snapshot = aggregator.snapshot(inputs(&recent, &store, &alerts, now, 3));

        assert!((snapshot.values.avg_pressure - 451.0).abs() < 1e-9);
        assert_eq!(snapshot.values.active_nodes, 1);
        assert_eq!(snapshot.pressure.formatted(), "451.0");
        assert_eq!(snapshot.pressure.status, KpiStatus::Warning);
    }

    #[test]
    fn test_trailing_set_is_bounded() {
        let store = WindowStore::default();
        let alerts = AlertSink::default();
        let mut recent: Vec<SensorReading> = (0..5).map(|i| reading("N1", i, 100.0)).collect();
        recent.extend((5..15).map(|i| reading("N2", i, 500.0)));
        for r in &recent {
            store.record(r.clone());
        }

        let aggregator = KpiAggregator::default();
        let values = aggregator.values(&inputs(
            &recent,
            &store,
            &alerts,
            t0() + chrono::Duration::seconds(15),
            1,
        ));

        // Only the last ten readings (all from N2) count
        assert_eq!(values.sample_count, 10);
        assert_eq!(values.avg_pressure, 500.0);
        assert_eq!(values.active_nodes, 1);
    }

    #[test]
    fn test_quiescent_nodes_are_not_active() {
        let store = WindowStore::default();
        let alerts = AlertSink::default();
        let recent = vec![reading("N1", 0, 480.0)];
        store.record(recent[0].clone());

        let aggregator = KpiAggregator::default();
        let values = aggregator.values(&inputs(
            &recent,
            &store,
            &alerts,
            t0() + chrono::Duration::minutes(5),
            1,
        ));
        assert_eq!(values.active_nodes, 0);
    }

    #[test]
    fn test_same_revision_is_idempotent() {
        let store = WindowStore::default();
        let alerts = AlertSink::default();
        let mut aggregator = KpiAggregator::default();

        let first = vec![reading("N1", 0, 480.0)];
        store.record(first[0].clone());
        aggregator.snapshot(inputs(&first, &store, &alerts, t0(), 1));

        let mut second = first.clone();
        second.push(reading("N1", 2, 460.0));
        store.record(second[1].clone());
        let now = t0() + chrono::Duration::seconds(2);

        let a = aggregator.snapshot(inputs(&second, &store, &alerts, now, 2));
        let b = aggregator.snapshot(inputs(&second, &store, &alerts, now, 2));

        assert_eq!(a, b);
        assert_eq!(a.pressure.trend, Trend::Down);
        assert!((a.pressure.change_percent - (470.0 - 480.0) / 480.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_snapshot_is_stable() {
        let store = WindowStore::default();
        let alerts = AlertSink::default();
        let mut aggregator = KpiAggregator::default();

        let snapshot = aggregator.snapshot(inputs(&[], &store, &alerts, t0(), 0));
        for metric in snapshot.metrics() {
            assert_eq!(metric.trend, Trend::Stable);
            assert_eq!(metric.change_percent, 0.0);
        }
    }

    #[test]
    fn test_alert_rate_counts_trailing_hour() {
        let store = WindowStore::default();
        let alerts = AlertSink::default();
        let ids = AlertIdGenerator::new();

        for minutes in [0, 50, 55, 58, 59, 60] {
            alerts.record(ids.build(
                Anomaly {
                    anomaly_type: "pressure_drop_anomaly".to_string(),
                    severity: Severity::High,
                    context: AlertContext {
                        hospital_id: "HSP-001".to_string(),
                        plant_id: "OXI-A".to_string(),
                        node_id: "N1".to_string(),
                    },
                    timestamp: t0() + chrono::Duration::minutes(minutes),
                    evidence: AnomalyEvidence {
                        score: 0.8,
                        window_seconds: 2.0,
                        features: BTreeMap::new(),
                    },
                },
                None,
            ));
        }

        let mut aggregator = KpiAggregator::default();
        let snapshot = aggregator.snapshot(inputs(
            &[],
            &store,
            &alerts,
            t0() + chrono::Duration::minutes(60),
            1,
        ));

        // The alert at minute 0 sits exactly on the cutoff and is excluded
        assert_eq!(snapshot.values.alert_rate, 5);
        assert_eq!(snapshot.alert_rate.status, KpiStatus::Warning);
    }

    #[test]
    fn test_status_thresholds() {
        let t = KpiThresholds::default();
        assert_eq!(t.pressure_status(440.0, 3), KpiStatus::Critical);
        assert_eq!(t.pressure_status(480.0, 3), KpiStatus::Normal);
        assert_eq!(t.flow_status(45.0, 3), KpiStatus::Warning);
        assert_eq!(t.flow_status(70.0, 3), KpiStatus::Critical);
        assert_eq!(t.temperature_status(22.0, 3), KpiStatus::Normal);
        assert_eq!(t.temperature_status(40.0, 3), KpiStatus::Critical);
        assert_eq!(t.uptime_status(98.0), KpiStatus::Warning);
        assert_eq!(t.uptime_status(100.0), KpiStatus::Normal);
    }
}
