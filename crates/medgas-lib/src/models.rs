//! Core data models for the telemetry pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sensor values carried by a single reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorValues {
    pub pressure_kpa: f64,
    pub flow_lpm: f64,
    pub temperature_c: f64,
}

/// Node hardware metadata reported alongside the sensor values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingMeta {
    pub firmware_version: String,
    /// Received signal strength in dBm (negative by nature)
    pub rssi_dbm: f64,
    pub battery_v: f64,
}

/// One sample from one sensor node at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    pub hospital_id: String,
    pub plant_id: String,
    pub node_id: String,
    pub sensors: SensorValues,
    pub meta: ReadingMeta,
}

impl SensorReading {
    /// Identity tuple of the node that produced this reading
    pub fn context(&self) -> AlertContext {
        AlertContext {
            hospital_id: self.hospital_id.clone(),
            plant_id: self.plant_id.clone(),
            node_id: self.node_id.clone(),
        }
    }

    /// Value of the given metric in this reading
    pub fn metric(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Pressure => self.sensors.pressure_kpa,
            Metric::Flow => self.sensors.flow_lpm,
            Metric::Temperature => self.sensors.temperature_c,
        }
    }
}

/// Sensor channels a detection rule can watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Pressure,
    Flow,
    Temperature,
}

impl Metric {
    /// Short name used in feature keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Pressure => "pressure",
            Metric::Flow => "flow",
            Metric::Temperature => "temperature",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Pressure => "kPa",
            Metric::Flow => "L/min",
            Metric::Temperature => "°C",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity levels, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Where an alert originated
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertContext {
    pub hospital_id: String,
    pub plant_id: String,
    pub node_id: String,
}

/// Evidence trail attached to a detected anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyEvidence {
    /// Normalized confidence in [0, 1]
    pub score: f64,
    /// Time span covered by the window the evidence was computed over
    pub window_seconds: f64,
    /// Computed features keyed by name (z-score, rate of change, ...)
    pub features: BTreeMap<String, f64>,
}

/// Output of the anomaly detector, before it becomes an alert
#[derive(Debug, Clone, PartialEq)]
pub struct Anomaly {
    pub anomaly_type: String,
    pub severity: Severity,
    pub context: AlertContext,
    pub timestamp: DateTime<Utc>,
    pub evidence: AnomalyEvidence,
}

/// Advisory remediation for the actuation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    pub action: String,
    pub target_actuator_id: String,
    pub rationale: String,
}

/// An emitted, immutable alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub context: AlertContext,
    pub evidence: AnomalyEvidence,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prescription: Option<Prescription>,
}

/// KPI health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KpiStatus {
    Normal,
    Warning,
    Critical,
}

/// Direction of change since the previous snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

/// One fleet-wide indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiMetric {
    pub label: String,
    pub value: f64,
    /// Number of decimals the value is rendered with
    pub precision: usize,
    pub unit: String,
    pub status: KpiStatus,
    pub trend: Trend,
    pub change_percent: f64,
}

impl KpiMetric {
    /// Value rendered with the metric's fixed precision
    pub fn formatted(&self) -> String {
        format!("{:.*}", self.precision, self.value)
    }
}

/// Raw fleet rollups a snapshot is built from
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiValues {
    pub active_nodes: usize,
    pub avg_pressure: f64,
    pub avg_flow: f64,
    pub avg_temperature: f64,
    pub alert_rate: usize,
    pub uptime_percent: f64,
    /// Number of readings in the trailing set
    pub sample_count: usize,
}

/// Latest KPI snapshot handed to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiSnapshot {
    pub generated_at: DateTime<Utc>,
    /// Pipeline input revision the snapshot was computed at
    pub revision: u64,
    pub values: KpiValues,
    pub pressure: KpiMetric,
    pub flow: KpiMetric,
    pub temperature: KpiMetric,
    pub active_nodes: KpiMetric,
    pub alert_rate: KpiMetric,
    pub uptime: KpiMetric,
}

impl KpiSnapshot {
    /// All metrics in display order
    pub fn metrics(&self) -> [&KpiMetric; 6] {
        [
            &self.pressure,
            &self.flow,
            &self.temperature,
            &self.active_nodes,
            &self.alert_rate,
            &self.uptime,
        ]
    }
}

/// Lifecycle state of a node as seen by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// No reading has ever been recorded (or the window was evicted)
    Idle,
    /// Readings are arriving within the staleness horizon
    Active,
    /// Known node that stopped reporting
    Quiescent,
}

/// Per-node view for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub context: AlertContext,
    pub state: NodeState,
    pub readings_in_window: usize,
    pub last_seen: DateTime<Utc>,
    pub latest: SensorValues,
    pub firmware_version: String,
}

/// Counters and connectivity surfaced to external consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub connected: bool,
    pub readings_accepted: u64,
    pub readings_rejected: u64,
    pub alerts_emitted: u64,
    pub detector_failures: u64,
    pub tracked_nodes: usize,
    pub revision: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_reading() -> SensorReading {
        SensorReading {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            hospital_id: "HSP-001".to_string(),
            plant_id: "OXI-A".to_string(),
            node_id: "ESP32-1".to_string(),
            sensors: SensorValues {
                pressure_kpa: 480.0,
                flow_lpm: 18.5,
                temperature_c: 22.0,
            },
            meta: ReadingMeta {
                firmware_version: "1.2.0".to_string(),
                rssi_dbm: -70.0,
                battery_v: 3.7,
            },
        }
    }

    #[test]
    fn test_reading_wire_names() {
        let json = serde_json::to_value(sample_reading()).unwrap();

        assert_eq!(json["hospitalId"], "HSP-001");
        assert_eq!(json["plantId"], "OXI-A");
        assert_eq!(json["nodeId"], "ESP32-1");
        assert_eq!(json["sensors"]["pressure_kpa"], 480.0);
        assert_eq!(json["meta"]["firmwareVersion"], "1.2.0");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_alert_serializes_type_and_skips_missing_prescription() {
        let reading = sample_reading();
        let alert = Alert {
            id: "ALT-1".to_string(),
            timestamp: reading.timestamp,
            severity: Severity::High,
            alert_type: "pressure_drop_anomaly".to_string(),
            context: reading.context(),
            evidence: AnomalyEvidence {
                score: 0.9,
                window_seconds: 30.0,
                features: BTreeMap::new(),
            },
            prescription: None,
        };

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "pressure_drop_anomaly");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["evidence"]["windowSeconds"], 30.0);
        assert!(json.get("prescription").is_none());
    }

    #[test]
    fn test_kpi_metric_fixed_precision() {
        let metric = KpiMetric {
            label: "Avg Pressure".to_string(),
            value: 451.0,
            precision: 1,
            unit: "kPa".to_string(),
            status: KpiStatus::Normal,
            trend: Trend::Stable,
            change_percent: 0.0,
        };
        assert_eq!(metric.formatted(), "451.0");
    }
}
