//! Anomaly detection for sensor telemetry
//!
//! This module provides:
//! - Window statistics (baseline mean, deviation, rate of change)
//! - Threshold-plus-trend rules (pressure drop, flow surge, temperature rise)
//! - Prescription lookup against an actuator catalog
//! - The bounded alert sink

mod alert_sink;
mod detector;
mod prescription;
mod stats;

pub use alert_sink::{AlertIdGenerator, AlertSink};
pub use detector::{
    AnomalyDetector, AnomalyRule, Detection, Direction, ThresholdTrendRule, FLOW_SURGE,
    PRESSURE_DROP, TEMPERATURE_RISE,
};
pub use prescription::{
    Actuator, ActuatorCatalog, ActuatorKind, PrescriptionMapper, PrescriptionRule,
};
pub use stats::{WindowStats, STD_DEV_EPSILON};

pub(crate) use detector::panic_message;
