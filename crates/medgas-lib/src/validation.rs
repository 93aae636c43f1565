//! Ingestion-time validation of sensor readings
//!
//! Malformed or implausible readings are refused here so that they never reach
//! the window store or the detector.

use crate::error::RejectReason;
use crate::models::SensorReading;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Plausibility limits applied to every reading
#[derive(Debug, Clone)]
pub struct ValidationLimits {
    /// Upper bound for pipeline pressure
    pub max_pressure_kpa: f64,
    /// Upper bound for flow
    pub max_flow_lpm: f64,
    /// Upper bound for gas temperature
    pub max_temperature_c: f64,
    /// How far behind a node's latest reading a late reading may be
    pub max_backfill: Duration,
    /// How far ahead of the pipeline clock a reading may be stamped
    pub max_clock_skew: Duration,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_pressure_kpa: 2_000.0,
            max_flow_lpm: 1_000.0,
            max_temperature_c: 150.0,
            max_backfill: Duration::from_secs(60),
            max_clock_skew: Duration::from_secs(5 * 60),
        }
    }
}

/// Validates readings against [`ValidationLimits`]
#[derive(Debug, Clone, Default)]
pub struct ReadingValidator {
    limits: ValidationLimits,
}

impl ReadingValidator {
    pub fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    /// Check a reading before it is admitted
    ///
    /// # Arguments
    /// * `reading` - Candidate reading
    /// * `node_latest` - Timestamp of the newest reading already held for the node
    /// * `now` - Current pipeline time
    pub fn validate(
        &self,
        reading: &SensorReading,
        node_latest: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), RejectReason> {
        check_identity("hospitalId", &reading.hospital_id)?;
        check_identity("plantId", &reading.plant_id)?;
        check_identity("nodeId", &reading.node_id)?;

        check_sensor(
            "pressure_kpa",
            reading.sensors.pressure_kpa,
            self.limits.max_pressure_kpa,
        )?;
        check_sensor("flow_lpm", reading.sensors.flow_lpm, self.limits.max_flow_lpm)?;
        check_sensor(
            "temperature_c",
            reading.sensors.temperature_c,
            self.limits.max_temperature_c,
        )?;

        if reading.meta.firmware_version.trim().is_empty() {
            return Err(RejectReason::MissingMeta("firmwareVersion"));
        }
        if !reading.meta.rssi_dbm.is_finite() {
            return Err(RejectReason::NonFinite { field: "rssiDbm" });
        }
        if !reading.meta.battery_v.is_finite() {
            return Err(RejectReason::NonFinite { field: "batteryV" });
        }
        if reading.meta.battery_v < 0.0 {
            return Err(RejectReason::Negative {
                field: "batteryV",
                value: reading.meta.battery_v,
            });
        }

        let ahead = reading.timestamp - now;
        if ahead > crate::clock::to_chrono(self.limits.max_clock_skew) {
            return Err(RejectReason::FutureTimestamp {
                ahead_secs: ahead.num_seconds(),
            });
        }

        if let Some(latest) = node_latest {
            let behind = latest - reading.timestamp;
            if behind > crate::clock::to_chrono(self.limits.max_backfill) {
                return Err(RejectReason::StaleTimestamp {
                    behind_secs: behind.num_seconds(),
                });
            }
        }

        Ok(())
    }
}

fn check_identity(field: &'static str, value: &str) -> Result<(), RejectReason> {
    if value.trim().is_empty() {
        Err(RejectReason::MissingIdentity(field))
    } else {
        Ok(())
    }
}

fn check_sensor(field: &'static str, value: f64, max: f64) -> Result<(), RejectReason> {
    if !value.is_finite() {
        return Err(RejectReason::NonFinite { field });
    }
    if value < 0.0 {
        return Err(RejectReason::Negative { field, value });
    }
    if value > max {
        return Err(RejectReason::OutOfRange { field, value, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReadingMeta, SensorValues};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn reading(pressure: f64) -> SensorReading {
        SensorReading {
            timestamp: now(),
            hospital_id: "HSP-001".to_string(),
            plant_id: "OXI-A".to_string(),
            node_id: "N1".to_string(),
            sensors: SensorValues {
                pressure_kpa: pressure,
                flow_lpm: 20.0,
                temperature_c: 22.0,
            },
            meta: ReadingMeta {
                firmware_version: "1.2.0".to_string(),
                rssi_dbm: -72.0,
                battery_v: 3.6,
            },
        }
    }

    #[test]
    fn test_accepts_well_formed_reading() {
        let validator = ReadingValidator::default();
        assert!(validator.validate(&reading(480.0), None, now()).is_ok());
    }

    #[test]
    fn test_rejects_negative_and_nan() {
        let validator = ReadingValidator::default();

        let err = validator.validate(&reading(-1.0), None, now()).unwrap_err();
        assert_eq!(err.label(), "negative");

        let err = validator.validate(&reading(f64::NAN), None, now()).unwrap_err();
        assert_eq!(
            err,
            RejectReason::NonFinite {
                field: "pressure_kpa"
            }
        );
    }

    #[test]
    fn test_rejects_out_of_range() {
        let validator = ReadingValidator::default();
        let err = validator.validate(&reading(5_000.0), None, now()).unwrap_err();
        assert_eq!(err.label(), "out_of_range");
    }

    #[test]
    fn test_rejects_missing_identity() {
        let validator = ReadingValidator::default();
        let mut r = reading(480.0);
        r.node_id = "  ".to_string();

        let err = validator.validate(&r, None, now()).unwrap_err();
        assert_eq!(err, RejectReason::MissingIdentity("nodeId"));
    }

    #[test]
    fn test_rejects_far_past_but_tolerates_small_reorder() {
        let validator = ReadingValidator::default();
        let latest = now();

        let mut late = reading(480.0);
        late.timestamp = latest - chrono::Duration::seconds(5);
        assert!(validator.validate(&late, Some(latest), now()).is_ok());

        late.timestamp = latest - chrono::Duration::seconds(600);
        let err = validator.validate(&late, Some(latest), now()).unwrap_err();
        assert_eq!(err, RejectReason::StaleTimestamp { behind_secs: 600 });
    }

    #[test]
    fn test_rejects_future_timestamp() {
        let validator = ReadingValidator::default();
        let mut r = reading(480.0);
        r.timestamp = now() + chrono::Duration::hours(1);

        let err = validator.validate(&r, None, now()).unwrap_err();
        assert_eq!(err, RejectReason::FutureTimestamp { ahead_secs: 3600 });
    }
}
