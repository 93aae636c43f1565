//! Bounded store of emitted alerts
//!
//! Handles:
//! - Building alerts from anomalies with unique identifiers
//! - Retaining the K most recent alerts, newest first
//! - Trailing-window counts for the alert-rate KPI

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{Alert, Anomaly, Prescription};

/// Default number of retained alerts
const DEFAULT_CAPACITY: usize = 20;

/// Generates process-unique alert identifiers
#[derive(Debug, Default)]
pub struct AlertIdGenerator {
    sequence: AtomicU64,
}

impl AlertIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next identifier, e.g. `ALT-18c2a1f0e00-000007`
    pub fn next_id(&self, timestamp: DateTime<Utc>) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("ALT-{:x}-{:06}", timestamp.timestamp_millis(), seq)
    }

    /// Build an alert from a detected anomaly
    pub fn build(&self, anomaly: Anomaly, prescription: Option<Prescription>) -> Alert {
        Alert {
            id: self.next_id(anomaly.timestamp),
            timestamp: anomaly.timestamp,
            severity: anomaly.severity,
            alert_type: anomaly.anomaly_type,
            context: anomaly.context,
            evidence: anomaly.evidence,
            prescription,
        }
    }
}

/// Newest-first bounded alert store
///
/// Writers serialize on a lock and publish a fresh immutable snapshot; readers
/// only clone the current snapshot handle, so they never see a half-applied
/// insert.
pub struct AlertSink {
    capacity: usize,
    snapshot: RwLock<Arc<Vec<Alert>>>,
    write_lock: Mutex<()>,
}

impl AlertSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            snapshot: RwLock::new(Arc::new(Vec::new())),
            write_lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert an alert at the front, truncating beyond capacity
    pub fn record(&self, alert: Alert) {
        let _writer = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let current = self.snapshot();
        let mut next = Vec::with_capacity(self.capacity);
        next.push(alert);
        next.extend(current.iter().take(self.capacity - 1).cloned());

        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
    }

    /// Immutable view of all retained alerts, newest first
    pub fn snapshot(&self) -> Arc<Vec<Alert>> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Up to `limit` alerts, newest first
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        self.snapshot().iter().take(limit).cloned().collect()
    }

    /// Number of retained alerts stamped within `window` before `now`
    pub fn count_since(&self, window: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - crate::clock::to_chrono(window);
        self.snapshot()
            .iter()
            .filter(|a| a.timestamp > cutoff && a.timestamp <= now)
            .count()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl Default for AlertSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertContext, AnomalyEvidence, Severity};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn anomaly_at(offset_secs: i64) -> Anomaly {
        Anomaly {
            anomaly_type: "pressure_drop_anomaly".to_string(),
            severity: Severity::High,
            context: AlertContext {
                hospital_id: "HSP-001".to_string(),
                plant_id: "OXI-A".to_string(),
                node_id: "N1".to_string(),
            },
            timestamp: t0() + chrono::Duration::seconds(offset_secs),
            evidence: AnomalyEvidence {
                score: 0.9,
                window_seconds: 2.0,
                features: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn test_retains_most_recent_k_newest_first() {
        let ids = AlertIdGenerator::new();
        let sink = AlertSink::new(20);

        let mut emitted = Vec::new();
        for i in 0..25 {
            let alert = ids.build(anomaly_at(i), None);
            emitted.push(alert.id.clone());
            sink.record(alert);
        }

        let retained = sink.recent(usize::MAX);
        assert_eq!(retained.len(), 20);

        let expected: Vec<String> = emitted.iter().rev().take(20).cloned().collect();
        let actual: Vec<String> = retained.iter().map(|a| a.id.clone()).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_recent_respects_limit() {
        let ids = AlertIdGenerator::new();
        let sink = AlertSink::default();
        for i in 0..5 {
            sink.record(ids.build(anomaly_at(i), None));
        }

        let recent = sink.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp, t0() + chrono::Duration::seconds(4));
    }

    #[test]
    fn test_ids_are_unique() {
        let ids = AlertIdGenerator::new();
        let a = ids.next_id(t0());
        let b = ids.next_id(t0());
        assert_ne!(a, b);
        assert!(a.starts_with("ALT-"));
    }

    #[test]
    fn test_count_since_trailing_hour() {
        let ids = AlertIdGenerator::new();
        let sink = AlertSink::default();

        // Minutes 0, 30, 70, 100 past t0
        for minutes in [0, 30, 70, 100] {
            sink.record(ids.build(anomaly_at(minutes * 60), None));
        }

        let hour = Duration::from_secs(3600);
        let now = t0() + chrono::Duration::minutes(110);
        assert_eq!(sink.count_since(hour, now), 2);

        let later = t0() + chrono::Duration::minutes(200);
        assert_eq!(sink.count_since(hour, later), 0);

        assert_eq!(sink.count_since(hour, t0() + chrono::Duration::minutes(31)), 2);
    }

    #[test]
    fn test_snapshot_is_immutable_after_insert() {
        let ids = AlertIdGenerator::new();
        let sink = AlertSink::default();
        sink.record(ids.build(anomaly_at(0), None));

        let before = sink.snapshot();
        sink.record(ids.build(anomaly_at(1), None));

        assert_eq!(before.len(), 1);
        assert_eq!(sink.len(), 2);
    }
}
