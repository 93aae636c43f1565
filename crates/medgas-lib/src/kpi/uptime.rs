//! Feed connectivity history
//!
//! Tracks connected/disconnected spans so uptime is a real duration ratio over
//! an observation horizon rather than a function of the instantaneous flag.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::to_chrono;

/// Default observation horizon for the uptime ratio (24 hours)
const DEFAULT_HORIZON_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy)]
struct Span {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    connected: bool,
}

/// Connectivity flag with duration bookkeeping
#[derive(Debug, Clone)]
pub struct ConnectivityTracker {
    horizon: Duration,
    tracking_since: DateTime<Utc>,
    connected: bool,
    state_since: DateTime<Utc>,
    closed: VecDeque<Span>,
}

impl ConnectivityTracker {
    /// Start tracking at `now` in the given state
    pub fn new(connected: bool, now: DateTime<Utc>) -> Self {
        Self {
            horizon: Duration::from_secs(DEFAULT_HORIZON_SECS),
            tracking_since: now,
            connected,
            state_since: now,
            closed: VecDeque::new(),
        }
    }

    pub fn with_horizon(mut self, horizon: Duration) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Instant the current state began
    pub fn state_since(&self) -> DateTime<Utc> {
        self.state_since
    }

    /// Record the connectivity state at `now`; returns true when it changed
    pub fn set(&mut self, connected: bool, now: DateTime<Utc>) -> bool {
        if connected == self.connected {
            return false;
        }

        let start = self.state_since;
        self.closed.push_back(Span {
            start,
            end: now.max(start),
            connected: self.connected,
        });
        self.connected = connected;
        self.state_since = now.max(start);

        let cutoff = now - to_chrono(self.horizon);
        while let Some(span) = self.closed.front() {
            if span.end < cutoff {
                self.closed.pop_front();
            } else {
                break;
            }
        }

        true
    }

    /// Percentage of observed time spent connected within the horizon
    ///
    /// The observation window is clipped to when tracking began. With no
    /// elapsed time the current state decides: 100 when connected, 0 otherwise.
    pub fn uptime_percent(&self, now: DateTime<Utc>) -> f64 {
        let window_start = (now - to_chrono(self.horizon)).max(self.tracking_since);
        let total = (now - window_start).num_milliseconds();
        if total <= 0 {
            return if self.connected { 100.0 } else { 0.0 };
        }

        let overlap = |start: DateTime<Utc>, end: DateTime<Utc>| -> i64 {
            let s = start.max(window_start);
            let e = end.min(now);
            (e - s).num_milliseconds().max(0)
        };

        let mut connected_ms: i64 = self
            .closed
            .iter()
            .filter(|span| span.connected)
            .map(|span| overlap(span.start, span.end))
            .sum();
        if self.connected {
            connected_ms += overlap(self.state_since, now);
        }

        (connected_ms as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    #[test]
    fn test_no_elapsed_time_uses_current_state() {
        let tracker = ConnectivityTracker::new(true, at(0));
        assert_eq!(tracker.uptime_percent(at(0)), 100.0);

        let tracker = ConnectivityTracker::new(false, at(0));
        assert_eq!(tracker.uptime_percent(at(0)), 0.0);
    }

    #[test]
    fn test_duration_ratio() {
        let mut tracker = ConnectivityTracker::new(true, at(0));
        assert!(tracker.set(false, at(90)));
        assert!(tracker.set(true, at(100)));

        // 90 + 20 connected minutes out of 120
        let uptime = tracker.uptime_percent(at(120));
        assert!((uptime - 110.0 / 120.0 * 100.0).abs() < 1e-9);
        assert!(tracker.is_connected());
        assert_eq!(tracker.state_since(), at(100));
    }

    #[test]
    fn test_repeated_state_is_not_a_transition() {
        let mut tracker = ConnectivityTracker::new(true, at(0));
        assert!(!tracker.set(true, at(5)));
        assert!(tracker.is_connected());
        assert_eq!(tracker.state_since(), at(0));
    }

    #[test]
    fn test_horizon_forgets_old_outages() {
        let mut tracker =
            ConnectivityTracker::new(true, at(0)).with_horizon(Duration::from_secs(60 * 60));
        tracker.set(false, at(10));
        tracker.set(true, at(20));

        // Outage ended well before the one-hour horizon
        assert_eq!(tracker.uptime_percent(at(200)), 100.0);
    }

    #[test]
    fn test_currently_disconnected() {
        let mut tracker = ConnectivityTracker::new(true, at(0));
        tracker.set(false, at(30));

        let uptime = tracker.uptime_percent(at(60));
        assert!((uptime - 50.0).abs() < 1e-9);
        assert!(!tracker.is_connected());
    }
}
