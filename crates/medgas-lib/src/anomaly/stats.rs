//! Window statistics feeding the detection rules

use crate::clock::seconds_between;
use crate::models::{Metric, SensorReading};

/// Floor below which a standard deviation is treated as zero
pub const STD_DEV_EPSILON: f64 = 1e-6;

/// Baseline statistics for one metric over a node's window
///
/// The baseline excludes the newest reading so that the newest value can be
/// scored against what came before it.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStats {
    /// Metric the statistics were computed for
    pub metric: Metric,
    /// Newest value in the window
    pub latest: f64,
    /// Mean of the baseline (window minus newest)
    pub mean: f64,
    /// Sample standard deviation of the baseline
    pub std_dev: f64,
    /// Number of readings in the baseline
    pub baseline_count: usize,
    /// Rate of change between the two most recent readings, per second
    pub rate_per_sec: f64,
    /// Time span covered by the whole window
    pub window_seconds: f64,
}

impl WindowStats {
    /// Compute statistics for `metric` over an ordered window
    ///
    /// # Returns
    /// * `None` when the window holds fewer than two readings or the two newest
    ///   readings share a timestamp (no usable rate of change)
    pub fn compute(window: &[SensorReading], metric: Metric) -> Option<Self> {
        if window.len() < 2 {
            return None;
        }

        let (newest, baseline) = window.split_last()?;
        let previous = baseline.last()?;

        let dt = seconds_between(previous.timestamp, newest.timestamp);
        if dt <= 0.0 {
            return None;
        }

        let latest = newest.metric(metric);
        let rate_per_sec = (latest - previous.metric(metric)) / dt;

        let count = baseline.len();
        let mean = baseline.iter().map(|r| r.metric(metric)).sum::<f64>() / count as f64;

        // Two-pass sample variance (Bessel's correction)
        let std_dev = if count > 1 {
            let variance = baseline
                .iter()
                .map(|r| (r.metric(metric) - mean).powi(2))
                .sum::<f64>()
                / (count - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        let window_seconds = window
            .first()
            .map(|oldest| seconds_between(oldest.timestamp, newest.timestamp))
            .unwrap_or(0.0);

        Some(Self {
            metric,
            latest,
            mean,
            std_dev,
            baseline_count: count,
            rate_per_sec,
            window_seconds,
        })
    }

    /// Z-score of the newest value against the baseline
    ///
    /// Degenerate baselines (σ below [`STD_DEV_EPSILON`]) carry no statistical
    /// signal and score 0. Only the feature is clamped: rules still fire on
    /// level and trend, so a flat baseline followed by a sharp drop alerts.
    pub fn z_score(&self) -> f64 {
        if self.std_dev < STD_DEV_EPSILON {
            return 0.0;
        }
        (self.latest - self.mean) / self.std_dev
    }
}
