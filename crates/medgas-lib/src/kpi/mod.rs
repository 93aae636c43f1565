//! Fleet KPI aggregation
//!
//! Rolls recent readings, node liveness, alert history and feed connectivity
//! up into the six dashboard indicators.

mod aggregator;
mod uptime;

pub use aggregator::{KpiAggregator, KpiConfig, KpiInputs, KpiThresholds};
pub use uptime::ConnectivityTracker;
