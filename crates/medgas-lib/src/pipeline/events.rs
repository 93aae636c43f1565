//! Events published to pipeline subscribers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Alert, KpiSnapshot, SensorReading};

/// One observable change, in commit order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum PipelineEvent {
    /// Echo of an accepted reading
    Reading(SensorReading),
    Alert(Alert),
    Kpi(KpiSnapshot),
    Connectivity {
        connected: bool,
        at: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Event name used for SSE framing
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::Reading(_) => "reading",
            PipelineEvent::Alert(_) => "alert",
            PipelineEvent::Kpi(_) => "kpi",
            PipelineEvent::Connectivity { .. } => "connectivity",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_connectivity_event_shape() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let event = PipelineEvent::Connectivity {
            connected: false,
            at,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "connectivity");
        assert_eq!(json["data"]["connected"], false);
        assert_eq!(event.kind(), "connectivity");
    }
}
