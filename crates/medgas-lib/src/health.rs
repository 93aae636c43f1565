//! Health check infrastructure for the telemetry service
//!
//! Component health (feed, detector, ingestion) is derived from pipeline state
//! for liveness and readiness probes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::PipelineStatus;
use crate::pipeline::Pipeline;

/// Rejection share above which ingestion is reported degraded
const REJECTION_DEGRADED_RATIO: f64 = 0.5;

/// Rejections with nothing accepted after which ingestion is unhealthy
const REJECTION_UNHEALTHY_MIN: u64 = 10;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is experiencing issues but still operational
    Degraded,
    /// Component has failed
    Unhealthy,
}

/// Information about a component's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const FEED: &str = "feed";
    pub const DETECTOR: &str = "detector";
    pub const INGESTION: &str = "ingestion";
}

/// Health registry for tracking component health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
    seen_failures: Arc<AtomicU64>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
            seen_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Update component health status
    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    /// Set readiness status
    pub async fn set_ready(&self, ready: bool) {
        let mut r = self.ready.write().await;
        *r = ready;
    }

    /// Re-derive feed, detector and ingestion health from the pipeline
    ///
    /// The detector is degraded when isolated failures occurred since the
    /// previous observation.
    pub async fn observe(&self, pipeline: &Pipeline) {
        let status = pipeline.status();
        let since = pipeline.connectivity_since();
        let previous = self
            .seen_failures
            .swap(status.detector_failures, Ordering::Relaxed);

        let feed = if status.connected {
            ComponentHealth::healthy()
        } else {
            ComponentHealth::degraded(format!(
                "Reading feed disconnected since {}",
                since.to_rfc3339()
            ))
        };

        let new_failures = status.detector_failures.saturating_sub(previous);
        let detector = if new_failures > 0 {
            ComponentHealth::degraded(format!(
                "{new_failures} isolated detector/prescription failures since last check"
            ))
        } else {
            ComponentHealth::healthy()
        };

        let mut components = self.components.write().await;
        components.insert(components::FEED.to_string(), feed);
        components.insert(components::DETECTOR.to_string(), detector);
        components.insert(components::INGESTION.to_string(), ingestion_health(&status));
    }

    /// Get health response
    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Get readiness response
    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        if !ready {
            ReadinessResponse {
                ready: false,
                reason: Some("Pipeline runner not yet started".to_string()),
            }
        } else if health.status == ComponentStatus::Unhealthy {
            ReadinessResponse {
                ready: false,
                reason: Some("Critical component unhealthy".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}

fn ingestion_health(status: &PipelineStatus) -> ComponentHealth {
    let total = status.readings_accepted + status.readings_rejected;
    if total == 0 {
        return ComponentHealth::healthy();
    }

    if status.readings_accepted == 0 && status.readings_rejected >= REJECTION_UNHEALTHY_MIN {
        return ComponentHealth::unhealthy(format!(
            "All {} readings rejected",
            status.readings_rejected
        ));
    }

    let ratio = status.readings_rejected as f64 / total as f64;
    if ratio > REJECTION_DEGRADED_RATIO {
        ComponentHealth::degraded(format!(
            "{:.0}% of readings rejected",
            ratio * 100.0
        ))
    } else {
        ComponentHealth::healthy()
    }
}
