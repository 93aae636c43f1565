//! Medical-gas telemetry pipeline
//!
//! This crate provides the core functionality for:
//! - Ingestion-time validation of sensor readings
//! - Per-node sliding windows
//! - Rule-based anomaly detection with prescriptive remediation
//! - Bounded alert history and fleet KPIs
//! - Pipeline orchestration over pluggable reading feeds
//! - Health checks and observability

pub mod anomaly;
pub mod clock;
pub mod error;
pub mod health;
pub mod kpi;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod validation;
pub mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DetectionError, FeedError, RejectReason};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
pub use pipeline::{IngestOutcome, Pipeline, PipelineConfig, PipelineEvent};
