//! Telemetry service: configuration and HTTP surface for the pipeline

pub mod api;
pub mod config;
