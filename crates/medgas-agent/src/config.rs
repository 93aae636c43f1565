//! Service configuration
//!
//! Read from `MEDGAS_*` environment variables (nested keys separated by `__`,
//! e.g. `MEDGAS_FEED__MODE=http`) layered over an optional file named by
//! `MEDGAS_CONFIG`. Every field has a default.

use std::time::Duration;

use anyhow::{ensure, Result};
use medgas_lib::anomaly::AnomalyDetector;
use medgas_lib::kpi::KpiConfig;
use medgas_lib::pipeline::{PipelineConfig, RunnerConfig, SimulationConfig};
use medgas_lib::window::WindowConfig;
use serde::Deserialize;

/// Where readings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    /// Seeded generator standing in for a plant of ESP32 nodes
    Simulated,
    /// Readings are pushed over `POST /api/v1/readings`
    Http,
}

impl FeedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Simulated => "simulated",
            FeedMode::Http => "http",
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Site name attached to logs
    #[serde(default = "default_site")]
    pub site: String,

    /// API server port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub feed: FeedSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// Feed selection and runner timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub mode: FeedMode,
    /// Pending pushed readings before `POST` starts returning 503
    pub push_buffer: usize,
    pub silence_timeout_secs: u64,
    pub maintenance_interval_secs: u64,
    pub seed: u64,
    pub cadence_ms: u64,
    pub nodes: u32,
    pub hospital_id: String,
    pub plant_id: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        let simulation = SimulationConfig::default();
        Self {
            mode: FeedMode::Simulated,
            push_buffer: 1024,
            silence_timeout_secs: 30,
            maintenance_interval_secs: 5,
            seed: simulation.seed,
            cadence_ms: simulation.cadence.as_millis() as u64,
            nodes: simulation.node_count,
            hospital_id: simulation.hospital_id,
            plant_id: simulation.plant_id,
        }
    }
}

/// Window, retention and KPI sizing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub window_size: usize,
    pub max_nodes: usize,
    pub staleness_secs: u64,
    pub eviction_secs: u64,
    pub alert_capacity: usize,
    pub recent_capacity: usize,
    pub kpi_trailing_readings: usize,
    pub uptime_horizon_secs: u64,
    /// Also run the flow-surge and temperature-rise rules
    pub extended_rules: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window_size: 20,
            max_nodes: 1024,
            staleness_secs: 60,
            eviction_secs: 15 * 60,
            alert_capacity: 20,
            recent_capacity: 50,
            kpi_trailing_readings: 10,
            uptime_horizon_secs: 24 * 60 * 60,
            extended_rules: false,
        }
    }
}

fn default_site() -> String {
    std::env::var("SITE_NAME").unwrap_or_else(|_| "HSP-001".to_string())
}

fn default_api_port() -> u16 {
    8080
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            site: default_site(),
            api_port: default_api_port(),
            feed: FeedSettings::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the optional file and the environment
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var("MEDGAS_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("MEDGAS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Self::from_config(builder.build()?)
    }

    /// Deserialize and validate an already-built source stack
    pub fn from_config(source: config::Config) -> Result<Self> {
        let config: AgentConfig = source.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        ensure!(p.window_size >= 2, "pipeline.window_size must be at least 2");
        ensure!(p.max_nodes > 0, "pipeline.max_nodes must be positive");
        ensure!(p.alert_capacity > 0, "pipeline.alert_capacity must be positive");
        ensure!(p.recent_capacity > 0, "pipeline.recent_capacity must be positive");
        ensure!(
            p.kpi_trailing_readings > 0,
            "pipeline.kpi_trailing_readings must be positive"
        );
        ensure!(
            self.feed.maintenance_interval_secs > 0,
            "feed.maintenance_interval_secs must be positive"
        );
        ensure!(self.feed.nodes > 0, "feed.nodes must be positive");
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let p = &self.pipeline;
        PipelineConfig {
            site: self.site.clone(),
            window: WindowConfig {
                capacity: p.window_size,
                max_nodes: p.max_nodes,
                staleness_horizon: Duration::from_secs(p.staleness_secs),
                eviction_horizon: Duration::from_secs(p.eviction_secs),
            },
            kpi: KpiConfig {
                trailing_readings: p.kpi_trailing_readings,
                ..KpiConfig::default()
            },
            alert_capacity: p.alert_capacity,
            recent_capacity: p.recent_capacity,
            uptime_horizon: Duration::from_secs(p.uptime_horizon_secs),
            ..PipelineConfig::default()
        }
    }

    pub fn detector(&self) -> AnomalyDetector {
        if self.pipeline.extended_rules {
            AnomalyDetector::with_extended_rules()
        } else {
            AnomalyDetector::default()
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            silence_timeout: Duration::from_secs(self.feed.silence_timeout_secs),
            maintenance_interval: Duration::from_secs(self.feed.maintenance_interval_secs),
        }
    }

    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            seed: self.feed.seed,
            hospital_id: self.feed.hospital_id.clone(),
            plant_id: self.feed.plant_id.clone(),
            node_count: self.feed.nodes,
            cadence: Duration::from_millis(self.feed.cadence_ms),
            ..SimulationConfig::default()
        }
    }
}
