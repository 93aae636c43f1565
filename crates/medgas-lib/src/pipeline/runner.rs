//! Feed-driving loop
//!
//! Pulls events from a reading feed into the pipeline until shutdown or until
//! the feed ends, marks the feed disconnected after a silence timeout and runs
//! periodic maintenance (idle-window eviction, KPI refresh).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::feed::{FeedEvent, ReadingFeed};
use super::Pipeline;

/// Configuration for the pipeline runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Mark the feed disconnected after this long without events (default: 30 seconds)
    pub silence_timeout: Duration,
    /// Interval between maintenance passes (default: 5 seconds)
    pub maintenance_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            silence_timeout: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(5),
        }
    }
}

/// Counters for one runner lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub accepted: u64,
    pub rejected: u64,
    pub alerts: u64,
    pub silences: u64,
}

/// Drives a feed into a shared pipeline
pub struct PipelineRunner {
    feed: Box<dyn ReadingFeed>,
    pipeline: Arc<Pipeline>,
    config: RunnerConfig,
}

impl PipelineRunner {
    pub fn new(feed: Box<dyn ReadingFeed>, pipeline: Arc<Pipeline>, config: RunnerConfig) -> Self {
        Self {
            feed,
            pipeline,
            config,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Run until a shutdown signal arrives or the feed ends
    ///
    /// A feed that ends is treated as a disconnection; pipeline state is kept.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> RunStats {
        info!(
            feed = %self.feed.name(),
            silence_timeout_secs = self.config.silence_timeout.as_secs(),
            maintenance_interval_secs = self.config.maintenance_interval.as_secs(),
            "Starting pipeline runner"
        );

        let mut stats = RunStats::default();
        let mut maintenance = interval(self.config.maintenance_interval);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        maintenance.tick().await;

        let silence = sleep(self.config.silence_timeout);
        tokio::pin!(silence);
        let mut silence_armed = true;

        loop {
            tokio::select! {
                event = self.feed.next_event() => {
                    match event {
                        Some(event) => {
                            self.apply(event, &mut stats);
                            silence.as_mut().reset(Instant::now() + self.config.silence_timeout);
                            silence_armed = true;
                        }
                        None => {
                            info!(feed = %self.feed.name(), "Reading feed ended");
                            self.pipeline.set_connected(false);
                            break;
                        }
                    }
                }
                _ = &mut silence, if silence_armed => {
                    warn!(
                        timeout_secs = self.config.silence_timeout.as_secs(),
                        "No feed events within silence timeout"
                    );
                    stats.silences += 1;
                    silence_armed = false;
                    self.pipeline.set_connected(false);
                }
                _ = maintenance.tick() => {
                    let evicted = self.pipeline.maintain();
                    if evicted > 0 {
                        debug!(evicted, "Maintenance pass evicted idle nodes");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down pipeline runner");
                    break;
                }
            }
        }

        stats
    }

    fn apply(&self, event: FeedEvent, stats: &mut RunStats) {
        match event {
            FeedEvent::Reading(reading) => {
                if !self.pipeline.is_connected() {
                    self.pipeline.set_connected(true);
                }
                match self.pipeline.ingest(reading) {
                    Ok(outcome) => {
                        stats.accepted += 1;
                        if outcome.alert.is_some() {
                            stats.alerts += 1;
                        }
                    }
                    Err(_) => stats.rejected += 1,
                }
            }
            FeedEvent::Connectivity(connected) => {
                self.pipeline.set_connected(connected);
            }
        }
    }
}

/// Builder for creating the pipeline runner
pub struct PipelineRunnerBuilder {
    feed: Option<Box<dyn ReadingFeed>>,
    pipeline: Option<Arc<Pipeline>>,
    config: RunnerConfig,
}

impl PipelineRunnerBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            feed: None,
            pipeline: None,
            config: RunnerConfig::default(),
        }
    }

    pub fn feed(mut self, feed: Box<dyn ReadingFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn pipeline(mut self, pipeline: Arc<Pipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn silence_timeout(mut self, timeout: Duration) -> Self {
        self.config.silence_timeout = timeout;
        self
    }

    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.config.maintenance_interval = interval;
        self
    }

    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the runner
    pub fn build(self) -> Result<PipelineRunner> {
        let feed = self
            .feed
            .ok_or_else(|| anyhow::anyhow!("Reading feed is required"))?;
        let pipeline = self
            .pipeline
            .ok_or_else(|| anyhow::anyhow!("Pipeline is required"))?;

        if self.config.maintenance_interval.is_zero() {
            anyhow::bail!("Maintenance interval must be non-zero");
        }

        Ok(PipelineRunner::new(feed, pipeline, self.config))
    }
}

impl Default for PipelineRunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
