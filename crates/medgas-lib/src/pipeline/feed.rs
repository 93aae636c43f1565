//! Reading feeds
//!
//! A feed is the pipeline's only suspension point. Implementations:
//! - [`ChannelFeed`]: push transport, fed by a [`FeedSender`] (e.g. the HTTP API)
//! - [`ScriptedFeed`]: fixed sequence of events for tests and replays
//! - [`SimulatedFeed`]: seeded generator that mimics a plant of ESP32 nodes

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::clock::Clock;
use crate::error::FeedError;
use crate::models::{ReadingMeta, SensorReading, SensorValues};

/// Something a feed can produce
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Reading(SensorReading),
    /// Transport-level connectivity change reported by the source itself
    Connectivity(bool),
}

/// Source of sensor readings
#[async_trait]
pub trait ReadingFeed: Send {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Wait for the next event; `None` once the feed is exhausted or closed
    async fn next_event(&mut self) -> Option<FeedEvent>;
}

/// Cloneable handle that pushes readings into a [`ChannelFeed`]
#[derive(Debug, Clone)]
pub struct FeedSender {
    tx: mpsc::Sender<FeedEvent>,
}

impl FeedSender {
    /// Queue a reading without waiting; fails if the feed is full or gone
    pub fn push(&self, reading: SensorReading) -> Result<(), FeedError> {
        self.tx
            .try_send(FeedEvent::Reading(reading))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => FeedError::Full,
                mpsc::error::TrySendError::Closed(_) => FeedError::Closed,
            })
    }
}

/// Feed backed by a bounded mpsc channel
pub struct ChannelFeed {
    rx: mpsc::Receiver<FeedEvent>,
}

impl ChannelFeed {
    /// Create a feed and the sender that fills it
    pub fn channel(buffer: usize) -> (FeedSender, ChannelFeed) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (FeedSender { tx }, ChannelFeed { rx })
    }
}

#[async_trait]
impl ReadingFeed for ChannelFeed {
    fn name(&self) -> &str {
        "channel"
    }

    async fn next_event(&mut self) -> Option<FeedEvent> {
        self.rx.recv().await
    }
}

/// Replays a fixed list of events, then ends
#[derive(Debug, Default)]
pub struct ScriptedFeed {
    events: VecDeque<FeedEvent>,
}

impl ScriptedFeed {
    pub fn new(events: impl IntoIterator<Item = FeedEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    pub fn from_readings(readings: impl IntoIterator<Item = SensorReading>) -> Self {
        Self::new(readings.into_iter().map(FeedEvent::Reading))
    }
}

#[async_trait]
impl ReadingFeed for ScriptedFeed {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn next_event(&mut self) -> Option<FeedEvent> {
        self.events.pop_front()
    }
}

/// Tunables for the simulated plant
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub seed: u64,
    pub hospital_id: String,
    pub plant_id: String,
    pub node_count: u32,
    /// Time between readings; zero emits as fast as polled
    pub cadence: Duration,
    pub base_pressure_kpa: f64,
    /// Peak-to-peak noise around the base pressure
    pub pressure_noise_kpa: f64,
    /// Chance per reading of a pressure drop
    pub drop_probability: f64,
    /// Largest simulated drop
    pub max_drop_kpa: f64,
    /// Chance per tick of a short connectivity blip
    pub disconnect_probability: f64,
    /// Stop after this many readings (`None` runs forever)
    pub limit: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED_0F_0A,
            hospital_id: "HSP-001".to_string(),
            plant_id: "OXI-A".to_string(),
            node_count: 20,
            cadence: Duration::from_secs(2),
            base_pressure_kpa: 480.0,
            pressure_noise_kpa: 20.0,
            drop_probability: 0.05,
            max_drop_kpa: 50.0,
            disconnect_probability: 0.02,
            limit: None,
        }
    }
}

/// Uniform in [lo, hi); degenerate ranges collapse to `lo`
fn sample(rng: &mut StdRng, lo: f64, hi: f64) -> f64 {
    if hi > lo {
        rng.gen_range(lo..hi)
    } else {
        lo
    }
}

/// Seeded generator of plausible plant readings
///
/// Each tick picks a random node, samples pressure around the base with
/// occasional drops, and sometimes reports a short connectivity blip which is
/// restored on the following tick.
pub struct SimulatedFeed {
    config: SimulationConfig,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    ticker: Option<Interval>,
    pending: VecDeque<FeedEvent>,
    emitted: u64,
}

impl SimulatedFeed {
    pub fn new(config: SimulationConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            clock,
            ticker: None,
            pending: VecDeque::new(),
            emitted: 0,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn generate(&mut self) -> SensorReading {
        let c = &self.config;
        let rng = &mut self.rng;
        let node = rng.gen_range(1..=c.node_count.max(1));

        let half_noise = c.pressure_noise_kpa / 2.0;
        let mut pressure = c.base_pressure_kpa + sample(rng, -half_noise, half_noise);
        if rng.gen_bool(c.drop_probability.clamp(0.0, 1.0)) {
            pressure -= sample(rng, 0.0, c.max_drop_kpa);
        }

        SensorReading {
            timestamp: self.clock.now(),
            hospital_id: c.hospital_id.clone(),
            plant_id: c.plant_id.clone(),
            node_id: format!("ESP32-{node}"),
            sensors: SensorValues {
                pressure_kpa: pressure.max(0.0),
                flow_lpm: rng.gen_range(15.0..25.0),
                temperature_c: rng.gen_range(20.0..28.0),
            },
            meta: ReadingMeta {
                firmware_version: "1.2.0".to_string(),
                rssi_dbm: rng.gen_range(-100.0..-60.0),
                battery_v: rng.gen_range(3.2..4.0),
            },
        }
    }

    async fn wait_for_tick(&mut self) {
        if self.config.cadence.is_zero() {
            return;
        }
        let cadence = self.config.cadence;
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = interval(cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        ticker.tick().await;
    }
}

#[async_trait]
impl ReadingFeed for SimulatedFeed {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn next_event(&mut self) -> Option<FeedEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        if self.config.limit.is_some_and(|limit| self.emitted >= limit) {
            return None;
        }

        self.wait_for_tick().await;
        self.emitted += 1;
        let reading = self.generate();

        if self
            .rng
            .gen_bool(self.config.disconnect_probability.clamp(0.0, 1.0))
        {
            // Blip: drop now, come back with this tick's reading
            self.pending.push_back(FeedEvent::Connectivity(true));
            self.pending.push_back(FeedEvent::Reading(reading));
            return Some(FeedEvent::Connectivity(false));
        }

        Some(FeedEvent::Reading(reading))
    }
}
