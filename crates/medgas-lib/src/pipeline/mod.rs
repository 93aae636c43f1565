//! Pipeline orchestration
//!
//! Each accepted reading flows validate → window → detect → prescribe → alert
//! sink → KPI, and the resulting reading echo, alert and KPI snapshot are
//! published to subscribers in commit order.

mod events;
mod feed;
mod runner;

pub use events::PipelineEvent;
pub use feed::{
    ChannelFeed, FeedEvent, FeedSender, ReadingFeed, ScriptedFeed, SimulatedFeed,
    SimulationConfig,
};
pub use runner::{PipelineRunner, PipelineRunnerBuilder, RunStats, RunnerConfig};

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::anomaly::{
    panic_message, AlertIdGenerator, AlertSink, AnomalyDetector, PrescriptionMapper,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{DetectionError, RejectReason};
use crate::kpi::{ConnectivityTracker, KpiAggregator, KpiConfig, KpiInputs};
use crate::models::{
    Alert, KpiSnapshot, NodeState, NodeSummary, PipelineStatus, Prescription, SensorReading,
};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::validation::{ReadingValidator, ValidationLimits};
use crate::window::{WindowConfig, WindowStore};

/// Configuration for the pipeline core
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Site name attached to structured logs
    pub site: String,
    pub window: WindowConfig,
    pub validation: ValidationLimits,
    pub kpi: KpiConfig,
    /// Number of alerts retained (default: 20)
    pub alert_capacity: usize,
    /// Number of readings in the global recent log (default: 50)
    pub recent_capacity: usize,
    /// Subscriber buffer; slow subscribers lag beyond this
    pub event_buffer: usize,
    /// Observation horizon for the uptime ratio (default: 24 hours)
    pub uptime_horizon: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            site: "HSP-001".to_string(),
            window: WindowConfig::default(),
            validation: ValidationLimits::default(),
            kpi: KpiConfig::default(),
            alert_capacity: 20,
            recent_capacity: 50,
            event_buffer: 256,
            uptime_horizon: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// What happened to an accepted reading
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// Pipeline revision after the reading was committed
    pub revision: u64,
    /// Readings held for the node after the update
    pub window_len: usize,
    pub alert: Option<Alert>,
    /// Detector or prescription failures isolated while processing
    pub failures: usize,
}

/// State mutated under the commit lock
struct CommitState {
    recent: VecDeque<SensorReading>,
    revision: u64,
    aggregator: KpiAggregator,
    connectivity: ConnectivityTracker,
}

/// The telemetry pipeline core
///
/// Shared behind an `Arc` by the runner and the API. Window updates run on the
/// store's per-node partitions; the alert sink, recent log and KPI state change
/// under a single commit lock so subscribers observe one consistent order.
pub struct Pipeline {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    validator: ReadingValidator,
    store: WindowStore,
    detector: AnomalyDetector,
    mapper: PrescriptionMapper,
    alerts: AlertSink,
    alert_ids: AlertIdGenerator,
    state: Mutex<CommitState>,
    events: broadcast::Sender<PipelineEvent>,
    kpis: watch::Sender<KpiSnapshot>,
    accepted: AtomicU64,
    rejected: AtomicU64,
    alerts_emitted: AtomicU64,
    stage_failures: AtomicU64,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl Pipeline {
    /// Create a pipeline on the wall clock
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a pipeline reading time from `clock`
    pub fn with_clock(config: PipelineConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let store = WindowStore::new(config.window.clone());
        let alerts = AlertSink::new(config.alert_capacity);
        let connectivity =
            ConnectivityTracker::new(true, now).with_horizon(config.uptime_horizon);
        let mut aggregator = KpiAggregator::new(config.kpi.clone());

        let initial = aggregator.snapshot(KpiInputs {
            recent: &[],
            store: &store,
            alerts: &alerts,
            uptime_percent: connectivity.uptime_percent(now),
            now,
            revision: 0,
        });
        let (kpis, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(config.event_buffer.max(1));

        let metrics = PipelineMetrics::new();
        metrics.set_feed_connected(true);

        Self {
            validator: ReadingValidator::new(config.validation.clone()),
            logger: StructuredLogger::new(config.site.clone()),
            store,
            detector: AnomalyDetector::default(),
            mapper: PrescriptionMapper::default(),
            alerts,
            alert_ids: AlertIdGenerator::new(),
            state: Mutex::new(CommitState {
                recent: VecDeque::with_capacity(config.recent_capacity),
                revision: 0,
                aggregator,
                connectivity,
            }),
            events,
            kpis,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            alerts_emitted: AtomicU64::new(0),
            stage_failures: AtomicU64::new(0),
            metrics,
            config,
            clock,
        }
    }

    /// Replace the detection rules
    pub fn with_detector(mut self, detector: AnomalyDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Replace the prescription table and actuator catalog
    pub fn with_mapper(mut self, mapper: PrescriptionMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    /// Apply one reading
    ///
    /// Rejected readings are counted and logged and never stored. Detector and
    /// prescription failures degrade to "no anomaly"/"no prescription"; the
    /// reading itself is always kept once validated.
    pub fn ingest(&self, reading: SensorReading) -> Result<IngestOutcome, RejectReason> {
        let started = Instant::now();
        let now = self.clock.now();
        let mut failures = 0;

        let node_latest = self.store.last_timestamp(&reading.node_id);
        if let Err(reason) = self.validator.validate(&reading, node_latest, now) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            self.metrics.inc_readings_rejected(&reason);
            self.logger.log_rejection(&reading.node_id, &reason);
            return Err(reason);
        }

        let recorded = self.store.record(reading.clone());
        let window_len = recorded.window.len();

        // A late reading leaves the newest sample unchanged, and that sample
        // was already evaluated when it arrived
        let anomaly = if recorded.is_newest {
            let detection = self.detector.detect(&recorded.window);
            for error in &detection.failures {
                self.record_failure("detector", &reading.node_id, error);
            }
            failures = detection.failures.len();
            detection.anomaly
        } else {
            debug!(node_id = %reading.node_id, "Late reading stored without detection");
            None
        };

        let alert = anomaly.map(|anomaly| {
            let prescription = match self.prescribe(&anomaly) {
                Ok(p) => p,
                Err(error) => {
                    failures += 1;
                    self.record_failure("prescription", &reading.node_id, &error);
                    None
                }
            };
            self.alert_ids.build(anomaly, prescription)
        });

        let revision = {
            let mut state = self.lock_state();
            state.recent.push_back(reading.clone());
            while state.recent.len() > self.config.recent_capacity {
                state.recent.pop_front();
            }
            state.revision += 1;

            if let Some(alert) = &alert {
                self.alerts.record(alert.clone());
            }

            let snapshot = self.snapshot_locked(&mut state, now);
            self.kpis.send_replace(snapshot.clone());

            self.publish(PipelineEvent::Reading(reading));
            if let Some(alert) = &alert {
                self.publish(PipelineEvent::Alert(alert.clone()));
            }
            self.publish(PipelineEvent::Kpi(snapshot.clone()));

            self.metrics.set_avg_pressure(snapshot.values.avg_pressure);
            self.metrics
                .set_nodes(self.store.len(), snapshot.values.active_nodes);
            state.revision
        };

        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_readings_ingested();
        if let Some(alert) = &alert {
            self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
            self.metrics.inc_alerts_emitted(alert.severity);
            self.logger.log_alert(alert);
        }
        self.metrics
            .observe_ingest_latency(started.elapsed().as_secs_f64());

        Ok(IngestOutcome {
            revision,
            window_len,
            alert,
            failures,
        })
    }

    /// Record the feed connectivity state; returns true on a transition
    pub fn set_connected(&self, connected: bool) -> bool {
        let now = self.clock.now();
        let mut state = self.lock_state();
        if !state.connectivity.set(connected, now) {
            return false;
        }
        state.revision += 1;

        let uptime = state.connectivity.uptime_percent(now);
        let snapshot = self.snapshot_locked(&mut state, now);
        self.kpis.send_replace(snapshot.clone());
        self.publish(PipelineEvent::Connectivity { connected, at: now });
        self.publish(PipelineEvent::Kpi(snapshot));
        drop(state);

        self.metrics.set_feed_connected(connected);
        self.logger.log_connectivity(connected, uptime);
        true
    }

    pub fn is_connected(&self) -> bool {
        self.lock_state().connectivity.is_connected()
    }

    /// KPI snapshot computed now at the current revision
    pub fn kpis(&self) -> KpiSnapshot {
        let now = self.clock.now();
        let mut state = self.lock_state();
        self.snapshot_locked(&mut state, now)
    }

    /// Recompute KPIs for time-driven changes (staleness, uptime, alert rate)
    ///
    /// Publishes a KPI event only when the rollups differ from the last
    /// published snapshot.
    pub fn refresh_kpis(&self) -> KpiSnapshot {
        let now = self.clock.now();
        let mut state = self.lock_state();
        let snapshot = self.snapshot_locked(&mut state, now);

        let changed = self.kpis.borrow().values != snapshot.values;
        self.kpis.send_replace(snapshot.clone());
        if changed {
            self.publish(PipelineEvent::Kpi(snapshot.clone()));
        }
        drop(state);

        self.metrics.set_avg_pressure(snapshot.values.avg_pressure);
        self.metrics
            .set_nodes(self.store.len(), snapshot.values.active_nodes);
        snapshot
    }

    /// Evict idle windows and refresh KPIs; returns the number of evicted nodes
    pub fn maintain(&self) -> usize {
        let evicted = self.store.evict_idle(self.clock.now());
        self.refresh_kpis();
        evicted
    }

    /// Subscribe to reading, alert, KPI and connectivity events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Watch the latest published KPI snapshot
    pub fn watch_kpis(&self) -> watch::Receiver<KpiSnapshot> {
        self.kpis.subscribe()
    }

    /// Latest readings, newest first, optionally for one node
    pub fn recent_readings(&self, limit: usize, node_id: Option<&str>) -> Vec<SensorReading> {
        match node_id {
            Some(node) => self
                .store
                .window_for(node)
                .into_iter()
                .rev()
                .take(limit)
                .collect(),
            None => self
                .lock_state()
                .recent
                .iter()
                .rev()
                .take(limit)
                .cloned()
                .collect(),
        }
    }

    /// Latest alerts, newest first
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts.recent(limit)
    }

    /// Readings currently held for one node, oldest first
    pub fn window(&self, node_id: &str) -> Vec<SensorReading> {
        self.store.window_for(node_id)
    }

    pub fn node_state(&self, node_id: &str) -> NodeState {
        self.store.node_state(node_id, self.clock.now())
    }

    pub fn nodes(&self) -> Vec<NodeSummary> {
        self.store.summaries(self.clock.now())
    }

    pub fn status(&self) -> PipelineStatus {
        let (connected, revision) = {
            let state = self.lock_state();
            (state.connectivity.is_connected(), state.revision)
        };

        PipelineStatus {
            connected,
            readings_accepted: self.accepted.load(Ordering::Relaxed),
            readings_rejected: self.rejected.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            detector_failures: self.stage_failures.load(Ordering::Relaxed),
            tracked_nodes: self.store.len(),
            revision,
        }
    }

    /// Instant the current connectivity state began
    pub fn connectivity_since(&self) -> DateTime<Utc> {
        self.lock_state().connectivity.state_since()
    }

    fn prescribe(
        &self,
        anomaly: &crate::models::Anomaly,
    ) -> Result<Option<Prescription>, DetectionError> {
        catch_unwind(AssertUnwindSafe(|| self.mapper.prescribe(anomaly))).map_err(|payload| {
            DetectionError::Panicked {
                rule: "prescription".to_string(),
                message: panic_message(payload.as_ref()),
            }
        })
    }

    fn record_failure(&self, stage: &str, node_id: &str, error: &DetectionError) {
        self.stage_failures.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_stage_failure(stage);
        self.logger.log_stage_failure(stage, node_id, error);
    }

    fn snapshot_locked(&self, state: &mut CommitState, now: DateTime<Utc>) -> KpiSnapshot {
        let recent = state.recent.make_contiguous();
        state.aggregator.snapshot(KpiInputs {
            recent,
            store: &self.store,
            alerts: &self.alerts,
            uptime_percent: state.connectivity.uptime_percent(now),
            now,
            revision: state.revision,
        })
    }

    fn publish(&self, event: PipelineEvent) {
        // No subscribers is not an error
        if self.events.send(event).is_err() {
            debug!("No pipeline subscribers");
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CommitState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}
