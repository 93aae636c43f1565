//! Per-node window store
//!
//! Keeps a bounded, timestamp-ordered history of recent readings for every
//! node. Windows are created lazily on the first reading for a node id and
//! dropped only once the node has been idle beyond the eviction horizon or the
//! tracked-node cap forces the least recently seen node out.

use crate::models::{NodeState, NodeSummary, SensorReading};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Default readings retained per node
const DEFAULT_CAPACITY: usize = 20;

/// Default cap on tracked node identities
const DEFAULT_MAX_NODES: usize = 1024;

/// Configuration for the window store
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Readings retained per node (N)
    pub capacity: usize,
    /// Maximum number of node identities tracked at once
    pub max_nodes: usize,
    /// Silence after which a node no longer counts as active
    pub staleness_horizon: Duration,
    /// Silence after which a node's window is dropped entirely
    pub eviction_horizon: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_nodes: DEFAULT_MAX_NODES,
            staleness_horizon: Duration::from_secs(60),
            eviction_horizon: Duration::from_secs(15 * 60),
        }
    }
}

/// Bounded history for a single node
#[derive(Debug, Clone)]
pub struct NodeWindow {
    readings: VecDeque<SensorReading>,
    capacity: usize,
}

impl NodeWindow {
    fn new(capacity: usize) -> Self {
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert at the reading's timestamp position, evicting the oldest if full
    ///
    /// Returns true when the reading became the newest sample.
    fn insert(&mut self, reading: SensorReading) -> bool {
        // Well-behaved feeds append; late readings walk back to their slot
        let position = self
            .readings
            .iter()
            .rposition(|r| r.timestamp <= reading.timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        let newest = position == self.readings.len();
        self.readings.insert(position, reading);

        while self.readings.len() > self.capacity {
            self.readings.pop_front();
        }
        newest
    }

    fn newest(&self) -> Option<&SensorReading> {
        self.readings.back()
    }

    fn to_vec(&self) -> Vec<SensorReading> {
        self.readings.iter().cloned().collect()
    }
}

/// Result of recording one reading
#[derive(Debug, Clone)]
pub struct Recorded {
    /// The node's window after the insert, oldest first
    pub window: Vec<SensorReading>,
    /// False when a late reading landed behind the newest sample
    pub is_newest: bool,
}

/// Concurrent map of node id to window
///
/// Each node's partition is locked independently, so readings for different
/// nodes can be recorded in parallel.
pub struct WindowStore {
    windows: DashMap<String, NodeWindow>,
    config: WindowConfig,
}

impl WindowStore {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config: WindowConfig {
                capacity: config.capacity.max(1),
                max_nodes: config.max_nodes.max(1),
                ..config
            },
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Insert a reading into its node's window and return the updated window
    pub fn record(&self, reading: SensorReading) -> Recorded {
        let node_id = reading.node_id.clone();
        let is_new = !self.windows.contains_key(&node_id);

        let recorded = {
            let mut window = self
                .windows
                .entry(node_id.clone())
                .or_insert_with(|| NodeWindow::new(self.config.capacity));
            let is_newest = window.insert(reading);
            Recorded {
                window: window.to_vec(),
                is_newest,
            }
        };

        if is_new {
            debug!(node_id = %node_id, "Tracking new node");
            self.enforce_node_cap(&node_id);
        }

        recorded
    }

    /// Current window for a node, oldest first; empty for unknown nodes
    pub fn window_for(&self, node_id: &str) -> Vec<SensorReading> {
        self.windows
            .get(node_id)
            .map(|w| w.to_vec())
            .unwrap_or_default()
    }

    /// Timestamp of the newest reading held for a node
    pub fn last_timestamp(&self, node_id: &str) -> Option<DateTime<Utc>> {
        self.windows
            .get(node_id)
            .and_then(|w| w.newest().map(|r| r.timestamp))
    }

    /// Lifecycle state of a node at `now`
    pub fn node_state(&self, node_id: &str, now: DateTime<Utc>) -> NodeState {
        match self.last_timestamp(node_id) {
            None => NodeState::Idle,
            Some(last) => self.state_for(last, now),
        }
    }

    fn state_for(&self, last_seen: DateTime<Utc>, now: DateTime<Utc>) -> NodeState {
        if now - last_seen <= crate::clock::to_chrono(self.config.staleness_horizon) {
            NodeState::Active
        } else {
            NodeState::Quiescent
        }
    }

    /// Per-node summaries sorted by node id
    pub fn summaries(&self, now: DateTime<Utc>) -> Vec<NodeSummary> {
        let mut summaries: Vec<NodeSummary> = self
            .windows
            .iter()
            .filter_map(|entry| {
                let window = entry.value();
                let newest = window.newest()?;
                Some(NodeSummary {
                    context: newest.context(),
                    state: self.state_for(newest.timestamp, now),
                    readings_in_window: window.readings.len(),
                    last_seen: newest.timestamp,
                    latest: newest.sensors,
                    firmware_version: newest.meta.firmware_version.clone(),
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.context.node_id.cmp(&b.context.node_id));
        summaries
    }

    /// Drop windows idle beyond the eviction horizon; returns how many were removed
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let horizon = crate::clock::to_chrono(self.config.eviction_horizon);
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window
                .newest()
                .map(|r| now - r.timestamp <= horizon)
                .unwrap_or(false)
        });
        let evicted = before.saturating_sub(self.windows.len());
        if evicted > 0 {
            debug!(evicted, "Evicted idle node windows");
        }
        evicted
    }

    /// Drop the least recently seen node while over the cap, sparing `keep`
    fn enforce_node_cap(&self, keep: &str) {
        while self.windows.len() > self.config.max_nodes {
            let oldest = self
                .windows
                .iter()
                .filter(|entry| entry.key() != keep)
                .filter_map(|entry| entry.newest().map(|r| (entry.key().clone(), r.timestamp)))
                .min_by_key(|(_, ts)| *ts)
                .map(|(id, _)| id);

            match oldest {
                Some(id) => {
                    debug!(node_id = %id, "Node cap reached, dropping least recently seen node");
                    self.windows.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Number of tracked nodes
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new(WindowConfig::default())
    }
}
