//! End-to-end pipeline tests over the public API

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use medgas_lib::pipeline::{PipelineRunnerBuilder, SimulatedFeed, SimulationConfig};
use medgas_lib::{Clock, ManualClock, NodeState, Pipeline, PipelineConfig};
use tokio::sync::broadcast;

fn simulated_plant(readings: u64) -> (Arc<Pipeline>, SimulatedFeed) {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
    ));
    let pipeline = Arc::new(Pipeline::with_clock(PipelineConfig::default(), clock.clone()));
    let feed = SimulatedFeed::new(
        SimulationConfig {
            seed: 7,
            node_count: 8,
            cadence: Duration::ZERO,
            limit: Some(readings),
            ..SimulationConfig::default()
        },
        clock,
    );
    (pipeline, feed)
}

#[tokio::test]
async fn test_simulated_plant_flows_through_pipeline() {
    let (pipeline, feed) = simulated_plant(200);
    let kpi_rx = pipeline.watch_kpis();

    let runner = PipelineRunnerBuilder::new()
        .feed(Box::new(feed))
        .pipeline(pipeline.clone())
        .build()
        .unwrap();
    let (_tx, rx) = broadcast::channel(1);
    let stats = runner.run(rx).await;

    let status = pipeline.status();
    assert_eq!(stats.accepted + stats.rejected, 200);
    assert_eq!(status.readings_accepted, stats.accepted);
    assert_eq!(status.alerts_emitted, stats.alerts);
    assert!(status.tracked_nodes <= 8);

    // Bounded views
    assert!(pipeline.recent_readings(usize::MAX, None).len() <= 50);
    assert!(pipeline.recent_alerts(usize::MAX).len() <= 20);
    for node in pipeline.nodes() {
        assert!(node.readings_in_window <= 20);
        assert_eq!(node.state, NodeState::Active);
    }

    // Feed exhausted: disconnected, last pushed snapshot matches an on-demand one
    assert!(!pipeline.is_connected());
    let pushed = kpi_rx.borrow().clone();
    assert_eq!(pushed, pipeline.kpis());
}

#[tokio::test]
async fn test_same_seed_same_outcome() {
    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let (pipeline, feed) = simulated_plant(120);
        let runner = PipelineRunnerBuilder::new()
            .feed(Box::new(feed))
            .pipeline(pipeline.clone())
            .build()
            .unwrap();
        let (_tx, rx) = broadcast::channel(1);
        runner.run(rx).await;

        let readings: Vec<_> = pipeline
            .recent_readings(usize::MAX, None)
            .into_iter()
            .map(|r| (r.node_id, r.sensors.pressure_kpa))
            .collect();
        outcomes.push((readings, pipeline.kpis().values));
    }

    assert_eq!(outcomes[0], outcomes[1]);
}

#[test]
fn test_empty_pipeline_kpis() {
    let pipeline = Pipeline::new(PipelineConfig::default());
    let snapshot = pipeline.kpis();

    assert_eq!(snapshot.values.avg_pressure, 0.0);
    assert_eq!(snapshot.values.active_nodes, 0);
    assert_eq!(snapshot.values, pipeline.kpis().values);
}
