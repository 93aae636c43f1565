//! medgas-agent - medical-gas telemetry service
//!
//! Runs the telemetry pipeline over a simulated or HTTP-push reading feed and
//! serves queries, live events, health and metrics over HTTP.

use std::sync::Arc;

use anyhow::Result;
use medgas_agent::{
    api,
    config::{AgentConfig, FeedMode},
};
use medgas_lib::{
    health::HealthRegistry,
    observability::{PipelineMetrics, StructuredLogger},
    pipeline::{ChannelFeed, FeedSender, Pipeline, PipelineRunnerBuilder, ReadingFeed, SimulatedFeed},
};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting medgas-agent");

    let config = AgentConfig::load()?;
    info!(
        site = %config.site,
        feed_mode = config.feed.mode.as_str(),
        api_port = config.api_port,
        "Agent configured"
    );

    let metrics = PipelineMetrics::new();
    let logger = StructuredLogger::new(&config.site);

    let pipeline = Arc::new(
        Pipeline::new(config.pipeline_config()).with_detector(config.detector()),
    );
    info!(rules = ?pipeline.detector().rule_names(), "Detector configured");

    let (feed, push): (Box<dyn ReadingFeed>, Option<FeedSender>) = match config.feed.mode {
        FeedMode::Simulated => (
            Box::new(SimulatedFeed::new(
                config.simulation_config(),
                pipeline.clock().clone(),
            )),
            None,
        ),
        FeedMode::Http => {
            let (sender, feed) = ChannelFeed::channel(config.feed.push_buffer);
            (Box::new(feed), Some(sender))
        }
    };

    let runner = PipelineRunnerBuilder::new()
        .feed(feed)
        .pipeline(pipeline.clone())
        .config(config.runner_config())
        .build()?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    // Level-triggered copy for event streams opened after the signal
    let (stopped_tx, stopped_rx) = watch::channel(false);
    let runner_handle = tokio::spawn(runner.run(shutdown_tx.subscribe()));

    let health_registry = HealthRegistry::new();
    health_registry.observe(&pipeline).await;

    let app_state = Arc::new(
        api::AppState::new(pipeline.clone(), health_registry.clone(), metrics.clone(), push)
            .with_shutdown(stopped_rx),
    );
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    // Runner is consuming the feed
    health_registry.set_ready(true).await;
    logger.log_startup(AGENT_VERSION, config.feed.mode.as_str());

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    stopped_tx.send_replace(true);
    let _ = shutdown_tx.send(());

    match runner_handle.await {
        Ok(stats) => info!(
            accepted = stats.accepted,
            rejected = stats.rejected,
            alerts = stats.alerts,
            "Pipeline runner stopped"
        ),
        Err(e) => warn!(error = %e, "Pipeline runner task failed"),
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
