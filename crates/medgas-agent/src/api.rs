//! HTTP API: telemetry queries, push ingestion, live events, health and metrics

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use medgas_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::PipelineMetrics,
    pipeline::{FeedSender, Pipeline},
    SensorReading, Severity,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::{
    wrappers::{BroadcastStream, WatchStream},
    Stream, StreamExt,
};
use tracing::{info, warn};

/// Default number of items returned by list endpoints
const DEFAULT_LIMIT: usize = 50;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub health_registry: HealthRegistry,
    pub metrics: PipelineMetrics,
    /// Present only when readings are accepted over HTTP
    pub push: Option<FeedSender>,
    /// Flips to true on shutdown; ends open event streams
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        pipeline: Arc<Pipeline>,
        health_registry: HealthRegistry,
        metrics: PipelineMetrics,
        push: Option<FeedSender>,
    ) -> Self {
        // Never fires unless replaced with `with_shutdown`
        let (_, shutdown) = watch::channel(false);
        Self {
            pipeline,
            health_registry,
            metrics,
            push,
            shutdown,
        }
    }

    /// End event streams once `shutdown` turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// JSON error body
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Error returned by API handlers
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.health_registry.observe(&state.pipeline).await;
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let body = state.metrics.render().map_err(|e| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {e}"),
        )
    })?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        body,
    ))
}

#[derive(Debug, Deserialize)]
struct ReadingsQuery {
    limit: Option<usize>,
    node: Option<String>,
}

async fn list_readings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReadingsQuery>,
) -> Json<Vec<SensorReading>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    Json(state.pipeline.recent_readings(limit, query.node.as_deref()))
}

#[derive(Debug, Serialize)]
struct PushAccepted {
    status: &'static str,
    node_id: String,
}

async fn push_reading(
    State(state): State<Arc<AppState>>,
    Json(reading): Json<SensorReading>,
) -> Result<impl IntoResponse, ApiError> {
    let sender = state.push.as_ref().ok_or_else(|| {
        ApiError::new(
            StatusCode::CONFLICT,
            "HTTP push is disabled; the service is running a simulated feed",
        )
    })?;

    let node_id = reading.node_id.clone();
    sender
        .push(reading)
        .map_err(|e| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PushAccepted {
            status: "accepted",
            node_id,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    limit: Option<usize>,
    /// Minimum severity to include
    severity: Option<String>,
}

async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let min_severity = query
        .severity
        .as_deref()
        .map(str::parse::<Severity>)
        .transpose()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let alerts: Vec<_> = state
        .pipeline
        .recent_alerts(usize::MAX)
        .into_iter()
        .filter(|a| min_severity.map_or(true, |min| a.severity >= min))
        .take(limit)
        .collect();

    Ok(Json(alerts))
}

async fn kpis(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.pipeline.kpis())
}

async fn nodes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.pipeline.nodes())
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.pipeline.status())
}

/// Server-Sent Events: one event per reading, alert, KPI snapshot or connectivity change
///
/// The stream ends when the agent shuts down so graceful shutdown is not held
/// open by connected subscribers.
async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = BroadcastStream::new(state.pipeline.subscribe()).filter_map(|item| match item {
        Ok(event) => match Event::default().event(event.kind()).json_data(&event) {
            Ok(sse) => Some(Some(sse)),
            Err(e) => {
                warn!(error = %e, "Failed to encode pipeline event");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "Event subscriber lagged");
            None
        }
    });
    let stop = WatchStream::new(state.shutdown.clone())
        .filter(|stopped| *stopped)
        .map(|_| None::<Event>);

    let stream = events
        .merge(stop)
        .take_while(Option::is_some)
        .filter_map(|item| item.map(Ok));

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/readings", get(list_readings).post(push_reading))
        .route("/api/v1/alerts", get(list_alerts))
        .route("/api/v1/kpis", get(kpis))
        .route("/api/v1/nodes", get(nodes))
        .route("/api/v1/status", get(status))
        .route("/api/v1/events", get(events))
        .with_state(state)
}

/// Start the API server, stopping when `shutdown` fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
