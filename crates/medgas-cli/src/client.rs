//! API client for the telemetry service

use anyhow::{Context, Result};
use medgas_lib::{Alert, KpiSnapshot, NodeSummary, PipelineStatus, SensorReading, Severity};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Non-success response from the service
#[derive(Debug, Error)]
#[error("API error ({status}): {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

/// API client for the telemetry service
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Make a GET request with query parameters
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        self.send(self.client.get(url).query(query)).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        self.send(self.client.post(url).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(ApiError { status, message }.into());
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn status(&self) -> Result<PipelineStatus> {
        self.get("api/v1/status", &[]).await
    }

    pub async fn kpis(&self) -> Result<KpiSnapshot> {
        self.get("api/v1/kpis", &[]).await
    }

    pub async fn nodes(&self) -> Result<Vec<NodeSummary>> {
        self.get("api/v1/nodes", &[]).await
    }

    /// Latest alerts, newest first, optionally at or above `min_severity`
    pub async fn alerts(&self, limit: usize, min_severity: Option<Severity>) -> Result<Vec<Alert>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(severity) = min_severity {
            query.push(("severity", severity.to_string()));
        }
        self.get("api/v1/alerts", &query).await
    }

    /// Latest readings, newest first, optionally for one node
    pub async fn readings(&self, limit: usize, node: Option<&str>) -> Result<Vec<SensorReading>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(node) = node {
            query.push(("node", node.to_string()));
        }
        self.get("api/v1/readings", &query).await
    }

    pub async fn push(&self, reading: &SensorReading) -> Result<PushAccepted> {
        self.post("api/v1/readings", reading).await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushAccepted {
    pub status: String,
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
