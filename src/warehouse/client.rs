//! Warehouse HTTP Client
//!
//! Submits composed SQL to the warehouse's query endpoint. Submissions are
//! read-only, so transient transport failures (timeouts, refused
//! connections) retry with backoff; a non-200 answer is returned
//! immediately with the response body carried verbatim for diagnosis.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Configuration for the warehouse client
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Base URL of the query service (e.g., "http://localhost:7070")
    pub base_url: String,
    /// Warehouse project the log cube lives in
    pub project: String,
    /// Fully qualified table queried by every session
    pub table: String,
    /// Basic-auth username
    pub username: String,
    /// Basic-auth password
    pub password: String,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Maximum submission attempts per query
    pub max_retries: u32,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7070".to_string(),
            project: "api_umbrella".to_string(),
            table: "api_umbrella.logs".to_string(),
            username: "ADMIN".to_string(),
            password: "KYLIN".to_string(),
            request_timeout_ms: 30_000,
            max_retries: 3,
        }
    }
}

/// Transport seam between the search session and the warehouse
#[async_trait]
pub trait QueryTransport: Send + Sync {
    /// Submit one SQL statement and return the parsed tabular response
    async fn submit(&self, sql: &str) -> Result<QueryResponse, WarehouseError>;
}

/// Warehouse query service client
pub struct WarehouseClient {
    client: Client,
    config: WarehouseConfig,
}

impl WarehouseClient {
    /// Create a new client with the given configuration
    pub fn new(config: WarehouseConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Get the current configuration
    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    fn classify(e: reqwest::Error) -> WarehouseError {
        if e.is_timeout() {
            WarehouseError::Timeout
        } else if e.is_connect() {
            WarehouseError::Unavailable
        } else {
            WarehouseError::Request(e)
        }
    }
}

#[async_trait]
impl QueryTransport for WarehouseClient {
    async fn submit(&self, sql: &str) -> Result<QueryResponse, WarehouseError> {
        let url = format!("{}/kylin/api/query", self.config.base_url);
        let body = QueryRequest {
            accept_partial: false,
            project: self.config.project.clone(),
            sql: sql.to_string(),
        };

        let mut last_error = WarehouseError::Unavailable;

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                // Backoff: 1s, 4s, 9s...
                let delay = std::time::Duration::from_secs((attempt as u64).pow(2));
                tokio::time::sleep(delay).await;
            }

            match self
                .client
                .post(&url)
                .basic_auth(&self.config.username, Some(&self.config.password))
                .json(&body)
                .send()
                .await
            {
                Ok(response) => {
                    if response.status().is_success() {
                        return response.json().await.map_err(WarehouseError::Request);
                    }
                    // Query-level failures are not retried; carry the body
                    // back for diagnosis.
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    tracing::error!(status, body = %body, "warehouse query failed");
                    return Err(WarehouseError::QueryFailed { status, body });
                }
                Err(e) => {
                    last_error = Self::classify(e);
                    continue;
                }
            }
        }

        Err(last_error)
    }
}

// ============================================
// Request/Response DTOs
// ============================================

/// Body POSTed to the query endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub accept_partial: bool,
    pub project: String,
    pub sql: String,
}

/// Tabular response from the query endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub column_metas: Vec<ColumnMeta>,
    #[serde(default)]
    pub results: Vec<Vec<Value>>,
}

/// Metadata for one result column; only the label matters here
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnMeta {
    pub label: String,
}

// ============================================
// Errors
// ============================================

/// Errors that can occur when talking to the warehouse
#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("warehouse unavailable")]
    Unavailable,

    #[error("request timeout")]
    Timeout,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("query failed with status {status}: {body}")]
    QueryFailed { status: u16, body: String },
}
