//! Saving, loading, and sharing completed analyses.
//!
//! Persistence is a side channel: failures here never touch document or job
//! state. The gateway trait keeps the HTTP details swappable for tests.

use crate::analysis::types::AnalysisJobResult;
use crate::config::AnalyzerConfig;
use crate::documents::TrackedDocument;
use crate::http::persistence_client;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("no completed analysis to persist")]
    NoCompletedAnalysis,

    #[error("cannot load an analysis while one is in progress")]
    AnalysisInProgress,

    #[error("persistence request failed: {0}")]
    Request(String),

    #[error("persistence service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed persistence response: {0}")]
    Malformed(String),
}

/// A completed analysis as stored by the persistence service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedAnalysisSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub documents: Vec<TrackedDocument>,
    pub result: AnalysisJobResult,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub shared: bool,
}

/// Body of a share request: the pieces a public view needs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    pub documents: Vec<TrackedDocument>,
    pub results: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregated_insights: Option<Value>,
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn save(&self, snapshot: &SavedAnalysisSnapshot) -> Result<String, PersistenceError>;
    async fn load(&self, id: &str) -> Result<SavedAnalysisSnapshot, PersistenceError>;
    async fn share(&self, request: &ShareRequest) -> Result<String, PersistenceError>;
}

#[derive(Deserialize)]
struct SaveResponse {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShareResponse {
    share_url: String,
}

/// Production gateway backed by the persistence HTTP API.
pub struct HttpPersistenceGateway {
    base_url: String,
    api_key: Option<String>,
}

impl HttpPersistenceGateway {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {}", key)),
            None => req,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PersistenceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PersistenceError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PersistenceGateway for HttpPersistenceGateway {
    async fn save(&self, snapshot: &SavedAnalysisSnapshot) -> Result<String, PersistenceError> {
        let url = format!("{}/analyses", self.base_url);
        let response = self
            .authorize(persistence_client().post(&url).json(snapshot))
            .send()
            .await
            .map_err(|e| PersistenceError::Request(e.to_string()))?;
        let response = Self::check_status(response).await?;

        let body: SaveResponse = response
            .json()
            .await
            .map_err(|e| PersistenceError::Malformed(e.to_string()))?;
        tracing::info!(id = %body.id, "[Persistence] Analysis saved");
        Ok(body.id)
    }

    async fn load(&self, id: &str) -> Result<SavedAnalysisSnapshot, PersistenceError> {
        let url = format!("{}/analyses/{}", self.base_url, id);
        let response = self
            .authorize(persistence_client().get(&url))
            .send()
            .await
            .map_err(|e| PersistenceError::Request(e.to_string()))?;
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| PersistenceError::Malformed(e.to_string()))
    }

    async fn share(&self, request: &ShareRequest) -> Result<String, PersistenceError> {
        let url = format!("{}/share", self.base_url);
        let response = self
            .authorize(persistence_client().post(&url).json(request))
            .send()
            .await
            .map_err(|e| PersistenceError::Request(e.to_string()))?;
        let response = Self::check_status(response).await?;

        let body: ShareResponse = response
            .json()
            .await
            .map_err(|e| PersistenceError::Malformed(e.to_string()))?;
        Ok(body.share_url)
    }
}
