//! Transport seam between the orchestrator and the analysis service.
//!
//! The trait hides how bytes arrive: the HTTP implementation streams the
//! response body, while other implementations (or older service deployments)
//! may only hand back one buffered blob. The job runner decodes both through
//! the same path.

use crate::analysis::types::AnalysisJobRequest;
use crate::config::AnalyzerConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Response body as the transport is able to deliver it.
pub enum AnalysisResponse {
    Stream(ByteStream),
    Buffered(Bytes),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("analysis service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("stream read failed: {0}")]
    Stream(String),
}

#[async_trait]
pub trait AnalysisTransport: Send + Sync {
    /// Submit a job and return its response body. A non-2xx status is an
    /// error here; callers never see frames from a failed submission.
    async fn submit(
        &self,
        request: &AnalysisJobRequest,
    ) -> Result<AnalysisResponse, TransportError>;
}

/// Production transport: POSTs to `{base_url}/analyze` and streams the body.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &AnalyzerConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl AnalysisTransport for HttpTransport {
    async fn submit(
        &self,
        request: &AnalysisJobRequest,
    ) -> Result<AnalysisResponse, TransportError> {
        let url = format!("{}/analyze", self.base_url);

        let mut req = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "[Transport] Submission rejected");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Stream(e.to_string())))
            .boxed();
        Ok(AnalysisResponse::Stream(stream))
    }
}
