//! The caller-facing orchestrator.
//!
//! Owns the shared state, the transport, and the optional persistence
//! gateway. One analysis job may be in flight at a time; a second `analyze`
//! call is rejected, not queued.

use crate::analysis::cancel::{CancelToken, GenerationCounter};
use crate::analysis::job::{run_job, AnalyzeError};
use crate::analysis::state::{AnalysisState, JobEvent, JobFailure, StateSnapshot};
use crate::analysis::types::{AnalysisJobRequest, AnalysisOptions};
use crate::config::AnalyzerConfig;
use crate::documents::{encoder, DocumentStatus, TrackedDocument, UploadFile, UploadReport};
use crate::events::{AnalyzerEvent, EventSink};
use crate::persistence::{
    HttpPersistenceGateway, PersistenceError, PersistenceGateway, SavedAnalysisSnapshot,
    ShareRequest,
};
use crate::transport::{AnalysisTransport, HttpTransport, TransportError};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct DocumentAnalyzer {
    config: AnalyzerConfig,
    transport: Arc<dyn AnalysisTransport>,
    persistence: Option<Arc<dyn PersistenceGateway>>,
    state: Arc<Mutex<AnalysisState>>,
    generations: GenerationCounter,
    sink: Option<Arc<dyn EventSink>>,
}

impl DocumentAnalyzer {
    /// Build an analyzer speaking HTTP to the service in `config`.
    pub fn new(config: AnalyzerConfig) -> Result<Self, TransportError> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        let persistence: Arc<dyn PersistenceGateway> =
            Arc::new(HttpPersistenceGateway::new(&config));
        Ok(Self {
            config,
            transport,
            persistence: Some(persistence),
            state: Arc::new(Mutex::new(AnalysisState::default())),
            generations: GenerationCounter::new(),
            sink: None,
        })
    }

    /// Build an analyzer over a custom transport. No persistence gateway is
    /// attached; add one with [`DocumentAnalyzer::persistence_gateway`].
    pub fn with_transport(config: AnalyzerConfig, transport: Arc<dyn AnalysisTransport>) -> Self {
        Self {
            config,
            transport,
            persistence: None,
            state: Arc::new(Mutex::new(AnalysisState::default())),
            generations: GenerationCounter::new(),
            sink: None,
        }
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn persistence_gateway(mut self, gateway: Arc<dyn PersistenceGateway>) -> Self {
        self.persistence = Some(gateway);
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Validate, register, and encode a batch of files. Files settle
    /// independently; the report says which were accepted, rejected, or
    /// failed to encode.
    pub async fn add_files(&self, files: Vec<UploadFile>) -> UploadReport {
        encoder::run_uploads(&self.state, self.sink.as_ref(), files, &self.config).await
    }

    /// Remove one document. Permitted at any time, including mid-analysis;
    /// a job already in flight still carries the submitted payload.
    pub async fn remove_document(&self, id: &str) -> bool {
        self.state.lock().await.documents.remove(id)
    }

    /// Cancel any active job and drop all documents and results. Calling
    /// this on an already-empty analyzer is a no-op.
    pub async fn clear(&self) {
        self.state.lock().await.reset();
    }

    /// Submit every `uploaded` document for analysis and drive the job to
    /// completion. Returns once the job has finished, failed, or been
    /// cancelled.
    ///
    /// Dropping the returned future mid-job (for instance losing a
    /// `tokio::select!` race) cancels the job and rolls the documents back
    /// on a spawned task; no document is left in `analyzing`.
    pub async fn analyze(&self, options: AnalysisOptions) -> Result<(), AnalyzeError> {
        let (token, request) = {
            let mut guard = self.state.lock().await;
            if guard.is_analyzing() {
                return Err(AnalyzeError::AnalysisInProgress);
            }
            if guard
                .documents
                .list_by_status(DocumentStatus::Uploaded)
                .is_empty()
            {
                return Err(AnalyzeError::NoDocumentsReady);
            }

            let generation = self.generations.next();
            let token = CancelToken::new(generation);
            let ready = guard.begin_job(generation, token.clone());
            let request = AnalysisJobRequest::from_documents(&ready, options);
            (token, request)
        };

        tracing::info!(
            generation = token.generation(),
            documents = request.documents.len(),
            "[Analyzer] Starting analysis"
        );

        if let Some(sink) = &self.sink {
            for doc in &request.documents {
                sink.on_event(AnalyzerEvent::DocumentUpdated {
                    id: doc.id.clone(),
                    status: DocumentStatus::Analyzing,
                });
            }
        }

        let rollback = JobRollback {
            state: Arc::clone(&self.state),
            sink: self.sink.clone(),
            token: token.clone(),
            armed: true,
        };

        let outcome = run_job(
            self.transport.as_ref(),
            &request,
            token,
            &self.state,
            self.sink.as_ref(),
        )
        .await;

        rollback.disarm();
        outcome
    }

    /// Signal the active job to stop. Returns false when nothing is running.
    /// The in-flight `analyze` call observes the signal at the next chunk
    /// boundary and returns `Cancelled`.
    pub async fn cancel(&self) -> bool {
        let cancelled = self.state.lock().await.cancel_active();
        if cancelled {
            tracing::info!("[Analyzer] Cancellation requested");
        }
        cancelled
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn is_analyzing(&self) -> bool {
        self.state.lock().await.is_analyzing()
    }

    /// Persist the completed analysis under a caller-chosen name, returning
    /// the id the service assigned. The snapshot carries the documents with
    /// their payloads so a later load restores them exactly as analyzed.
    pub async fn save_analysis(
        &self,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Result<String, PersistenceError> {
        let gateway = self.gateway()?;

        let snapshot = {
            let guard = self.state.lock().await;
            let result = guard
                .result()
                .cloned()
                .ok_or(PersistenceError::NoCompletedAnalysis)?;
            let now = Utc::now();
            SavedAnalysisSnapshot {
                id: uuid::Uuid::new_v4().to_string(),
                name: name.into(),
                description,
                documents: guard.snapshot().documents,
                result,
                created_at: now,
                updated_at: now,
                shared: false,
            }
        };

        gateway.save(&snapshot).await
    }

    /// Replace current documents and results with a previously saved
    /// analysis. Rejected while a job is in flight.
    pub async fn load_analysis(&self, id: &str) -> Result<SavedAnalysisSnapshot, PersistenceError> {
        let gateway = self.gateway()?;

        if self.state.lock().await.is_analyzing() {
            return Err(PersistenceError::AnalysisInProgress);
        }

        let snapshot = gateway.load(id).await?;

        {
            let mut guard = self.state.lock().await;
            // A job may have started while the load request was in flight.
            if guard.is_analyzing() {
                return Err(PersistenceError::AnalysisInProgress);
            }
            guard.restore(snapshot.documents.clone(), Some(snapshot.result.clone()));
        }

        tracing::info!(id = %id, "[Analyzer] Analysis loaded");
        Ok(snapshot)
    }

    /// Publish the completed analysis and return the share link.
    pub async fn share_analysis(&self) -> Result<String, PersistenceError> {
        let gateway = self.gateway()?;

        let request = {
            let guard = self.state.lock().await;
            let result = guard
                .result()
                .ok_or(PersistenceError::NoCompletedAnalysis)?;
            ShareRequest {
                documents: stripped_documents(guard.snapshot().documents),
                results: result.results.clone(),
                aggregated_insights: result.aggregated_insights.clone(),
            }
        };

        gateway.share(&request).await
    }

    fn gateway(&self) -> Result<&Arc<dyn PersistenceGateway>, PersistenceError> {
        self.persistence.as_ref().ok_or_else(|| {
            PersistenceError::Request("no persistence gateway configured".to_string())
        })
    }
}

/// Rolls a job back when the `analyze` future is dropped before reaching a
/// terminal state. `run_job` applies a terminal event on every normal exit,
/// so this only fires for an abandoned future.
struct JobRollback {
    state: Arc<Mutex<AnalysisState>>,
    sink: Option<Arc<dyn EventSink>>,
    token: CancelToken,
    armed: bool,
}

impl JobRollback {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for JobRollback {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.token.cancel();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let generation = self.token.generation();
        tracing::warn!(generation, "[Analyzer] Analyze future dropped mid-job, rolling back");

        let state = Arc::clone(&self.state);
        let sink = self.sink.clone();
        handle.spawn(async move {
            let events = {
                state.lock().await.apply(JobEvent::Failed {
                    generation,
                    failure: JobFailure::cancelled(),
                })
            };
            if let Some(sink) = sink {
                for event in events {
                    sink.on_event(event);
                }
            }
        });
    }
}

/// Payloads are dropped from shared documents; the public view ships
/// findings, not file bytes.
fn stripped_documents(mut documents: Vec<TrackedDocument>) -> Vec<TrackedDocument> {
    for doc in &mut documents {
        doc.encoded_payload = None;
    }
    documents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::AnalysisResponse;
    use async_trait::async_trait;

    struct RefusingTransport;

    #[async_trait]
    impl AnalysisTransport for RefusingTransport {
        async fn submit(
            &self,
            _request: &AnalysisJobRequest,
        ) -> Result<AnalysisResponse, TransportError> {
            Err(TransportError::Request("unreachable".into()))
        }
    }

    fn analyzer() -> DocumentAnalyzer {
        DocumentAnalyzer::with_transport(AnalyzerConfig::default(), Arc::new(RefusingTransport))
    }

    #[tokio::test]
    async fn test_analyze_without_documents_fails_fast() {
        let analyzer = analyzer();
        let outcome = analyzer.analyze(AnalysisOptions::default()).await;
        assert!(matches!(outcome, Err(AnalyzeError::NoDocumentsReady)));
        assert!(!analyzer.is_analyzing().await);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let analyzer = analyzer();
        analyzer
            .add_files(vec![UploadFile::from_bytes(
                "a.pdf",
                Some("application/pdf"),
                b"data".to_vec(),
            )])
            .await;

        analyzer.clear().await;
        let first = analyzer.snapshot().await;
        analyzer.clear().await;
        let second = analyzer.snapshot().await;

        assert!(first.documents.is_empty());
        assert!(second.documents.is_empty());
        assert_eq!(first.progress, second.progress);
        assert_eq!(first.is_analyzing, second.is_analyzing);
    }

    #[tokio::test]
    async fn test_cancel_without_job_returns_false() {
        let analyzer = analyzer();
        assert!(!analyzer.cancel().await);
    }

    #[tokio::test]
    async fn test_save_without_result_is_rejected() {
        let analyzer = analyzer().persistence_gateway(Arc::new(NullGateway));
        let outcome = analyzer.save_analysis("empty", None).await;
        assert!(matches!(outcome, Err(PersistenceError::NoCompletedAnalysis)));
    }

    #[tokio::test]
    async fn test_persistence_requires_gateway() {
        let analyzer = analyzer();
        let outcome = analyzer.share_analysis().await;
        assert!(matches!(outcome, Err(PersistenceError::Request(_))));
    }

    struct NullGateway;

    #[async_trait]
    impl PersistenceGateway for NullGateway {
        async fn save(
            &self,
            _snapshot: &SavedAnalysisSnapshot,
        ) -> Result<String, PersistenceError> {
            Ok("saved".into())
        }

        async fn load(&self, _id: &str) -> Result<SavedAnalysisSnapshot, PersistenceError> {
            Err(PersistenceError::Request("not implemented".into()))
        }

        async fn share(&self, _request: &ShareRequest) -> Result<String, PersistenceError> {
            Ok("https://example.com/s/1".into())
        }
    }
}
