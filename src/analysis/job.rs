//! Drives one analysis job: submit, read the response, decode frames, feed
//! the reducer.
//!
//! The read loop selects the cancellation token against the next chunk, so a
//! cancel request takes effect even while the transport is stalled; returning
//! drops the stream, which aborts the underlying connection. Whatever the
//! stream does afterwards, the reducer's generation check keeps it from
//! touching state.

use crate::analysis::cancel::CancelToken;
use crate::analysis::state::{AnalysisState, JobEvent, JobFailure};
use crate::analysis::stream::{FrameDecoder, StreamFrame};
use crate::analysis::types::AnalysisJobRequest;
use crate::events::EventSink;
use crate::transport::{AnalysisResponse, AnalysisTransport};
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("no documents are ready for analysis")]
    NoDocumentsReady,

    #[error("an analysis is already in progress")]
    AnalysisInProgress,

    #[error("analysis request failed: {0}")]
    Network(String),

    #[error("analysis protocol failure: {0}")]
    Protocol(String),

    #[error("analysis cancelled")]
    Cancelled,
}

pub(crate) async fn run_job(
    transport: &dyn AnalysisTransport,
    request: &AnalysisJobRequest,
    token: CancelToken,
    state: &Arc<Mutex<AnalysisState>>,
    sink: Option<&Arc<dyn EventSink>>,
) -> Result<(), AnalyzeError> {
    let generation = token.generation();

    let submitted = tokio::select! {
        biased;
        _ = token.cancelled() => {
            fail(state, sink, generation, JobFailure::cancelled()).await;
            return Err(AnalyzeError::Cancelled);
        }
        submitted = transport.submit(request) => submitted,
    };

    let response = match submitted {
        Ok(response) => response,
        Err(e) => {
            let message = e.to_string();
            tracing::warn!(generation, error = %message, "[Job] Submission failed");
            fail(state, sink, generation, JobFailure::network(message.clone())).await;
            return Err(AnalyzeError::Network(message));
        }
    };

    match response {
        AnalysisResponse::Stream(mut stream) => {
            let mut decoder = FrameDecoder::new();

            loop {
                // Returning from the cancelled arm drops `stream`, which
                // aborts the in-flight response body.
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        fail(state, sink, generation, JobFailure::cancelled()).await;
                        return Err(AnalyzeError::Cancelled);
                    }
                    next = stream.next() => next,
                };
                let Some(chunk) = next else { break };

                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        // Treated as a truncated stream: whether a result
                        // arrived decides the outcome below.
                        tracing::warn!(generation, error = %e, "[Job] Stream read failed");
                        break;
                    }
                };

                let frames = match decoder.feed(&chunk) {
                    Ok(frames) => frames,
                    Err(e) => {
                        let message = e.to_string();
                        fail(state, sink, generation, JobFailure::protocol(message.clone())).await;
                        return Err(AnalyzeError::Protocol(message));
                    }
                };

                for frame in frames {
                    if let Some(outcome) = handle_frame(state, sink, generation, frame).await {
                        return outcome;
                    }
                }
            }

            if token.is_cancelled() {
                fail(state, sink, generation, JobFailure::cancelled()).await;
                return Err(AnalyzeError::Cancelled);
            }

            if let Some(frame) = decoder.finish() {
                if let Some(outcome) = handle_frame(state, sink, generation, frame).await {
                    return outcome;
                }
            }

            no_result(state, sink, generation).await
        }
        AnalysisResponse::Buffered(bytes) => {
            if token.is_cancelled() {
                fail(state, sink, generation, JobFailure::cancelled()).await;
                return Err(AnalyzeError::Cancelled);
            }

            let mut decoder = FrameDecoder::new();
            let frames = match decoder.feed(&bytes) {
                Ok(frames) => frames,
                Err(e) => {
                    let message = e.to_string();
                    fail(state, sink, generation, JobFailure::protocol(message.clone())).await;
                    return Err(AnalyzeError::Protocol(message));
                }
            };

            for frame in frames {
                if let Some(outcome) = handle_frame(state, sink, generation, frame).await {
                    return outcome;
                }
            }
            if let Some(frame) = decoder.finish() {
                if let Some(outcome) = handle_frame(state, sink, generation, frame).await {
                    return outcome;
                }
            }

            no_result(state, sink, generation).await
        }
    }
}

/// Apply one frame. `Some` means the job reached a terminal outcome.
async fn handle_frame(
    state: &Arc<Mutex<AnalysisState>>,
    sink: Option<&Arc<dyn EventSink>>,
    generation: u64,
    frame: StreamFrame,
) -> Option<Result<(), AnalyzeError>> {
    match frame {
        StreamFrame::Progress(percent) => {
            apply_and_emit(state, sink, JobEvent::Progress { generation, percent }).await;
            None
        }
        StreamFrame::Complete(result) => {
            apply_and_emit(state, sink, JobEvent::Completed { generation, result }).await;
            Some(Ok(()))
        }
        StreamFrame::Failed(message) => {
            fail(state, sink, generation, JobFailure::protocol(message.clone())).await;
            Some(Err(AnalyzeError::Protocol(message)))
        }
    }
}

async fn no_result(
    state: &Arc<Mutex<AnalysisState>>,
    sink: Option<&Arc<dyn EventSink>>,
    generation: u64,
) -> Result<(), AnalyzeError> {
    let message = "stream ended without a result".to_string();
    fail(state, sink, generation, JobFailure::protocol(message.clone())).await;
    Err(AnalyzeError::Protocol(message))
}

async fn fail(
    state: &Arc<Mutex<AnalysisState>>,
    sink: Option<&Arc<dyn EventSink>>,
    generation: u64,
    failure: JobFailure,
) {
    apply_and_emit(state, sink, JobEvent::Failed { generation, failure }).await;
}

/// Run the event through the reducer under the lock, then notify the sink
/// outside it.
async fn apply_and_emit(
    state: &Arc<Mutex<AnalysisState>>,
    sink: Option<&Arc<dyn EventSink>>,
    event: JobEvent,
) {
    let events = { state.lock().await.apply(event) };
    if let Some(sink) = sink {
        for event in events {
            sink.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{DocumentStatus, FileKind, TrackedDocument};
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use serde_json::json;

    struct ScriptedTransport {
        script: std::sync::Mutex<Option<Result<AnalysisResponse, TransportError>>>,
    }

    impl ScriptedTransport {
        fn streaming(chunks: Vec<Result<Bytes, TransportError>>) -> Self {
            Self {
                script: std::sync::Mutex::new(Some(Ok(AnalysisResponse::Stream(
                    stream::iter(chunks).boxed(),
                )))),
            }
        }

        fn buffered(body: &str) -> Self {
            Self {
                script: std::sync::Mutex::new(Some(Ok(AnalysisResponse::Buffered(
                    Bytes::copy_from_slice(body.as_bytes()),
                )))),
            }
        }

        fn failing(error: TransportError) -> Self {
            Self {
                script: std::sync::Mutex::new(Some(Err(error))),
            }
        }
    }

    #[async_trait]
    impl AnalysisTransport for ScriptedTransport {
        async fn submit(
            &self,
            _request: &AnalysisJobRequest,
        ) -> Result<AnalysisResponse, TransportError> {
            self.script
                .lock()
                .unwrap()
                .take()
                .expect("transport used once")
        }
    }

    fn seeded_state(generation: u64, token: &CancelToken) -> Arc<Mutex<AnalysisState>> {
        let mut state = AnalysisState::default();
        let mut doc = TrackedDocument::new("a.pdf", FileKind::Pdf, 8, "application/pdf");
        doc.status = DocumentStatus::Uploaded;
        doc.encoded_payload = Some("QQ==".into());
        state.documents.add(doc);
        state.begin_job(generation, token.clone());
        Arc::new(Mutex::new(state))
    }

    fn empty_request() -> AnalysisJobRequest {
        AnalysisJobRequest {
            documents: Vec::new(),
            analysis_options: Default::default(),
        }
    }

    fn ok_chunk(s: &str) -> Result<Bytes, TransportError> {
        Ok(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[tokio::test]
    async fn test_streamed_job_completes() {
        let token = CancelToken::new(1);
        let state = seeded_state(1, &token);
        let transport = ScriptedTransport::streaming(vec![
            ok_chunk("{\"type\":\"progress\",\"progress\":50}\n"),
            ok_chunk("{\"type\":\"complete\",\"data\":{\"results\":[{\"docId\":\"a\"}]}}\n"),
        ]);

        let outcome = run_job(&transport, &empty_request(), token, &state, None).await;
        assert!(outcome.is_ok());

        let guard = state.lock().await;
        assert!(!guard.is_analyzing());
        assert_eq!(guard.progress(), 100);
        assert_eq!(guard.result().unwrap().results, vec![json!({"docId": "a"})]);
        assert_eq!(
            guard.documents.list_by_status(DocumentStatus::Analyzed).len(),
            1
        );
    }

    #[tokio::test]
    async fn test_stream_without_result_is_protocol_failure() {
        let token = CancelToken::new(1);
        let state = seeded_state(1, &token);
        let transport = ScriptedTransport::streaming(vec![
            ok_chunk("{\"type\":\"progress\",\"progress\":30}\n"),
        ]);

        let outcome = run_job(&transport, &empty_request(), token, &state, None).await;
        assert!(matches!(outcome, Err(AnalyzeError::Protocol(_))));

        let guard = state.lock().await;
        assert!(!guard.is_analyzing());
        assert!(guard.result().is_none());
        assert_eq!(
            guard.documents.list_by_status(DocumentStatus::Uploaded).len(),
            1
        );
    }

    #[tokio::test]
    async fn test_submit_failure_is_network_error() {
        let token = CancelToken::new(1);
        let state = seeded_state(1, &token);
        let transport = ScriptedTransport::failing(TransportError::Status {
            status: 500,
            body: "internal".into(),
        });

        let outcome = run_job(&transport, &empty_request(), token, &state, None).await;
        assert!(matches!(outcome, Err(AnalyzeError::Network(_))));

        let guard = state.lock().await;
        let error = guard.error().unwrap();
        assert_eq!(error.kind, crate::analysis::state::FailureKind::Network);
        assert_eq!(
            guard.documents.list_by_status(DocumentStatus::Uploaded).len(),
            1
        );
    }

    #[tokio::test]
    async fn test_buffered_fallback_success() {
        let token = CancelToken::new(1);
        let state = seeded_state(1, &token);
        let transport = ScriptedTransport::buffered(
            r#"{"success":true,"results":[{"docId":"a"}],"aggregatedInsights":{"score":3}}"#,
        );

        let outcome = run_job(&transport, &empty_request(), token, &state, None).await;
        assert!(outcome.is_ok());

        let guard = state.lock().await;
        assert_eq!(guard.progress(), 100);
        assert!(guard.result().unwrap().aggregated_insights.is_some());
    }

    #[tokio::test]
    async fn test_buffered_fallback_error() {
        let token = CancelToken::new(1);
        let state = seeded_state(1, &token);
        let transport = ScriptedTransport::buffered(r#"{"success":false,"error":"no quota"}"#);

        let outcome = run_job(&transport, &empty_request(), token, &state, None).await;
        assert!(matches!(outcome, Err(AnalyzeError::Protocol(m)) if m == "no quota"));

        let guard = state.lock().await;
        assert_eq!(guard.error().unwrap().message, "no quota");
    }

    #[tokio::test]
    async fn test_cancelled_before_first_chunk() {
        let token = CancelToken::new(1);
        let state = seeded_state(1, &token);
        let transport = ScriptedTransport::streaming(vec![
            ok_chunk("{\"type\":\"progress\",\"progress\":10}\n"),
        ]);

        token.cancel();
        let outcome = run_job(&transport, &empty_request(), token, &state, None).await;
        assert!(matches!(outcome, Err(AnalyzeError::Cancelled)));

        let guard = state.lock().await;
        assert_eq!(
            guard.error().unwrap().kind,
            crate::analysis::state::FailureKind::Cancelled
        );
        assert_eq!(
            guard.documents.list_by_status(DocumentStatus::Uploaded).len(),
            1
        );
    }
}
