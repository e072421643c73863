//! Orchestrator state and the reducer that applies job events to it.
//!
//! Every [`JobEvent`] is tagged with the generation of the job that produced
//! it. The reducer only applies events matching the active generation, so a
//! cancelled or superseded stream that keeps draining can never mutate state.
//! The cancellation flag stops the read loop promptly; the generation check
//! is what makes late arrivals harmless.

use crate::analysis::cancel::CancelToken;
use crate::analysis::types::AnalysisJobResult;
use crate::documents::{DocumentRegistry, DocumentStatus, TrackedDocument};
use crate::events::AnalyzerEvent;
use serde::Serialize;
use std::fmt;

/// How a job failed. Cancellation is deliberate and gets its own kind so
/// callers can present it differently from an actual failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Protocol,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Network => "network",
            FailureKind::Protocol => "protocol",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Network,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Protocol,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: "Analysis cancelled".to_string(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A state-affecting occurrence within one job, tagged with its generation.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Progress {
        generation: u64,
        percent: i64,
    },
    Completed {
        generation: u64,
        result: AnalysisJobResult,
    },
    Failed {
        generation: u64,
        failure: JobFailure,
    },
}

impl JobEvent {
    fn generation(&self) -> u64 {
        match self {
            JobEvent::Progress { generation, .. }
            | JobEvent::Completed { generation, .. }
            | JobEvent::Failed { generation, .. } => *generation,
        }
    }
}

/// Caller-facing view of the orchestrator at one instant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub documents: Vec<TrackedDocument>,
    pub progress: u8,
    pub is_analyzing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisJobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}

#[derive(Debug, Default)]
pub struct AnalysisState {
    pub(crate) documents: DocumentRegistry,
    progress: u8,
    is_analyzing: bool,
    active_generation: Option<u64>,
    cancel: Option<CancelToken>,
    result: Option<AnalysisJobResult>,
    error: Option<JobFailure>,
}

impl AnalysisState {
    pub fn is_analyzing(&self) -> bool {
        self.is_analyzing
    }

    pub fn result(&self) -> Option<&AnalysisJobResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&JobFailure> {
        self.error.as_ref()
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Mark a new job active: flip every `uploaded` document to `analyzing`,
    /// clear the previous error, arm the token. Returns the documents that
    /// entered the job, payloads included, for request building.
    pub fn begin_job(&mut self, generation: u64, token: CancelToken) -> Vec<TrackedDocument> {
        let ready: Vec<TrackedDocument> = self
            .documents
            .list_by_status(DocumentStatus::Uploaded)
            .into_iter()
            .cloned()
            .collect();

        self.documents
            .transition_all(DocumentStatus::Uploaded, DocumentStatus::Analyzing);
        self.error = None;
        self.progress = 0;
        self.is_analyzing = true;
        self.active_generation = Some(generation);
        self.cancel = Some(token);
        ready
    }

    /// Apply one job event, returning the lifecycle events it caused.
    /// Events from any generation but the active one are discarded.
    pub fn apply(&mut self, event: JobEvent) -> Vec<AnalyzerEvent> {
        let generation = event.generation();
        if self.active_generation != Some(generation) {
            tracing::debug!(
                generation,
                active = ?self.active_generation,
                "[Reducer] Discarding event from inactive generation"
            );
            return Vec::new();
        }

        match event {
            JobEvent::Progress { percent, .. } => {
                if !(0..=100).contains(&percent) {
                    tracing::debug!(percent, "[Reducer] Ignoring out-of-range progress");
                    return Vec::new();
                }
                let percent = percent as u8;
                if percent < self.progress {
                    return Vec::new();
                }
                self.progress = percent;
                vec![AnalyzerEvent::AnalysisProgress {
                    generation,
                    percent,
                }]
            }
            JobEvent::Completed { result, .. } => {
                self.result = Some(result);
                self.progress = 100;
                let changed = self
                    .documents
                    .transition_all(DocumentStatus::Analyzing, DocumentStatus::Analyzed);
                self.finish_job();

                let mut events: Vec<AnalyzerEvent> = changed
                    .into_iter()
                    .map(|id| AnalyzerEvent::DocumentUpdated {
                        id,
                        status: DocumentStatus::Analyzed,
                    })
                    .collect();
                events.push(AnalyzerEvent::AnalysisCompleted { generation });
                events
            }
            JobEvent::Failed { failure, .. } => {
                let changed = self
                    .documents
                    .transition_all(DocumentStatus::Analyzing, DocumentStatus::Uploaded);
                self.error = Some(failure.clone());
                self.finish_job();

                let mut events: Vec<AnalyzerEvent> = changed
                    .into_iter()
                    .map(|id| AnalyzerEvent::DocumentUpdated {
                        id,
                        status: DocumentStatus::Uploaded,
                    })
                    .collect();
                events.push(AnalyzerEvent::AnalysisFailed {
                    generation,
                    failure,
                });
                events
            }
        }
    }

    /// Signal the active job's token, if any. The reducer applies the
    /// cancellation failure separately, through the read loop noticing.
    pub fn cancel_active(&mut self) -> bool {
        match &self.cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop everything: cancel any active job and return to the empty state.
    pub fn reset(&mut self) {
        if let Some(token) = &self.cancel {
            token.cancel();
        }
        self.documents.clear();
        self.progress = 0;
        self.is_analyzing = false;
        self.active_generation = None;
        self.cancel = None;
        self.result = None;
        self.error = None;
    }

    /// Replace documents and result wholesale from a persisted analysis.
    ///
    /// Restored documents are normalized to the payload invariant: a payload
    /// is dropped from non-bearing statuses, and a document arriving in a
    /// payload-bearing status without one is demoted to `Error`.
    pub fn restore(
        &mut self,
        documents: Vec<TrackedDocument>,
        result: Option<AnalysisJobResult>,
    ) {
        self.documents.clear();
        for mut doc in documents {
            if doc.status.requires_payload() {
                if doc.encoded_payload.is_none() {
                    tracing::debug!(
                        id = %doc.id,
                        "[Reducer] Restored document lacks a payload, demoting to error"
                    );
                    doc.status = DocumentStatus::Error;
                }
            } else {
                doc.encoded_payload = None;
            }
            self.documents.add(doc);
        }
        self.progress = if result.is_some() { 100 } else { 0 };
        self.result = result;
        self.error = None;
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            documents: self.documents.iter().cloned().collect(),
            progress: self.progress,
            is_analyzing: self.is_analyzing,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }

    fn finish_job(&mut self) {
        self.is_analyzing = false;
        self.active_generation = None;
        self.cancel = None;
    }
}
