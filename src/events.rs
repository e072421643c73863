//! Observable lifecycle events.
//!
//! A caller registers an [`EventSink`] to follow document status changes and
//! job progress without polling snapshots. Sinks are called outside the state
//! lock and must not block.

use crate::analysis::state::JobFailure;
use crate::documents::DocumentStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzerEvent {
    DocumentUpdated {
        id: String,
        status: DocumentStatus,
    },
    AnalysisProgress {
        generation: u64,
        percent: u8,
    },
    AnalysisCompleted {
        generation: u64,
    },
    AnalysisFailed {
        generation: u64,
        failure: JobFailure,
    },
}

pub trait EventSink: Send + Sync {
    fn on_event(&self, event: AnalyzerEvent);
}
