//! Client-side orchestrator for document analysis.
//!
//! Callers register files, which are validated, classified, and encoded to
//! transportable payloads. A job submits every uploaded document to the
//! analysis service, decodes the newline-delimited progress stream it
//! answers with, and reduces frames into observable state: progress
//! percentage, per-document status, results, and a single error slot.
//! Completed analyses can be saved, reloaded, and shared through the
//! persistence gateway.
//!
//! Entry point: [`DocumentAnalyzer`].

mod analysis;
mod analyzer;
mod config;
mod documents;
mod events;
mod http;
mod logging;
mod persistence;
mod transport;

pub use analysis::job::AnalyzeError;
pub use analysis::state::{FailureKind, JobFailure, StateSnapshot};
pub use analysis::stream::{DecodeError, FrameDecoder, StreamFrame, MAX_STREAM_BUFFER_SIZE};
pub use analysis::types::{
    AnalysisJobRequest, AnalysisJobResult, AnalysisOptions, DocumentUpload,
};
pub use analyzer::DocumentAnalyzer;
pub use config::{
    AnalyzerConfig, ConfigError, SupportedTypes, TypeTable, DEFAULT_MAX_FILES,
    DEFAULT_MAX_FILE_SIZE,
};
pub use documents::encoder::{
    EncodeError, FailedUpload, RejectedUpload, UploadReport, ValidationError,
};
pub use documents::registry::{DocumentRegistry, RegistryError};
pub use documents::types::{DocumentStatus, FileKind, TrackedDocument, UploadFile, UploadSource};
pub use events::{AnalyzerEvent, EventSink};
pub use logging::init_tracing;
pub use persistence::{
    HttpPersistenceGateway, PersistenceError, PersistenceGateway, SavedAnalysisSnapshot,
    ShareRequest,
};
pub use transport::{
    AnalysisResponse, AnalysisTransport, ByteStream, HttpTransport, TransportError,
};
