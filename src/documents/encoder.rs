//! Upload pipeline: validate incoming files, register them, then encode each
//! one on its own task.
//!
//! Validation and registration happen under a single lock so a batch is
//! admitted against a consistent document count. Encoding runs unlocked and
//! per-file, and every file settles independently: one unreadable path never
//! blocks or fails its siblings.

use crate::analysis::state::AnalysisState;
use crate::config::AnalyzerConfig;
use crate::documents::registry::RegistryError;
use crate::documents::types::{DocumentStatus, TrackedDocument, UploadFile, UploadSource};
use crate::events::{AnalyzerEvent, EventSink};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Why a file was turned away before registration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("document limit of {limit} reached")]
    TooManyFiles { limit: usize },

    #[error("{name} is {size} bytes, over the {limit} byte limit")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    #[error("{name} is not a supported document type")]
    UnsupportedType { name: String },
}

/// Why an admitted file failed to encode.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to read {name}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding task for {name} did not finish")]
    TaskFailed { name: String },
}

#[derive(Debug)]
pub struct RejectedUpload {
    pub name: String,
    pub error: ValidationError,
}

#[derive(Debug)]
pub struct FailedUpload {
    pub id: String,
    pub name: String,
    pub error: EncodeError,
}

/// Outcome of one upload batch.
#[derive(Debug, Default)]
pub struct UploadReport {
    /// Ids that reached `Uploaded` with a payload in place
    pub accepted: Vec<String>,
    /// Files refused during validation, never registered
    pub rejected: Vec<RejectedUpload>,
    /// Files registered but whose encoding failed, now in `Error`
    pub failed: Vec<FailedUpload>,
}

impl UploadReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.failed.is_empty()
    }
}

pub(crate) async fn run_uploads(
    state: &Arc<Mutex<AnalysisState>>,
    sink: Option<&Arc<dyn EventSink>>,
    files: Vec<UploadFile>,
    config: &AnalyzerConfig,
) -> UploadReport {
    let mut report = UploadReport::default();

    // Stat path-backed files before taking the lock. A stat failure leaves the
    // size unknown; the file is admitted and the read error surfaces at
    // encode time.
    let mut prepared = Vec::with_capacity(files.len());
    for file in files {
        let size = file.size_hint().await;
        prepared.push((file, size));
    }

    // One lock for the whole batch: the count check and registrations see a
    // consistent registry.
    let mut registered = Vec::new();
    {
        let mut guard = state.lock().await;
        for (file, size) in prepared {
            if guard.documents.len() >= config.max_files {
                report.rejected.push(RejectedUpload {
                    name: file.name,
                    error: ValidationError::TooManyFiles {
                        limit: config.max_files,
                    },
                });
                continue;
            }

            if let Some(size) = size {
                if size > config.max_file_size {
                    let name = file.name;
                    report.rejected.push(RejectedUpload {
                        error: ValidationError::FileTooLarge {
                            name: name.clone(),
                            size,
                            limit: config.max_file_size,
                        },
                        name,
                    });
                    continue;
                }
            }

            let Some(kind) = config
                .supported_types
                .classify(file.mime_type.as_deref(), &file.name)
            else {
                report.rejected.push(RejectedUpload {
                    error: ValidationError::UnsupportedType {
                        name: file.name.clone(),
                    },
                    name: file.name,
                });
                continue;
            };

            let mime = file
                .mime_type
                .clone()
                .unwrap_or_else(|| config.supported_types.primary_mime(kind).to_string());
            let doc = TrackedDocument::new(&file.name, kind, size.unwrap_or(0), &mime);
            let id = guard.documents.add(doc);
            registered.push((id, file));
        }
    }

    if let Some(sink) = sink {
        for (id, _) in &registered {
            sink.on_event(AnalyzerEvent::DocumentUpdated {
                id: id.clone(),
                status: DocumentStatus::Uploading,
            });
        }
    }

    // Fan out: one task per admitted file.
    let mut tasks = Vec::with_capacity(registered.len());
    for (id, file) in registered {
        let name = file.name.clone();
        let handle = tokio::spawn(async move { encode_file(file).await });
        tasks.push((id, name, handle));
    }

    // Fan in: wait for every task and settle each document on its own.
    for (id, name, handle) in tasks {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "[Uploads] Encoding task panicked");
                Err(EncodeError::TaskFailed { name: name.clone() })
            }
        };

        let event = {
            let mut guard = state.lock().await;
            match outcome {
                Ok(encoded) => {
                    match guard
                        .documents
                        .set_status(&id, DocumentStatus::Uploaded, Some(encoded))
                    {
                        Ok(()) => {
                            report.accepted.push(id.clone());
                            Some(AnalyzerEvent::DocumentUpdated {
                                id: id.clone(),
                                status: DocumentStatus::Uploaded,
                            })
                        }
                        Err(RegistryError::UnknownDocument(_)) => {
                            tracing::debug!(id = %id, "[Uploads] Document removed before upload settled");
                            None
                        }
                        Err(e) => {
                            tracing::warn!(id = %id, error = %e, "[Uploads] Could not settle upload");
                            None
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(file = %name, error = %error, "[Uploads] Encoding failed");
                    let event = guard
                        .documents
                        .set_status(&id, DocumentStatus::Error, None)
                        .ok()
                        .map(|_| AnalyzerEvent::DocumentUpdated {
                            id: id.clone(),
                            status: DocumentStatus::Error,
                        });
                    report.failed.push(FailedUpload { id, name, error });
                    event
                }
            }
        };

        if let (Some(sink), Some(event)) = (sink, event) {
            sink.on_event(event);
        }
    }

    report
}

async fn encode_file(file: UploadFile) -> Result<String, EncodeError> {
    let bytes = match file.source {
        UploadSource::Bytes(bytes) => bytes,
        UploadSource::Path(path) => {
            tokio::fs::read(&path).await.map_err(|source| EncodeError::Read {
                name: file.name.clone(),
                source,
            })?
        }
    };
    Ok(BASE64.encode(&bytes))
}
