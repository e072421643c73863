//! Core types for documents tracked through upload and analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Document category accepted for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Excel,
    Word,
    Image,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Excel => "excel",
            FileKind::Word => "word",
            FileKind::Image => "image",
        }
    }
}

/// Lifecycle status of a tracked document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Registered, payload not encoded yet
    Uploading,
    /// Payload encoded and ready for submission
    Uploaded,
    /// Included in the in-flight analysis job
    Analyzing,
    /// Covered by a completed analysis
    Analyzed,
    /// Encoding failed; payload absent
    Error,
}

impl DocumentStatus {
    /// Statuses that require an encoded payload to be present.
    pub fn requires_payload(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Uploaded | DocumentStatus::Analyzing | DocumentStatus::Analyzed
        )
    }
}

/// The orchestrator's record of one user-selected file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedDocument {
    pub id: String,
    pub file_name: String,
    pub file_type: FileKind,
    pub file_size: u64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub status: DocumentStatus,
    /// Base64 payload; present iff `status.requires_payload()`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_payload: Option<String>,
}

impl TrackedDocument {
    /// Create a fresh entry in the `Uploading` state.
    pub fn new(file_name: &str, file_type: FileKind, file_size: u64, mime_type: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_name: file_name.to_string(),
            file_type,
            file_size,
            mime_type: mime_type.to_string(),
            uploaded_at: Utc::now(),
            status: DocumentStatus::Uploading,
            encoded_payload: None,
        }
    }
}

/// A file handed to the orchestrator for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    /// Declared MIME type; guessed from the name when absent
    pub mime_type: Option<String>,
    pub source: UploadSource,
}

/// Where the raw bytes of an upload come from.
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// Contents already in memory
    Bytes(Vec<u8>),
    /// Read from disk at encode time
    Path(PathBuf),
}

impl UploadFile {
    /// Upload from an in-memory buffer.
    pub fn from_bytes(name: &str, mime_type: Option<&str>, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            mime_type: mime_type.map(str::to_string),
            source: UploadSource::Bytes(data),
        }
    }

    /// Upload from a filesystem path; the MIME type is guessed from the name.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        let mime_type = mime_guess::from_path(path).first_raw().map(str::to_string);
        Self {
            name,
            mime_type,
            source: UploadSource::Path(path.to_path_buf()),
        }
    }

    /// Size in bytes, if it can be determined without reading the contents.
    pub async fn size_hint(&self) -> Option<u64> {
        match &self.source {
            UploadSource::Bytes(data) => Some(data.len() as u64),
            UploadSource::Path(path) => tokio::fs::metadata(path).await.ok().map(|m| m.len()),
        }
    }
}
