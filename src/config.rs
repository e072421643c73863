//! Analyzer configuration: upload limits, supported type tables, and the
//! analysis service endpoint.
//!
//! Loaded programmatically or from the environment (a `.env` file is honored,
//! checked in the working directory and its parent).

use crate::documents::FileKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default cap on tracked documents.
pub const DEFAULT_MAX_FILES: usize = 10;

/// Default per-file size limit (20 MB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;

/// Streaming analysis requests can run for minutes.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid API key: {0}")]
    InvalidApiKey(String),
}

/// Allowed MIME types and file extensions for one document category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeTable {
    pub kind: FileKind,
    pub mime_types: Vec<String>,
    pub extensions: Vec<String>,
}

/// The four supported document categories with their lookup tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportedTypes {
    tables: Vec<TypeTable>,
}

impl Default for SupportedTypes {
    fn default() -> Self {
        fn table(kind: FileKind, mimes: &[&str], exts: &[&str]) -> TypeTable {
            TypeTable {
                kind,
                mime_types: mimes.iter().map(|s| s.to_string()).collect(),
                extensions: exts.iter().map(|s| s.to_string()).collect(),
            }
        }

        Self {
            tables: vec![
                table(FileKind::Pdf, &["application/pdf"], &["pdf"]),
                table(
                    FileKind::Excel,
                    &[
                        "application/vnd.ms-excel",
                        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                        "text/csv",
                    ],
                    &["xls", "xlsx", "csv"],
                ),
                table(
                    FileKind::Word,
                    &[
                        "application/msword",
                        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                    ],
                    &["doc", "docx"],
                ),
                table(
                    FileKind::Image,
                    &["image/png", "image/jpeg", "image/webp", "image/gif"],
                    &["png", "jpg", "jpeg", "webp", "gif"],
                ),
            ],
        }
    }
}

impl SupportedTypes {
    /// Classify an upload by MIME type first, file extension second.
    /// Returns `None` when neither matches any table.
    pub fn classify(&self, mime_type: Option<&str>, file_name: &str) -> Option<FileKind> {
        if let Some(mime) = mime_type {
            let mime = mime.to_lowercase();
            for t in &self.tables {
                if t.mime_types.iter().any(|m| m == &mime) {
                    return Some(t.kind);
                }
            }
        }

        let ext = file_name.rsplit_once('.').map(|(_, e)| e.to_lowercase())?;
        self.tables
            .iter()
            .find(|t| t.extensions.iter().any(|e| e == &ext))
            .map(|t| t.kind)
    }

    /// Canonical MIME type to report for a category when the caller gave none.
    pub fn primary_mime(&self, kind: FileKind) -> &str {
        self.tables
            .iter()
            .find(|t| t.kind == kind)
            .and_then(|t| t.mime_types.first())
            .map(String::as_str)
            .unwrap_or("application/octet-stream")
    }
}

/// Caller-facing configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Base URL of the analysis service, without trailing slash
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_files: usize,
    /// Per-file size limit in bytes
    pub max_file_size: u64,
    pub request_timeout: Duration,
    pub supported_types: SupportedTypes,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            max_files: DEFAULT_MAX_FILES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            supported_types: SupportedTypes::default(),
        }
    }
}

impl AnalyzerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: trim_base_url(base_url.into()),
            ..Self::default()
        }
    }

    /// Read `AUTOLENS_API_URL` and `AUTOLENS_API_KEY` from the environment,
    /// loading a `.env` file first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_path("../.env");
        }

        let base_url = std::env::var("AUTOLENS_API_URL")
            .map_err(|_| ConfigError::MissingVar("AUTOLENS_API_URL"))?;

        let api_key = match std::env::var("AUTOLENS_API_KEY") {
            Ok(key) => {
                validate_api_key(&key)?;
                Some(key)
            }
            Err(_) => None,
        };

        Ok(Self {
            base_url: trim_base_url(base_url),
            api_key,
            ..Self::default()
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn trim_base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Reject placeholder or obviously malformed API keys before they reach the wire.
pub(crate) fn validate_api_key(key: &str) -> Result<(), ConfigError> {
    let key_lower = key.to_lowercase();

    let placeholder_patterns = [
        "your-api-key",
        "your_api_key",
        "api-key-here",
        "replace-with",
        "placeholder",
        "example",
        "xxx",
    ];

    for pattern in placeholder_patterns {
        if key_lower.contains(pattern) {
            return Err(ConfigError::InvalidApiKey(format!(
                "key appears to be a placeholder (contains '{}')",
                pattern
            )));
        }
    }

    if key.trim() != key {
        return Err(ConfigError::InvalidApiKey(
            "key contains leading or trailing whitespace".to_string(),
        ));
    }

    if key.contains('\n') || key.contains('\r') {
        return Err(ConfigError::InvalidApiKey(
            "key contains newline characters".to_string(),
        ));
    }

    Ok(())
}
