//! Request and result types for the analysis service.

use crate::documents::{FileKind, TrackedDocument};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller-supplied knobs for a job. All fields are optional; defaults submit
/// an unconstrained analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub focus_areas: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_size: Option<String>,
    #[serde(default)]
    pub detailed_analysis: bool,
}

/// One document as submitted on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpload {
    pub id: String,
    pub file_type: FileKind,
    pub mime_type: String,
    pub encoded_payload: String,
}

/// Body of the job submission request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJobRequest {
    pub documents: Vec<DocumentUpload>,
    pub analysis_options: AnalysisOptions,
}

impl AnalysisJobRequest {
    /// Build a request from documents that already hold encoded payloads.
    /// Documents without a payload are skipped.
    pub fn from_documents(documents: &[TrackedDocument], options: AnalysisOptions) -> Self {
        let documents = documents
            .iter()
            .filter_map(|doc| {
                let encoded_payload = doc.encoded_payload.clone()?;
                Some(DocumentUpload {
                    id: doc.id.clone(),
                    file_type: doc.file_type,
                    mime_type: doc.mime_type.clone(),
                    encoded_payload,
                })
            })
            .collect();

        Self {
            documents,
            analysis_options: options,
        }
    }
}

/// Final payload of a completed job. Per-document findings plus optional
/// cross-document insights, both kept as raw JSON for the caller to interpret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJobResult {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregated_insights: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::DocumentStatus;
    use serde_json::json;

    #[test]
    fn test_request_serializes_camel_case() {
        let request = AnalysisJobRequest {
            documents: vec![DocumentUpload {
                id: "doc-1".into(),
                file_type: FileKind::Pdf,
                mime_type: "application/pdf".into(),
                encoded_payload: "aGVsbG8=".into(),
            }],
            analysis_options: AnalysisOptions {
                focus_areas: vec!["invoicing".into()],
                detailed_analysis: true,
                ..Default::default()
            },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "documents": [{
                    "id": "doc-1",
                    "fileType": "pdf",
                    "mimeType": "application/pdf",
                    "encodedPayload": "aGVsbG8="
                }],
                "analysisOptions": {
                    "focusAreas": ["invoicing"],
                    "detailedAnalysis": true
                }
            })
        );
    }

    #[test]
    fn test_from_documents_skips_missing_payloads() {
        let mut with_payload =
            TrackedDocument::new("a.pdf", FileKind::Pdf, 3, "application/pdf");
        with_payload.encoded_payload = Some("QQ==".into());
        with_payload.status = DocumentStatus::Uploaded;
        let without_payload = TrackedDocument::new("b.pdf", FileKind::Pdf, 3, "application/pdf");

        let request = AnalysisJobRequest::from_documents(
            &[with_payload.clone(), without_payload],
            AnalysisOptions::default(),
        );

        assert_eq!(request.documents.len(), 1);
        assert_eq!(request.documents[0].id, with_payload.id);
    }

    #[test]
    fn test_result_tolerates_missing_fields() {
        let result: AnalysisJobResult = serde_json::from_str("{}").unwrap();
        assert!(result.results.is_empty());
        assert!(result.aggregated_insights.is_none());
    }
}
