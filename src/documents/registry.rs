//! In-memory registry of tracked documents.
//!
//! Insertion order is preserved so callers see documents in the order they
//! were added. Status transitions go through [`DocumentRegistry::set_status`],
//! which enforces the payload invariant: a document can only sit in a
//! payload-bearing status while it actually holds an encoded payload.

use crate::documents::types::{DocumentStatus, TrackedDocument};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown document: {0}")]
    UnknownDocument(String),

    #[error("document {id} cannot enter {status:?} without an encoded payload")]
    MissingPayload { id: String, status: DocumentStatus },
}

#[derive(Debug, Default, Clone)]
pub struct DocumentRegistry {
    documents: Vec<TrackedDocument>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document and return its id.
    pub fn add(&mut self, document: TrackedDocument) -> String {
        let id = document.id.clone();
        self.documents.push(document);
        id
    }

    pub fn get(&self, id: &str) -> Option<&TrackedDocument> {
        self.documents.iter().find(|d| d.id == id)
    }

    /// Move a document to `status`, attaching or clearing its payload as the
    /// target status requires.
    ///
    /// Payload-bearing statuses keep an existing payload when `payload` is
    /// `None`; entering one with no payload at all is an error. Non-bearing
    /// statuses always drop the payload.
    pub fn set_status(
        &mut self,
        id: &str,
        status: DocumentStatus,
        payload: Option<String>,
    ) -> Result<(), RegistryError> {
        let doc = self
            .documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| RegistryError::UnknownDocument(id.to_string()))?;

        if status.requires_payload() {
            if payload.is_some() {
                doc.encoded_payload = payload;
            }
            if doc.encoded_payload.is_none() {
                return Err(RegistryError::MissingPayload {
                    id: id.to_string(),
                    status,
                });
            }
        } else {
            doc.encoded_payload = None;
        }

        doc.status = status;
        Ok(())
    }

    /// Remove a document. Returns false when the id is unknown.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.documents.len();
        self.documents.retain(|d| d.id != id);
        self.documents.len() < before
    }

    pub fn clear(&mut self) {
        self.documents.clear();
    }

    pub fn list_by_status(&self, status: DocumentStatus) -> Vec<&TrackedDocument> {
        self.documents.iter().filter(|d| d.status == status).collect()
    }

    /// Flip every document in `from` to `to`, returning the affected ids.
    /// Documents that would enter a payload-bearing status without a payload
    /// are left untouched, matching `set_status`.
    pub(crate) fn transition_all(&mut self, from: DocumentStatus, to: DocumentStatus) -> Vec<String> {
        let mut changed = Vec::new();
        for doc in self.documents.iter_mut().filter(|d| d.status == from) {
            if to.requires_payload() {
                if doc.encoded_payload.is_none() {
                    continue;
                }
            } else {
                doc.encoded_payload = None;
            }
            doc.status = to;
            changed.push(doc.id.clone());
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedDocument> {
        self.documents.iter()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
