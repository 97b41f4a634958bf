//! In-memory `ContentSource` implementation.
//!
//! Real document stores (Google Docs, Notion, a CMS) are boundary adapters
//! outside this crate's scope; this module provides the in-memory backend
//! used by tests and by local/offline use of the pipeline.

use std::collections::HashMap;
use std::sync::RwLock;

use distro_types::{ContentSource, RawContent};

#[derive(Default)]
pub struct MemorySource {
    documents: RwLock<HashMap<String, Vec<serde_json::Value>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, document_id: impl Into<String>, items: Vec<serde_json::Value>) {
        self.documents.write().unwrap().insert(document_id.into(), items);
    }
}

impl ContentSource for MemorySource {
    fn fetch(&self, document_id: &str) -> anyhow::Result<RawContent> {
        let documents = self.documents.read().unwrap();
        let items = documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown document: {document_id}"))?;
        Ok(RawContent {
            document_id: document_id.to_string(),
            items,
        })
    }
}
