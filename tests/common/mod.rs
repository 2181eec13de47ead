//! Shared fixtures for integration tests.

use async_trait::async_trait;
use chrono::Utc;
use docprov::*;
use serde_json::json;
use std::sync::Arc;

pub fn new_document(id: &str, file_hash: &str) -> docprov::model::Document {
    let now = Utc::now();
    docprov::model::Document {
        id: id.to_string(),
        path: format!("/docs/{id}.pdf"),
        filename: format!("{id}.pdf"),
        file_hash: file_hash.to_string(),
        size_bytes: 2048,
        doc_type: "pdf".into(),
        status: docprov::model::DocumentStatus::Pending,
        page_count: None,
        provenance_id: None,
        error_message: None,
        created_at: now,
        updated_at: now,
    }
}

/// Creates a pending document with its DOCUMENT provenance record seeded, and
/// points `document.provenance_id` at it.
pub async fn seed_pending_document(store: &Store, id: &str, file_hash: &str) -> String {
    let tracker = ProvenanceTracker::new(store);
    let provenance = tracker
        .create(NewRecord {
            record_type: docprov::model::ProvenanceType::Document,
            source_type: "upload".into(),
            root_document_id: id.to_string(),
            content_hash: file_hash.to_string(),
            input_hash: None,
            file_hash: Some(file_hash.to_string()),
            processor: "ingest".into(),
            processor_version: "1".into(),
            parameters: json!({}),
            duration_ms: None,
            quality_score: None,
            parent_ids: vec![],
        })
        .await
        .unwrap();

    let mut doc = new_document(id, file_hash);
    doc.provenance_id = Some(provenance.id.clone());
    store.create_document(&doc).await.unwrap();
    provenance.id
}

pub struct FixedOcr {
    pub text: &'static str,
}

#[async_trait]
impl OcrBackend for FixedOcr {
    async fn process(
        &self,
        _path: &str,
        _mode: docprov::model::OcrMode,
    ) -> std::result::Result<OcrOutput, docprov::error::BackendError> {
        Ok(OcrOutput {
            text: self.text.to_string(),
            page_count: 1,
            page_offsets: vec![docprov::model::PageOffset {
                page: 1,
                char_start: 0,
                char_end: self.text.len() as i64,
            }],
            quality_score: 0.95,
            cost_cents: 2.0,
            duration_ms: 50,
        })
    }
}

pub struct NoopVlm;

#[async_trait]
impl VlmBackend for NoopVlm {
    async fn describe(
        &self,
        _image_path: &str,
    ) -> std::result::Result<VlmOutput, docprov::error::BackendError> {
        Ok(VlmOutput {
            description: "no images".into(),
            structured_data: None,
            confidence: 1.0,
            tokens_used: 0,
            duration_ms: 1,
        })
    }
}

pub struct FakeEmbedder;

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        _task: docprov::model::EmbeddingTask,
    ) -> docprov::error::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|_| vec![0.1f32; docprov::vector_index::DIMENSION])
            .collect())
    }

    fn model_name(&self) -> &str {
        "fake-embed"
    }

    fn model_version(&self) -> &str {
        "1"
    }
}

/// Recognizes two fixed company names as Organization entities; anything else
/// yields no entities. Good enough to drive KG/comparison tests deterministically.
pub struct NamedOrgExtractor {
    pub names: &'static [&'static str],
}

#[async_trait]
impl EntityExtractor for NamedOrgExtractor {
    async fn extract(
        &self,
        chunk_id: &str,
        text: &str,
    ) -> std::result::Result<Vec<RawEntity>, docprov::error::BackendError> {
        let mut found = Vec::new();
        for name in self.names {
            if let Some(start) = text.find(name) {
                found.push(RawEntity {
                    entity_type: docprov::model::EntityType::Organization,
                    raw_text: name.to_string(),
                    normalized_text: name.to_lowercase(),
                    confidence: 0.9,
                    metadata: json!({}),
                    mentions: vec![RawMention {
                        chunk_id: chunk_id.to_string(),
                        page_number: 1,
                        character_start: start as i64,
                        character_end: (start + name.len()) as i64,
                        context_snippet: name.to_string(),
                    }],
                });
            }
        }
        Ok(found)
    }
}

pub fn resilient() -> Arc<Resilient> {
    Arc::new(Resilient::new(
        "test",
        docprov::config::ResilienceConfig::default(),
        1000.0,
        1000.0,
    ))
}
