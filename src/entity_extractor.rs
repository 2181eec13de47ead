//! Entity extraction (component J): pulls typed entities with their chunk
//! mentions out of a document's text, deduplicating by `(type, normalized)`
//! within that document (§4.5).

use crate::error::{BackendError, Result};
use crate::model::EntityType;
use crate::provenance_tracker::{NewRecord, ProvenanceTracker};
use crate::store::entities::entity_type_str;
use crate::store::provenance::new_id;
use crate::store::Store;
use async_trait::async_trait;
use std::collections::HashMap;

/// One mention of a candidate entity inside a single chunk's text.
#[derive(Debug, Clone)]
pub struct RawMention {
    pub chunk_id: String,
    pub page_number: i64,
    pub character_start: i64,
    pub character_end: i64,
    pub context_snippet: String,
}

/// One candidate entity surfaced by a backend before dedup, with all of its mentions.
#[derive(Debug, Clone)]
pub struct RawEntity {
    pub entity_type: EntityType,
    pub raw_text: String,
    pub normalized_text: String,
    pub confidence: f64,
    pub metadata: serde_json::Value,
    pub mentions: Vec<RawMention>,
}

/// External entity extraction backend contract (§6): `extract(chunk_text, chunk_id) -> entities`.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, chunk_id: &str, text: &str) -> std::result::Result<Vec<RawEntity>, BackendError>;
}

pub struct ExtractionRunner<'a> {
    store: &'a Store,
    extractor: &'a dyn EntityExtractor,
}

impl<'a> ExtractionRunner<'a> {
    pub fn new(store: &'a Store, extractor: &'a dyn EntityExtractor) -> Self {
        Self { store, extractor }
    }

    /// Runs extraction over every chunk of a document, merges mentions for
    /// entities that share `(entity_type, normalized_text)` within the
    /// document, and persists one `entities` row per unique pair plus an
    /// `entity_mentions` row per raw mention.
    pub async fn extract_document(&self, document_id: &str) -> Result<usize> {
        let chunks = self.store.list_chunks_for_document(document_id).await?;

        let mut merged: HashMap<(EntityType, String), RawEntity> = HashMap::new();
        for chunk in &chunks {
            let candidates = self.extractor.extract(&chunk.id, &chunk.text).await?;
            for candidate in candidates {
                let key = (candidate.entity_type, candidate.normalized_text.clone());
                merged
                    .entry(key)
                    .and_modify(|existing| {
                        existing.confidence = existing.confidence.max(candidate.confidence);
                        existing.mentions.extend(candidate.mentions.clone());
                    })
                    .or_insert(candidate);
            }
        }

        let tracker = ProvenanceTracker::new(self.store);
        let mut count = 0;
        for ((entity_type, normalized_text), raw) in merged {
            let provenance = tracker
                .create(NewRecord {
                    record_type: crate::model::ProvenanceType::EntityExtraction,
                    source_type: "entity_extractor".into(),
                    root_document_id: document_id.to_string(),
                    content_hash: crate::hash::hash_str(&format!(
                        "{}:{}",
                        entity_type_str(entity_type),
                        normalized_text
                    )),
                    input_hash: None,
                    file_hash: None,
                    processor: "entity_extractor".into(),
                    processor_version: "1".into(),
                    parameters: serde_json::json!({}),
                    duration_ms: None,
                    quality_score: Some(raw.confidence),
                    parent_ids: raw
                        .mentions
                        .first()
                        .and_then(|m| self.chunk_provenance_id(&chunks, &m.chunk_id))
                        .into_iter()
                        .collect(),
                })
                .await?;

            let entity = crate::model::Entity {
                id: new_id("entity"),
                document_id: document_id.to_string(),
                entity_type,
                raw_text: raw.raw_text,
                normalized_text,
                confidence: raw.confidence,
                metadata: raw.metadata,
                provenance_id: provenance.id,
                created_at: chrono::Utc::now(),
            };
            self.store.insert_entity(&entity).await?;

            for mention in raw.mentions {
                self.store
                    .insert_mention(&crate::model::EntityMention {
                        id: new_id("mention"),
                        entity_id: entity.id.clone(),
                        chunk_id: mention.chunk_id,
                        page_number: mention.page_number,
                        character_start: mention.character_start,
                        character_end: mention.character_end,
                        context_snippet: mention.context_snippet,
                    })
                    .await?;
            }
            count += 1;
        }
        Ok(count)
    }

    fn chunk_provenance_id(&self, chunks: &[crate::model::Chunk], chunk_id: &str) -> Option<String> {
        chunks.iter().find(|c| c.id == chunk_id).map(|c| c.provenance_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chunk, EmbeddingStatus, PageLocation};
    use crate::store::test_support::seeded_store;

    struct FixedExtractor;

    #[async_trait]
    impl EntityExtractor for FixedExtractor {
        async fn extract(&self, chunk_id: &str, _text: &str) -> std::result::Result<Vec<RawEntity>, BackendError> {
            Ok(vec![RawEntity {
                entity_type: EntityType::Person,
                raw_text: "J. Smith".into(),
                normalized_text: "smith, j.".into(),
                confidence: 0.8,
                metadata: serde_json::json!({}),
                mentions: vec![RawMention {
                    chunk_id: chunk_id.to_string(),
                    page_number: 1,
                    character_start: 0,
                    character_end: 8,
                    context_snippet: "J. Smith works here".into(),
                }],
            }])
        }
    }

    async fn chunked_store() -> (Store, String) {
        let (store, document_id, ocr_id) = seeded_store("J. Smith works here. John Smith too.").await;
        store
            .insert_chunks(&[
                Chunk {
                    id: "c1".into(),
                    document_id: document_id.clone(),
                    ocr_result_id: ocr_id.clone(),
                    chunk_index: 0,
                    character_start: 0,
                    character_end: 20,
                    text: "J. Smith works here".into(),
                    text_hash: crate::hash::hash_str("J. Smith works here"),
                    page_location: PageLocation::Single(1),
                    overlap_with_previous: 0,
                    overlap_with_next: 0,
                    is_atomic: false,
                    embedding_status: EmbeddingStatus::Pending,
                    provenance_id: "prov-ocr-1".into(),
                    created_at: chrono::Utc::now(),
                },
                Chunk {
                    id: "c2".into(),
                    document_id: document_id.clone(),
                    ocr_result_id: ocr_id,
                    chunk_index: 1,
                    character_start: 20,
                    character_end: 37,
                    text: "John Smith too.".into(),
                    text_hash: crate::hash::hash_str("John Smith too."),
                    page_location: PageLocation::Single(1),
                    overlap_with_previous: 0,
                    overlap_with_next: 0,
                    is_atomic: false,
                    embedding_status: EmbeddingStatus::Pending,
                    provenance_id: "prov-ocr-1".into(),
                    created_at: chrono::Utc::now(),
                },
            ])
            .await
            .unwrap();
        (store, document_id)
    }

    #[tokio::test]
    async fn merges_mentions_sharing_type_and_normalized_text() {
        let (store, document_id) = chunked_store().await;
        let extractor = FixedExtractor;
        let runner = ExtractionRunner::new(&store, &extractor);

        let count = runner.extract_document(&document_id).await.unwrap();
        assert_eq!(count, 1, "both chunks surface the same normalized entity, so only one row is created");

        let entities = store.list_entities_for_document(&document_id).await.unwrap();
        assert_eq!(entities.len(), 1);
        let mentions = store.list_mentions_for_entity(&entities[0].id).await.unwrap();
        assert_eq!(mentions.len(), 2);
    }
}
