//! Pipeline orchestrator (component M): drives one document through the
//! full `pending -> ocr -> chunk -> embed -> vlm -> extract -> kg -> complete`
//! state machine (§4.8), wiring together every earlier component. Stages are
//! independently re-runnable without redoing OCR: chunk only needs the OCR
//! result, embed only needs chunks, extract only needs OCR text, KG only
//! needs entities.

use crate::chunker::{atomic_aware_spans, page_aware_spans, AtomicRegion, ChunkSpan};
use crate::config::DocProvConfig;
use crate::embedder::{embed_checked, Embedder};
use crate::entity_extractor::{EntityExtractor, ExtractionRunner};
use crate::error::{PipelineError, Result};
use crate::hash::hash_str;
use crate::knowledge_graph::{KnowledgeGraphBuilder, ResolutionThresholds};
use crate::model::{Chunk, DocumentStatus, EmbeddingStatus, EmbeddingTask, OcrMode, PageLocation};
use crate::ocr::OcrOrchestrator;
use crate::provenance_tracker::{NewRecord, ProvenanceTracker};
use crate::store::provenance::new_id;
use crate::store::Store;
use crate::vlm::VlmOrchestrator;
use std::sync::Arc;

/// A single document's stage-by-stage outcome, for callers that want to
/// report progress without aborting the whole run on a single failure.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub ocr_ran: bool,
    pub chunks_created: usize,
    pub embeddings_created: usize,
    pub images_described: usize,
    pub entities_extracted: usize,
    pub kg_nodes_touched: Option<usize>,
}

pub struct DocumentPipeline {
    store: Arc<Store>,
    config: DocProvConfig,
    ocr: OcrOrchestrator,
    vlm: VlmOrchestrator,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn EntityExtractor>,
}

impl DocumentPipeline {
    pub fn new(
        store: Arc<Store>,
        config: DocProvConfig,
        ocr: OcrOrchestrator,
        vlm: VlmOrchestrator,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn EntityExtractor>,
    ) -> Self {
        Self { store, config, ocr, vlm, embedder, extractor }
    }

    /// Runs every stage the configuration enables, in order, stopping at the
    /// first stage that fails. Later stages are skipped (not failed) when an
    /// optional stage is disabled by configuration.
    pub async fn run_document(&self, document_id: &str) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();

        self.run_ocr(document_id, self.config.default_ocr_mode).await?;
        report.ocr_ran = true;

        report.chunks_created = self.run_chunk(document_id).await?;
        report.embeddings_created = self.run_embed(document_id).await?;
        report.images_described = self.run_vlm(document_id).await?;

        if self.config.auto_extract_entities {
            report.entities_extracted = self.run_extract(document_id).await?;
            if self.config.auto_build_kg {
                report.kg_nodes_touched = Some(self.run_kg(document_id).await?);
            }
        }

        self.store.set_document_status(document_id, DocumentStatus::Complete, None).await?;
        Ok(report)
    }

    /// Stage: OCR. Requires the document to exist and carry a DOCUMENT
    /// provenance record; delegates entirely to [`OcrOrchestrator`].
    pub async fn run_ocr(&self, document_id: &str, mode: OcrMode) -> Result<()> {
        self.ocr.process_document(document_id, mode).await?;
        Ok(())
    }

    /// Stage: chunk. Requires an OCR result; re-chunking a document simply
    /// replaces its chunk set (callers doing that must delete the previous
    /// chunks themselves — this stage only ever inserts).
    pub async fn run_chunk(&self, document_id: &str) -> Result<usize> {
        let ocr = self
            .store
            .get_ocr_result_for_document(document_id)
            .await?
            .ok_or_else(|| PipelineError::MissingDependency {
                document_id: document_id.to_string(),
                stage: "chunk",
                dependency: "ocr result",
            })?;

        let chunk_size = self.config.chunk_size.chunk_size as i64;
        let overlap_ratio = self.config.chunk_size.overlap_ratio();

        let spans: Vec<(ChunkSpan, i64)> = if ocr.page_offsets.len() > 1 {
            page_aware_spans(&ocr.page_offsets, chunk_size, overlap_ratio)
        } else {
            let atomic: Vec<AtomicRegion> = Vec::new();
            atomic_aware_spans(ocr.text_length, &atomic, chunk_size, overlap_ratio)
                .into_iter()
                .map(|span| (span, ocr.page_offsets.first().map(|p| p.page).unwrap_or(1)))
                .collect()
        };

        let tracker = ProvenanceTracker::new(&self.store);
        let mut chunks = Vec::with_capacity(spans.len());
        for (index, (span, page)) in spans.iter().enumerate() {
            let start = *span;
            let text = slice_chars(&ocr.extracted_text, start.start, start.end);
            let text_hash = hash_str(&text);
            let provenance = tracker
                .create(NewRecord {
                    record_type: crate::model::ProvenanceType::Chunk,
                    source_type: "chunker".into(),
                    root_document_id: document_id.to_string(),
                    content_hash: text_hash.clone(),
                    input_hash: Some(ocr.content_hash.clone()),
                    file_hash: None,
                    processor: "chunker".into(),
                    processor_version: "1".into(),
                    parameters: serde_json::json!({ "chunk_size": chunk_size, "overlap_ratio": overlap_ratio }),
                    duration_ms: None,
                    quality_score: None,
                    parent_ids: vec![ocr.provenance_id.clone()],
                })
                .await?;

            let overlap_with_previous = spans
                .get(index.wrapping_sub(1))
                .filter(|_| index > 0)
                .map(|(prev, _)| (prev.end - start.start).max(0))
                .unwrap_or(0);
            let overlap_with_next = spans
                .get(index + 1)
                .map(|(next, _)| (start.end - next.start).max(0))
                .unwrap_or(0);

            chunks.push(Chunk {
                id: new_id("chunk"),
                document_id: document_id.to_string(),
                ocr_result_id: ocr.id.clone(),
                chunk_index: index as i64,
                character_start: start.start,
                character_end: start.end,
                text,
                text_hash,
                page_location: PageLocation::Single(*page),
                overlap_with_previous,
                overlap_with_next,
                is_atomic: start.is_atomic,
                embedding_status: EmbeddingStatus::Pending,
                provenance_id: provenance.id,
                created_at: chrono::Utc::now(),
            });
        }

        let created = chunks.len();
        if created > 0 {
            self.store.insert_chunks(&chunks).await?;
        }
        Ok(created)
    }

    /// Stage: embed. Requires chunks; embeds every chunk still `pending`,
    /// batched per `config.embedding_batch_size`.
    pub async fn run_embed(&self, document_id: &str) -> Result<usize> {
        let chunks = self.store.list_chunks_for_document(document_id).await?;
        if chunks.is_empty() {
            if self.ocr_text_is_empty(document_id, "embed", "chunks").await? {
                return Ok(0);
            }
            return Err(PipelineError::MissingDependency {
                document_id: document_id.to_string(),
                stage: "embed",
                dependency: "chunks",
            }
            .into());
        }

        let pending: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| c.embedding_status == EmbeddingStatus::Pending)
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let tracker = ProvenanceTracker::new(&self.store);
        let mut created = 0;
        for batch in pending.chunks(self.config.embedding_batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embed_checked(self.embedder.as_ref(), &texts, EmbeddingTask::Document).await?;

            for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                let content_hash = hash_str(&chunk.text);
                let provenance = tracker
                    .create(NewRecord {
                        record_type: crate::model::ProvenanceType::Embedding,
                        source_type: "embedder".into(),
                        root_document_id: document_id.to_string(),
                        content_hash: content_hash.clone(),
                        input_hash: Some(chunk.text_hash.clone()),
                        file_hash: None,
                        processor: self.embedder.model_name().to_string(),
                        processor_version: self.embedder.model_version().to_string(),
                        parameters: serde_json::json!({ "device": self.config.embedding_device }),
                        duration_ms: None,
                        quality_score: None,
                        parent_ids: vec![chunk.provenance_id.clone()],
                    })
                    .await?;

                let embedding = crate::model::Embedding {
                    id: new_id("embed"),
                    chunk_id: Some(chunk.id.clone()),
                    image_id: None,
                    extraction_id: None,
                    model: self.embedder.model_name().to_string(),
                    model_version: self.embedder.model_version().to_string(),
                    task: EmbeddingTask::Document,
                    device: self.config.embedding_device.clone(),
                    source_text: chunk.text.clone(),
                    content_hash,
                    dimension: vector.len() as i64,
                    provenance_id: provenance.id,
                    created_at: chrono::Utc::now(),
                };
                self.store.insert_embedding(&embedding, vector).await?;
                self.store.set_chunk_embedding_status(&chunk.id, EmbeddingStatus::Complete).await?;
                created += 1;
            }
        }
        Ok(created)
    }

    /// Stage: VLM. Describes every image belonging to the document still
    /// awaiting a description; skipped entirely if the document has none.
    pub async fn run_vlm(&self, document_id: &str) -> Result<usize> {
        let outcomes = self.vlm.describe_pending_for_document(document_id).await?;
        let succeeded = outcomes.iter().filter(|(_, r)| r.is_ok()).count();
        Ok(succeeded)
    }

    /// Stage: extract. Requires OCR text (via chunks); delegates to
    /// [`ExtractionRunner`].
    pub async fn run_extract(&self, document_id: &str) -> Result<usize> {
        let chunks = self.store.list_chunks_for_document(document_id).await?;
        if chunks.is_empty() {
            if self.ocr_text_is_empty(document_id, "extract", "ocr text").await? {
                return Ok(0);
            }
            return Err(PipelineError::MissingDependency {
                document_id: document_id.to_string(),
                stage: "extract",
                dependency: "ocr text",
            }
            .into());
        }
        let runner = ExtractionRunner::new(&self.store, self.extractor.as_ref());
        runner.extract_document(document_id).await
    }

    /// Stage: knowledge graph. Requires entities to already exist for the
    /// document.
    pub async fn run_kg(&self, document_id: &str) -> Result<usize> {
        let entities = self.store.list_entities_for_document(document_id).await?;
        if entities.is_empty() {
            if self.ocr_text_is_empty(document_id, "kg", "entities").await? {
                return Ok(0);
            }
            return Err(PipelineError::MissingDependency {
                document_id: document_id.to_string(),
                stage: "kg",
                dependency: "entities",
            }
            .into());
        }
        let builder = KnowledgeGraphBuilder::new(&self.store, ResolutionThresholds::default());
        builder.build_for_document(document_id).await
    }

    /// Distinguishes a document whose OCR text is genuinely empty (so a
    /// downstream stage finding nothing to do is a legitimate no-op) from one
    /// that never had OCR run at all (a real missing dependency). Returns
    /// `Ok(true)` only in the former case.
    async fn ocr_text_is_empty(&self, document_id: &str, stage: &'static str, dependency: &'static str) -> Result<bool> {
        let ocr = self
            .store
            .get_ocr_result_for_document(document_id)
            .await?
            .ok_or_else(|| PipelineError::MissingDependency {
                document_id: document_id.to_string(),
                stage,
                dependency,
            })?;
        Ok(ocr.text_length == 0)
    }

    /// Resets a document's derived state (scenario S6) and returns it to
    /// `pending` so [`Self::run_document`] can be called again from scratch.
    /// Only valid from `complete` or `failed`.
    pub async fn reprocess(&self, document_id: &str) -> Result<()> {
        let doc = self.store.get_document(document_id).await?;
        if !matches!(doc.status, DocumentStatus::Complete | DocumentStatus::Failed) {
            return Err(PipelineError::InvalidState {
                document_id: document_id.to_string(),
                stage: "reprocess",
                status: doc.status.to_string(),
            }
            .into());
        }
        self.store.reset_document_for_reprocess(document_id).await?;
        Ok(())
    }
}

/// Byte-oriented `extracted_text` sliced by the chunker's character offsets,
/// which are counted in UTF-8 bytes to match `page_offsets`/`character_*` in
/// the schema (§4.3 treats `char_start`/`char_end` as byte offsets into the
/// OCR text).
fn slice_chars(text: &str, start: i64, end: i64) -> String {
    let start = start.max(0) as usize;
    let end = (end.max(0) as usize).min(text.len());
    if start >= end || start > text.len() {
        return String::new();
    }
    text[start..end].to_string()
}
