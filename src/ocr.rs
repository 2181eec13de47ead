//! OCR orchestrator (component H): drives documents through an OCR backend,
//! writes the OCR result and its provenance record, retries exactly once on
//! timeout (§4.4).

use crate::error::{BackendError, PipelineError, Result};
use crate::hash::hash_str;
use crate::model::{DocumentStatus, OcrMode, OcrResult, PageOffset};
use crate::provenance_tracker::{NewRecord, ProvenanceTracker};
use crate::resilience::Resilient;
use crate::store::provenance::new_id;
use crate::store::Store;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

/// Everything an OCR backend call produces for one document.
#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub text: String,
    pub page_count: i64,
    pub page_offsets: Vec<PageOffset>,
    pub quality_score: f64,
    pub cost_cents: f64,
    pub duration_ms: i64,
}

/// External OCR backend contract (§6): `process(file_path, mode) -> OcrOutput`,
/// or one of `{OCR_API_ERROR, OCR_RATE_LIMIT, OCR_TIMEOUT}`.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    async fn process(&self, path: &str, mode: OcrMode) -> std::result::Result<OcrOutput, BackendError>;
}

pub const DEFAULT_MAX_CONCURRENT: usize = 3;

pub struct OcrOrchestrator {
    store: Arc<Store>,
    backend: Arc<dyn OcrBackend>,
    resilience: Arc<Resilient>,
}

impl OcrOrchestrator {
    pub fn new(store: Arc<Store>, backend: Arc<dyn OcrBackend>, resilience: Arc<Resilient>) -> Self {
        Self { store, backend, resilience }
    }

    /// Runs a single document through OCR, retrying exactly once on a timeout.
    /// On success: writes the OCR result, its OCR_RESULT provenance record
    /// (`input_hash = document.file_hash`, `parent_ids = [doc_provenance]`,
    /// `chain_depth = 1`), and transitions the document to `complete`. On any
    /// failure: transitions to `failed` and records the error message.
    pub async fn process_document(&self, document_id: &str, mode: OcrMode) -> Result<OcrResult> {
        let doc = self.store.get_document(document_id).await?;
        self.store.set_document_status(document_id, DocumentStatus::Processing, None).await?;

        let doc_provenance_id = doc.provenance_id.clone().ok_or_else(|| PipelineError::MissingDependency {
            document_id: document_id.to_string(),
            stage: "ocr",
            dependency: "document provenance record",
        })?;

        let outcome = match self.resilience.call(|| self.backend.process(&doc.path, mode)).await {
            Ok(output) => Ok(output),
            Err(BackendError::OcrTimeout(_)) => {
                self.resilience.call(|| self.backend.process(&doc.path, mode)).await
            }
            Err(e) => Err(e),
        };

        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                self.store
                    .set_document_status(document_id, DocumentStatus::Failed, Some(&e.to_string()))
                    .await?;
                return Err(e.into());
            }
        };

        let content_hash = hash_str(&output.text);
        let tracker = ProvenanceTracker::new(&self.store);
        let provenance = tracker
            .create(NewRecord {
                record_type: crate::model::ProvenanceType::OcrResult,
                source_type: "ocr".into(),
                root_document_id: document_id.to_string(),
                content_hash: content_hash.clone(),
                input_hash: Some(doc.file_hash.clone()),
                file_hash: Some(doc.file_hash.clone()),
                processor: "ocr_orchestrator".into(),
                processor_version: "1".into(),
                parameters: serde_json::json!({ "mode": mode.to_string() }),
                duration_ms: Some(output.duration_ms),
                quality_score: Some(output.quality_score),
                parent_ids: vec![doc_provenance_id],
            })
            .await?;

        let result = OcrResult {
            id: new_id("ocr"),
            document_id: document_id.to_string(),
            extracted_text: output.text,
            text_length: result_text_len(&output.page_offsets),
            mode,
            page_count: output.page_count,
            page_offsets: output.page_offsets,
            quality_score: output.quality_score,
            cost_cents: output.cost_cents,
            content_hash,
            duration_ms: output.duration_ms,
            provenance_id: provenance.id,
            created_at: chrono::Utc::now(),
        };

        self.store.insert_ocr_result(&result).await?;
        self.store.set_document_page_count(document_id, result.page_count).await?;
        self.store.set_document_status(document_id, DocumentStatus::Complete, None).await?;
        Ok(result)
    }

    /// Processes up to `max_concurrent` pending documents in parallel; a
    /// per-document failure does not stop the batch (§4.4, §7).
    pub async fn process_pending(
        &self,
        mode: OcrMode,
        limit: i64,
        max_concurrent: usize,
    ) -> Result<Vec<(String, Result<OcrResult>)>> {
        let pending = self.store.list_documents_by_status(DocumentStatus::Pending, limit).await?;
        let mut results = Vec::with_capacity(pending.len());

        for batch in pending.chunks(max_concurrent.max(1)) {
            let futures = batch
                .iter()
                .map(|doc| async move { (doc.id.clone(), self.process_document(&doc.id, mode).await) });
            results.extend(join_all(futures).await);
        }
        Ok(results)
    }
}

fn result_text_len(page_offsets: &[PageOffset]) -> i64 {
    page_offsets.iter().map(|p| p.char_end).max().unwrap_or(0)
}
