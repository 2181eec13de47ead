//! VLM orchestrator (component I): describes extracted images, with dedup
//! against an already-completed image sharing the same `content_hash` (§4.4).

use crate::error::{BackendError, Result};
use crate::model::VlmStatus;
use crate::provenance_tracker::{NewRecord, ProvenanceTracker};
use crate::resilience::Resilient;
use async_trait::async_trait;
use std::sync::Arc;

/// Everything a VLM backend call produces for one image.
#[derive(Debug, Clone)]
pub struct VlmOutput {
    pub description: String,
    pub structured_data: Option<serde_json::Value>,
    pub confidence: f64,
    pub tokens_used: i64,
    pub duration_ms: i64,
}

/// External vision-language backend contract (§6): `describe(image_path) -> VlmOutput`.
#[async_trait]
pub trait VlmBackend: Send + Sync {
    async fn describe(&self, image_path: &str) -> std::result::Result<VlmOutput, BackendError>;
}

pub struct VlmOrchestrator {
    store: Arc<crate::store::Store>,
    backend: Arc<dyn VlmBackend>,
    resilience: Arc<Resilient>,
}

impl VlmOrchestrator {
    pub fn new(store: Arc<crate::store::Store>, backend: Arc<dyn VlmBackend>, resilience: Arc<Resilient>) -> Self {
        Self { store, backend, resilience }
    }

    /// Describes one image. If another image in the store already has a
    /// completed VLM result with the same `content_hash`, the description is
    /// copied instead of re-invoking the backend, and `vlm_tokens_used = 0`
    /// records that no backend call was made (§4.4).
    pub async fn describe_image(&self, image_id: &str) -> Result<()> {
        let image = self.store.get_image(image_id).await?;

        if let Some(existing) = self
            .store
            .find_completed_image_by_content_hash(&image.content_hash, image_id)
            .await?
        {
            self.store
                .set_vlm_result(
                    image_id,
                    existing.vlm_description.as_deref().unwrap_or_default(),
                    existing.vlm_structured_data.as_ref(),
                    existing.vlm_confidence.unwrap_or(0.0),
                    0,
                )
                .await?;
            self.write_provenance(&image, 0, 0).await?;
            return Ok(());
        }

        let output = match self.resilience.call(|| self.backend.describe(&image.path)).await {
            Ok(output) => output,
            Err(e) => {
                self.store.set_vlm_failed(image_id, &e.to_string()).await?;
                return Err(e.into());
            }
        };

        self.store
            .set_vlm_result(
                image_id,
                &output.description,
                output.structured_data.as_ref(),
                output.confidence,
                output.tokens_used,
            )
            .await?;
        self.write_provenance(&image, output.tokens_used, output.duration_ms).await?;
        Ok(())
    }

    async fn write_provenance(&self, image: &crate::model::Image, tokens_used: i64, duration_ms: i64) -> Result<()> {
        let parent_id = image.provenance_id.clone();
        let tracker = ProvenanceTracker::new(&self.store);
        tracker
            .create(NewRecord {
                record_type: crate::model::ProvenanceType::VlmDescription,
                source_type: "vlm".into(),
                root_document_id: image.document_id.clone(),
                content_hash: crate::hash::hash_str(&image.content_hash),
                input_hash: Some(image.content_hash.clone()),
                file_hash: None,
                processor: "vlm_orchestrator".into(),
                processor_version: "1".into(),
                parameters: serde_json::json!({ "tokens_used": tokens_used }),
                duration_ms: Some(duration_ms),
                quality_score: None,
                parent_ids: vec![parent_id],
            })
            .await?;
        Ok(())
    }

    pub async fn describe_pending_for_document(&self, document_id: &str) -> Result<Vec<(String, Result<()>)>> {
        let images = self.store.list_images_for_document(document_id).await?;
        let mut results = Vec::new();
        for image in images {
            if image.vlm_status != VlmStatus::Pending {
                continue;
            }
            let outcome = self.describe_image(&image.id).await;
            results.push((image.id, outcome));
        }
        Ok(results)
    }
}
