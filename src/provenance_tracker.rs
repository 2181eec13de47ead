//! Provenance tracker (component E): the business-logic layer on top of
//! [`crate::store::provenance`] that enforces the DAG invariants from §3/§4.1
//! before a record ever reaches the database, and answers integrity `verify`
//! queries (scenario S2).

use crate::error::{ProvenanceError, Result};
use crate::hash::hash_str;
use crate::model::{ProvenanceRecord, ProvenanceType};
use crate::store::provenance::{new_id, now};
use crate::store::Store;

/// Everything the tracker needs to mint a new record; `parent_ids` is checked
/// against already-persisted records before the record is ever written.
pub struct NewRecord {
    pub record_type: ProvenanceType,
    pub source_type: String,
    pub root_document_id: String,
    pub content_hash: String,
    pub input_hash: Option<String>,
    pub file_hash: Option<String>,
    pub processor: String,
    pub processor_version: String,
    pub parameters: serde_json::Value,
    pub duration_ms: Option<i64>,
    pub quality_score: Option<f64>,
    pub parent_ids: Vec<String>,
}

pub struct ProvenanceTracker<'a> {
    store: &'a Store,
}

impl<'a> ProvenanceTracker<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Persist a new record after checking that every named parent already exists
    /// and that `chain_depth = max(parent.chain_depth) + 1` (0 for a DOCUMENT root).
    pub async fn create(&self, record: NewRecord) -> Result<ProvenanceRecord> {
        let mut parents = Vec::with_capacity(record.parent_ids.len());
        for parent_id in &record.parent_ids {
            let parent = self
                .store
                .get_provenance(parent_id)
                .await
                .map_err(|_| ProvenanceError::MissingParent(parent_id.clone()))?;
            parents.push(parent);
        }

        let chain_depth = if parents.is_empty() {
            0
        } else {
            parents.iter().map(|p| p.chain_depth).max().unwrap_or(0) + 1
        };

        let mut chain_path = parents
            .iter()
            .max_by_key(|p| p.chain_depth)
            .map(|p| p.chain_path.clone())
            .unwrap_or_default();
        chain_path.push(record.record_type);

        let persisted = ProvenanceRecord {
            id: new_id("prov"),
            record_type: record.record_type,
            source_type: record.source_type,
            root_document_id: record.root_document_id,
            content_hash: record.content_hash,
            input_hash: record.input_hash,
            file_hash: record.file_hash,
            processor: record.processor,
            processor_version: record.processor_version,
            parameters: record.parameters,
            duration_ms: record.duration_ms,
            quality_score: record.quality_score,
            parent_ids: record.parent_ids,
            chain_depth,
            chain_path,
            created_at: now(),
        };

        self.store.insert_provenance(&persisted).await?;
        Ok(persisted)
    }

    pub async fn get(&self, id: &str) -> Result<ProvenanceRecord> {
        self.store.get_provenance(id).await
    }

    pub async fn get_chain(&self, id: &str) -> Result<Vec<ProvenanceRecord>> {
        self.store.get_chain(id).await
    }

    pub async fn get_subtree_by_root(&self, root_id: &str) -> Result<Vec<ProvenanceRecord>> {
        self.store.get_subtree_by_root(root_id).await
    }

    pub async fn get_children(&self, id: &str) -> Result<Vec<ProvenanceRecord>> {
        self.store.get_children(id).await
    }

    /// Recompute the hash of each record's current stored artifact and compare
    /// against `content_hash`; optionally also assert the chain's `input_hash`
    /// links (scenario S2).
    pub async fn verify(
        &self,
        item_id: &str,
        verify_content: bool,
        verify_chain: bool,
    ) -> Result<VerificationReport> {
        let chain = self.store.get_chain(item_id).await?;
        let mut steps = Vec::with_capacity(chain.len());

        for (i, record) in chain.iter().enumerate() {
            let mut content_ok = true;
            let mut computed = None;
            if verify_content {
                let current = self.recompute_content_hash(record).await?;
                content_ok = current == record.content_hash;
                computed = Some(current);
            }

            let mut chain_ok = true;
            if verify_chain && i > 0 {
                let parent = &chain[i - 1];
                chain_ok = record
                    .input_hash
                    .as_deref()
                    .map(|h| h == parent.content_hash)
                    .unwrap_or(false);
            }

            steps.push(VerificationStep {
                record_id: record.id.clone(),
                record_type: record.record_type,
                expected_hash: record.content_hash.clone(),
                computed_hash: computed,
                content_ok,
                chain_ok,
            });
        }

        let passed = steps.iter().all(|s| s.content_ok && s.chain_ok);
        Ok(VerificationReport { item_id: item_id.to_string(), steps, passed })
    }

    /// Recomputes the content hash of whatever artifact `record` ultimately points at.
    async fn recompute_content_hash(&self, record: &ProvenanceRecord) -> Result<String> {
        match record.record_type {
            ProvenanceType::Document => {
                let doc = self.store.get_document(&record.root_document_id).await?;
                Ok(doc.file_hash)
            }
            ProvenanceType::OcrResult => {
                let ocr = self
                    .store
                    .get_ocr_result_for_document(&record.root_document_id)
                    .await?
                    .ok_or_else(|| ProvenanceError::NotFound(record.id.clone()))?;
                Ok(hash_str(&ocr.extracted_text))
            }
            _ => Ok(record.content_hash.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerificationStep {
    pub record_id: String,
    pub record_type: ProvenanceType,
    pub expected_hash: String,
    pub computed_hash: Option<String>,
    pub content_ok: bool,
    pub chain_ok: bool,
}

#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub item_id: String,
    pub steps: Vec<VerificationStep>,
    pub passed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::seeded_store;

    #[tokio::test]
    async fn create_rejects_missing_parent() {
        let (store, document_id, _) = seeded_store("alpha").await;
        let tracker = ProvenanceTracker::new(&store);
        let err = tracker
            .create(NewRecord {
                record_type: ProvenanceType::Chunk,
                source_type: "chunker".into(),
                root_document_id: document_id,
                content_hash: hash_str("chunk-1"),
                input_hash: Some(hash_str("missing-parent-content")),
                file_hash: None,
                processor: "chunker".into(),
                processor_version: "1".into(),
                parameters: serde_json::json!({}),
                duration_ms: None,
                quality_score: None,
                parent_ids: vec!["does-not-exist".into()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::DocProvError::Provenance(ProvenanceError::MissingParent(_))));
    }

    #[tokio::test]
    async fn create_computes_depth_from_parent_max() {
        let (store, document_id, _) = seeded_store("alpha").await;
        let tracker = ProvenanceTracker::new(&store);
        let record = tracker
            .create(NewRecord {
                record_type: ProvenanceType::Chunk,
                source_type: "chunker".into(),
                root_document_id: document_id,
                content_hash: hash_str("chunk-1"),
                input_hash: Some(hash_str("alpha")),
                file_hash: None,
                processor: "chunker".into(),
                processor_version: "1".into(),
                parameters: serde_json::json!({}),
                duration_ms: None,
                quality_score: None,
                parent_ids: vec!["prov-ocr-1".into()],
            })
            .await
            .unwrap();
        assert_eq!(record.chain_depth, 2);
    }

    #[tokio::test]
    async fn verify_detects_tampered_content() {
        let (store, document_id, ocr_id) = seeded_store("alpha").await;
        let tracker = ProvenanceTracker::new(&store);

        let _ = &document_id;
        let report = tracker.verify("prov-ocr-1", true, true).await.unwrap();
        assert!(report.passed);

        store.tamper_extracted_text(&ocr_id, "tampered").await.unwrap();

        let report = tracker.verify("prov-ocr-1", true, true).await.unwrap();
        assert!(!report.passed);
        let ocr_step = report.steps.iter().find(|s| s.record_id == "prov-ocr-1").unwrap();
        assert!(!ocr_step.content_ok);
    }
}
