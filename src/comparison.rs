//! Document comparison (component N): text/structural/entity diffing between
//! two documents, plus knowledge-graph contradiction detection reused
//! straight from [`crate::knowledge_graph::KnowledgeGraphBuilder`], persisted
//! through `store::comparisons` (§4.6).

use crate::error::Result;
use crate::hash::hash_str;
use crate::knowledge_graph::{Contradiction, KnowledgeGraphBuilder, ResolutionThresholds, Severity};
use crate::model::{Comparison, ProvenanceType};
use crate::provenance_tracker::{NewRecord, ProvenanceTracker};
use crate::store::provenance::new_id;
use crate::store::Store;
use std::collections::HashSet;

/// Line-level text diff: lines present only in A, only in B, and a crude
/// similarity ratio (shared lines over the larger line count).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TextDiff {
    pub only_in_a: Vec<String>,
    pub only_in_b: Vec<String>,
    pub similarity_ratio: f64,
}

/// Structural diff: page count and chunk count deltas between the two
/// documents' OCR results.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StructuralDiff {
    pub page_count_a: i64,
    pub page_count_b: i64,
    pub chunk_count_a: i64,
    pub chunk_count_b: i64,
}

/// Entity diff: normalized entity text present in one document's entity set
/// but not the other's, grouped by whether it is exclusive to A or B.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EntityDiff {
    pub only_in_a: Vec<String>,
    pub only_in_b: Vec<String>,
    pub shared: Vec<String>,
}

pub struct ComparisonEngine<'a> {
    store: &'a Store,
}

impl<'a> ComparisonEngine<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Computes and persists a [`Comparison`] between two documents: text
    /// diff over their OCR text, structural diff over page/chunk counts,
    /// entity diff over their resolved entity sets, and any knowledge-graph
    /// contradictions evidenced between the two (§4.6).
    pub async fn compare(&self, document_a_id: &str, document_b_id: &str) -> Result<Comparison> {
        let started = std::time::Instant::now();

        if let Some(existing) = self.store.find_comparison(document_a_id, document_b_id).await? {
            return Ok(existing);
        }

        let ocr_a = self.store.get_ocr_result_for_document(document_a_id).await?;
        let ocr_b = self.store.get_ocr_result_for_document(document_b_id).await?;
        let text_a = ocr_a.as_ref().map(|o| o.extracted_text.as_str()).unwrap_or("");
        let text_b = ocr_b.as_ref().map(|o| o.extracted_text.as_str()).unwrap_or("");
        let text_diff = diff_lines(text_a, text_b);

        let chunks_a = self.store.list_chunks_for_document(document_a_id).await?;
        let chunks_b = self.store.list_chunks_for_document(document_b_id).await?;
        let structural_diff = StructuralDiff {
            page_count_a: ocr_a.as_ref().map(|o| o.page_count).unwrap_or(0),
            page_count_b: ocr_b.as_ref().map(|o| o.page_count).unwrap_or(0),
            chunk_count_a: chunks_a.len() as i64,
            chunk_count_b: chunks_b.len() as i64,
        };

        let entities_a = self.store.list_entities_for_document(document_a_id).await?;
        let entities_b = self.store.list_entities_for_document(document_b_id).await?;
        let set_a: HashSet<String> = entities_a.iter().map(|e| e.normalized_text.clone()).collect();
        let set_b: HashSet<String> = entities_b.iter().map(|e| e.normalized_text.clone()).collect();
        let entity_diff = EntityDiff {
            only_in_a: sorted(set_a.difference(&set_b)),
            only_in_b: sorted(set_b.difference(&set_a)),
            shared: sorted(set_a.intersection(&set_b)),
        };

        let builder = KnowledgeGraphBuilder::new(self.store, ResolutionThresholds::default());
        let contradictions = builder.detect_contradictions(document_a_id, document_b_id).await?;

        let summary = summarize(&text_diff, &entity_diff, &contradictions);
        let content_hash = hash_str(&format!(
            "{}:{}:{}",
            text_diff.similarity_ratio,
            entity_diff.shared.len(),
            contradictions.len()
        ));

        let tracker = ProvenanceTracker::new(self.store);
        let doc_a = self.store.get_document(document_a_id).await?;
        let doc_b = self.store.get_document(document_b_id).await?;
        let mut parent_ids = Vec::new();
        parent_ids.extend(doc_a.provenance_id.clone());
        parent_ids.extend(doc_b.provenance_id.clone());

        let provenance = tracker
            .create(NewRecord {
                record_type: ProvenanceType::Comparison,
                source_type: "comparison_engine".into(),
                root_document_id: document_a_id.to_string(),
                content_hash: content_hash.clone(),
                input_hash: None,
                file_hash: None,
                processor: "comparison_engine".into(),
                processor_version: "1".into(),
                parameters: serde_json::json!({ "document_b_id": document_b_id }),
                duration_ms: Some(started.elapsed().as_millis() as i64),
                quality_score: None,
                parent_ids,
            })
            .await?;

        let comparison = Comparison {
            id: new_id("cmp"),
            document_a_id: document_a_id.to_string(),
            document_b_id: document_b_id.to_string(),
            similarity_ratio: text_diff.similarity_ratio,
            text_diff: serde_json::to_value(&text_diff)?,
            structural_diff: serde_json::to_value(&structural_diff)?,
            entity_diff: serde_json::to_value(&entity_diff)?,
            summary,
            content_hash,
            provenance_id: provenance.id,
            duration_ms: started.elapsed().as_millis() as i64,
            created_at: chrono::Utc::now(),
        };
        self.store.insert_comparison(&comparison).await?;
        Ok(comparison)
    }
}

fn diff_lines(a: &str, b: &str) -> TextDiff {
    let lines_a: HashSet<&str> = a.lines().collect();
    let lines_b: HashSet<&str> = b.lines().collect();
    let shared = lines_a.intersection(&lines_b).count();
    let larger = lines_a.len().max(lines_b.len()).max(1);

    TextDiff {
        only_in_a: sorted(lines_a.difference(&lines_b)),
        only_in_b: sorted(lines_b.difference(&lines_a)),
        similarity_ratio: shared as f64 / larger as f64,
    }
}

fn sorted<I: Iterator>(iter: I) -> Vec<String>
where
    I::Item: std::fmt::Display,
{
    let mut out: Vec<String> = iter.map(|s| s.to_string()).collect();
    out.sort();
    out
}

fn summarize(text_diff: &TextDiff, entity_diff: &EntityDiff, contradictions: &[Contradiction]) -> String {
    let high = contradictions.iter().filter(|c| c.severity == Severity::High).count();
    format!(
        "{:.0}% line-similar; {} shared entities, {} only in A, {} only in B; {} contradiction(s), {} high severity",
        text_diff.similarity_ratio * 100.0,
        entity_diff.shared.len(),
        entity_diff.only_in_a.len(),
        entity_diff.only_in_b.len(),
        contradictions.len(),
        high,
    )
}
