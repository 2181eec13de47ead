//! Shared fixture builders for store unit tests.

use super::Store;
use crate::model::{Document, DocumentStatus, OcrResult, PageOffset, ProvenanceRecord, ProvenanceType};
use chrono::Utc;
use serde_json::json;

pub fn document(id: &str, hash: &str) -> Document {
    let now = Utc::now();
    Document {
        id: id.to_string(),
        path: format!("/docs/{id}.pdf"),
        filename: format!("{id}.pdf"),
        file_hash: hash.to_string(),
        size_bytes: 1024,
        doc_type: "pdf".into(),
        status: DocumentStatus::Processing,
        page_count: None,
        provenance_id: None,
        error_message: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn provenance(id: &str, record_type: ProvenanceType, root: &str, parent_ids: Vec<String>) -> ProvenanceRecord {
    ProvenanceRecord {
        id: id.to_string(),
        record_type,
        source_type: "test".into(),
        root_document_id: root.to_string(),
        content_hash: crate::hash::hash_str(id),
        input_hash: parent_ids.first().map(|_| crate::hash::hash_str("parent")),
        file_hash: None,
        processor: "test".into(),
        processor_version: "1".into(),
        parameters: json!({}),
        duration_ms: None,
        quality_score: None,
        parent_ids,
        chain_depth: 1,
        chain_path: vec![ProvenanceType::Document, record_type],
        created_at: Utc::now(),
    }
}

pub fn ocr_result(id: &str, document_id: &str, provenance_id: &str, text: &str) -> OcrResult {
    OcrResult {
        id: id.to_string(),
        document_id: document_id.to_string(),
        extracted_text: text.to_string(),
        text_length: text.len() as i64,
        mode: crate::model::OcrMode::Balanced,
        page_count: 1,
        page_offsets: vec![PageOffset {
            page: 1,
            char_start: 0,
            char_end: text.len() as i64,
        }],
        quality_score: 0.9,
        cost_cents: 1.0,
        content_hash: crate::hash::hash_str(text),
        duration_ms: 10,
        provenance_id: provenance_id.to_string(),
        created_at: Utc::now(),
    }
}

/// Creates a document + its OCR result + the two provenance records they need,
/// returning `(store, document_id, ocr_result_id)`.
pub async fn seeded_store(text: &str) -> (Store, String, String) {
    let store = Store::open_in_memory().await.unwrap();
    let doc = document("doc-1", "sha256:seed");

    let mut doc_provenance = provenance("prov-doc-1", ProvenanceType::Document, &doc.id, vec![]);
    doc_provenance.content_hash = doc.file_hash.clone();
    doc_provenance.input_hash = None;
    store.insert_provenance(&doc_provenance).await.unwrap();
    store.create_document(&doc).await.unwrap();

    let mut ocr_provenance = provenance(
        "prov-ocr-1",
        ProvenanceType::OcrResult,
        &doc.id,
        vec!["prov-doc-1".into()],
    );
    ocr_provenance.content_hash = crate::hash::hash_str(text);
    ocr_provenance.input_hash = Some(doc.file_hash.clone());
    store.insert_provenance(&ocr_provenance).await.unwrap();
    let ocr = ocr_result("ocr-1", &doc.id, "prov-ocr-1", text);
    store.insert_ocr_result(&ocr).await.unwrap();

    (store, doc.id, ocr.id)
}
