//! End-to-end pipeline coverage: a document driven through every stage via
//! the public API only, plus the reprocess cascade (scenario S6).

mod common;

use common::*;
use docprov::*;
use std::sync::Arc;

async fn build_pipeline(store: Arc<Store>) -> DocumentPipeline {
    let mut config = DocProvConfig::default();
    config.auto_extract_entities = true;
    config.auto_build_kg = true;

    let ocr = OcrOrchestrator::new(
        store.clone(),
        Arc::new(FixedOcr {
            text: "Alpha Corp filed the motion. Beta Corp opposed the motion.",
        }),
        resilient(),
    );
    let vlm = VlmOrchestrator::new(store.clone(), Arc::new(NoopVlm), resilient());

    DocumentPipeline::new(
        store,
        config,
        ocr,
        vlm,
        Arc::new(FakeEmbedder),
        Arc::new(NamedOrgExtractor {
            names: &["Alpha Corp", "Beta Corp"],
        }),
    )
}

#[tokio::test]
async fn full_pipeline_run_reaches_complete_with_every_stage_populated() {
    let store = Arc::new(Store::open_in_memory().await.unwrap());
    seed_pending_document(&store, "doc-1", "sha256:doc-1").await;
    let pipeline = build_pipeline(store.clone()).await;

    let report = pipeline.run_document("doc-1").await.unwrap();

    assert!(report.ocr_ran);
    assert!(report.chunks_created > 0);
    assert!(report.embeddings_created > 0);
    assert_eq!(report.entities_extracted, 2);
    // Both entities land in the same chunk, so exactly one co-occurrence
    // edge is written between their two resolved nodes.
    assert_eq!(report.kg_nodes_touched, Some(1));

    let doc = store.get_document("doc-1").await.unwrap();
    assert_eq!(doc.status, docprov::model::DocumentStatus::Complete);
}

#[tokio::test]
async fn reprocess_resets_state_and_rerun_completes_again() {
    let store = Arc::new(Store::open_in_memory().await.unwrap());
    seed_pending_document(&store, "doc-1", "sha256:doc-1").await;
    let pipeline = build_pipeline(store.clone()).await;

    pipeline.run_document("doc-1").await.unwrap();

    pipeline.reprocess("doc-1").await.unwrap();
    let reset = store.get_document("doc-1").await.unwrap();
    assert_eq!(reset.status, docprov::model::DocumentStatus::Pending);
    assert!(reset.page_count.is_none());
    assert!(store.list_entities_for_document("doc-1").await.unwrap().is_empty());

    let report = pipeline.run_document("doc-1").await.unwrap();
    assert!(report.ocr_ran);
    let done = store.get_document("doc-1").await.unwrap();
    assert_eq!(done.status, docprov::model::DocumentStatus::Complete);
}

#[tokio::test]
async fn reprocess_rejects_a_document_still_in_flight() {
    let store = Arc::new(Store::open_in_memory().await.unwrap());
    seed_pending_document(&store, "doc-1", "sha256:doc-1").await;
    let pipeline = build_pipeline(store.clone()).await;

    let err = pipeline.reprocess("doc-1").await.unwrap_err();
    assert!(matches!(
        err,
        DocProvError::Pipeline(docprov::error::PipelineError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn empty_ocr_text_yields_zero_chunks_and_still_completes() {
    let store = Arc::new(Store::open_in_memory().await.unwrap());
    seed_pending_document(&store, "doc-1", "sha256:doc-1").await;

    let mut config = DocProvConfig::default();
    config.auto_extract_entities = true;
    config.auto_build_kg = true;
    let ocr = OcrOrchestrator::new(store.clone(), Arc::new(FixedOcr { text: "" }), resilient());
    let vlm = VlmOrchestrator::new(store.clone(), Arc::new(NoopVlm), resilient());
    let pipeline = DocumentPipeline::new(
        store.clone(),
        config,
        ocr,
        vlm,
        Arc::new(FakeEmbedder),
        Arc::new(NamedOrgExtractor { names: &["Alpha Corp"] }),
    );

    let report = pipeline.run_document("doc-1").await.unwrap();
    assert!(report.ocr_ran);
    assert_eq!(report.chunks_created, 0);
    assert_eq!(report.embeddings_created, 0);

    let doc = store.get_document("doc-1").await.unwrap();
    assert_eq!(doc.status, docprov::model::DocumentStatus::Complete);
}

#[tokio::test]
async fn embed_before_chunk_reports_missing_dependency() {
    let store = Arc::new(Store::open_in_memory().await.unwrap());
    seed_pending_document(&store, "doc-1", "sha256:doc-1").await;
    let pipeline = build_pipeline(store.clone()).await;

    pipeline.run_ocr("doc-1", docprov::model::OcrMode::Balanced).await.unwrap();
    let err = pipeline.run_embed("doc-1").await.unwrap_err();
    assert!(matches!(
        err,
        DocProvError::Pipeline(docprov::error::PipelineError::MissingDependency { .. })
    ));
}
