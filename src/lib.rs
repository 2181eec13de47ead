//! Document intelligence store.
//!
//! A content-addressed provenance DAG sitting underneath an OCR -> chunk ->
//! embed -> extract -> graph pipeline, with relational, vector, and
//! full-text storage behind a hybrid BM25/vector/RRF search surface and a
//! resolved knowledge graph over the extracted entities.
//!
//! # Example
//!
//! ```rust,no_run
//! use docprov::{DocProvConfig, Store};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DocProvConfig::default();
//!     let store = Store::open(std::path::Path::new(&config.default_storage_path)).await?;
//!     let metadata = store.metadata().await?;
//!     println!("documents so far: {}", metadata.documents);
//!     Ok(())
//! }
//! ```

pub mod chunker;
pub mod comparison;
pub mod config;
pub mod embedder;
pub mod entity_extractor;
pub mod error;
pub mod fts_index;
pub mod hash;
pub mod knowledge_graph;
pub mod ocr;
pub mod pipeline;
pub mod model;
pub mod provenance_tracker;
pub mod resilience;
pub mod runtime;
pub mod search;
pub mod store;
pub mod vector_index;
pub mod vlm;

pub use chunker::{atomic_aware_spans, fixed_spans, page_aware_spans, AtomicRegion, ChunkSpan};
pub use comparison::{ComparisonEngine, EntityDiff, StructuralDiff, TextDiff};
pub use config::{ChunkDefaults, DocProvConfig, ImageOptimizationConfig, ResilienceConfig};
pub use embedder::{embed_checked, Embedder};
pub use entity_extractor::{EntityExtractor, ExtractionRunner, RawEntity, RawMention};
pub use error::{DocProvError, ErrorCategory, Result};
pub use fts_index::{FtsHit, FtsIndex};
pub use knowledge_graph::{Contradiction, KnowledgeGraphBuilder, ResolutionThresholds, Severity};
pub use ocr::{OcrBackend, OcrOrchestrator, OcrOutput};
pub use pipeline::{DocumentPipeline, PipelineReport};
pub use provenance_tracker::{NewRecord, ProvenanceTracker, VerificationReport};
pub use resilience::Resilient;
pub use runtime::Runtime;
pub use search::{
    build_rag_context, expand_query, reciprocal_rank_fusion, rerank, BmHit, ClusterTable,
    ContextEntry, FusedHit, QueryExpansion, Reranker, RrfWeights, SearchEngine, SemanticHit,
    SynonymTable, TermCluster,
};
pub use store::Store;
pub use vlm::{VlmBackend, VlmOrchestrator, VlmOutput};

/// Crate version, as reported by Cargo.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
