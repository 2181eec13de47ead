//! Embedder façade (component G): batches text through an embedding backend
//! and validates its output shape before anything downstream trusts it (§4.5).

use crate::error::{DocProvError, Result, SearchError};
use crate::model::EmbeddingTask;
use crate::vector_index::DIMENSION;
use async_trait::async_trait;

/// External embedding backend contract (§6): `embed(batch, task) -> float32[N][D]`.
/// Empty input must return empty output; `D` is fixed globally at [`DIMENSION`].
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String], task: EmbeddingTask) -> Result<Vec<Vec<f32>>>;

    fn model_name(&self) -> &str;
    fn model_version(&self) -> &str;
}

/// Validates a backend's output against the façade's contract: rejects empty
/// input, rejects any vector whose length doesn't match [`DIMENSION`].
pub async fn embed_checked(
    embedder: &dyn Embedder,
    texts: &[String],
    task: EmbeddingTask,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Err(DocProvError::Validation("embedder input batch is empty".into()));
    }

    let vectors = embedder.embed(texts, task).await?;
    if vectors.len() != texts.len() {
        return Err(SearchError::DimensionMismatch {
            expected: texts.len(),
            actual: vectors.len(),
        }
        .into());
    }
    for vector in &vectors {
        if vector.len() != DIMENSION {
            return Err(SearchError::DimensionMismatch {
                expected: DIMENSION,
                actual: vector.len(),
            }
            .into());
        }
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: &[String], _task: EmbeddingTask) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1f32; DIMENSION]).collect())
        }

        fn model_name(&self) -> &str {
            "fake-embed"
        }

        fn model_version(&self) -> &str {
            "1"
        }
    }

    struct WrongDimensionEmbedder;

    #[async_trait]
    impl Embedder for WrongDimensionEmbedder {
        async fn embed(&self, texts: &[String], _task: EmbeddingTask) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1f32; DIMENSION - 1]).collect())
        }

        fn model_name(&self) -> &str {
            "wrong"
        }

        fn model_version(&self) -> &str {
            "1"
        }
    }

    #[tokio::test]
    async fn rejects_empty_batch() {
        let embedder = FakeEmbedder;
        let err = embed_checked(&embedder, &[], EmbeddingTask::Document).await.unwrap_err();
        assert!(matches!(err, DocProvError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_wrong_dimension_output() {
        let embedder = WrongDimensionEmbedder;
        let err = embed_checked(&embedder, &["alpha".to_string()], EmbeddingTask::Document)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DocProvError::Search(crate::error::SearchError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn accepts_well_formed_batch() {
        let embedder = FakeEmbedder;
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let vectors = embed_checked(&embedder, &texts, EmbeddingTask::Document).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), DIMENSION);
    }
}
