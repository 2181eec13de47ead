//! CRUD for `embeddings`, including the raw vector BLOB (component C lives on
//! top of this table: see [`crate::vector_index`]).

use super::documents::parse_dt;
use super::Store;
use crate::error::{Result, StoreError};
use crate::model::{Embedding, EmbeddingTask};
use sqlx::Row;

impl Store {
    pub async fn insert_embedding(&self, embedding: &Embedding, vector: &[f32]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embeddings
                (id, chunk_id, image_id, extraction_id, model, model_version, task, device,
                 source_text, content_hash, dimension, vector, provenance_id, created_at)
            VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
            "#,
        )
        .bind(&embedding.id)
        .bind(&embedding.chunk_id)
        .bind(&embedding.image_id)
        .bind(&embedding.extraction_id)
        .bind(&embedding.model)
        .bind(&embedding.model_version)
        .bind(task_str(embedding.task))
        .bind(&embedding.device)
        .bind(&embedding.source_text)
        .bind(&embedding.content_hash)
        .bind(embedding.dimension)
        .bind(crate::vector_index::serialize_vector(vector))
        .bind(&embedding.provenance_id)
        .bind(embedding.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        self.refresh_metadata().await?;
        Ok(())
    }

    pub async fn get_embedding(&self, id: &str) -> Result<Embedding> {
        let row = sqlx::query("SELECT * FROM embeddings WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "embeddings",
                id: id.to_string(),
            })?;
        row_to_embedding(&row)
    }

    pub async fn get_embedding_vector(&self, id: &str) -> Result<Vec<f32>> {
        let row = sqlx::query("SELECT vector FROM embeddings WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "embeddings",
                id: id.to_string(),
            })?;
        let blob: Vec<u8> = row.get("vector");
        Ok(crate::vector_index::deserialize_vector(&blob))
    }

    /// All `(id, vector)` pairs, for rebuilding the in-memory ANN candidate set.
    pub async fn all_embedding_vectors(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let rows = sqlx::query("SELECT id, vector FROM embeddings").fetch_all(self.pool()).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let id: String = row.get("id");
                let blob: Vec<u8> = row.get("vector");
                (id, crate::vector_index::deserialize_vector(&blob))
            })
            .collect())
    }

    pub async fn delete_embedding(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM embeddings WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        self.refresh_metadata().await?;
        Ok(())
    }
}

fn task_str(task: EmbeddingTask) -> &'static str {
    match task {
        EmbeddingTask::Document => "document",
        EmbeddingTask::Query => "query",
    }
}

fn parse_task(s: &str) -> Result<EmbeddingTask> {
    Ok(match s {
        "document" => EmbeddingTask::Document,
        "query" => EmbeddingTask::Query,
        other => {
            return Err(StoreError::MalformedValue {
                field: "embeddings.task".into(),
                value: other.to_string(),
            }
            .into())
        }
    })
}

fn row_to_embedding(row: &sqlx::sqlite::SqliteRow) -> Result<Embedding> {
    let task: String = row.get("task");
    Ok(Embedding {
        id: row.get("id"),
        chunk_id: row.get("chunk_id"),
        image_id: row.get("image_id"),
        extraction_id: row.get("extraction_id"),
        model: row.get("model"),
        model_version: row.get("model_version"),
        task: parse_task(&task)?,
        device: row.get("device"),
        source_text: row.get("source_text"),
        content_hash: row.get("content_hash"),
        dimension: row.get("dimension"),
        provenance_id: row.get("provenance_id"),
        created_at: parse_dt(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::seeded_store;
    use crate::vector_index::DIMENSION;

    fn embedding(id: &str, chunk_id: &str) -> Embedding {
        Embedding {
            id: id.to_string(),
            chunk_id: Some(chunk_id.to_string()),
            image_id: None,
            extraction_id: None,
            model: "test-embed".into(),
            model_version: "1".into(),
            task: EmbeddingTask::Document,
            device: "cpu".into(),
            source_text: "alpha".into(),
            content_hash: crate::hash::hash_str("alpha"),
            dimension: DIMENSION as i64,
            provenance_id: "prov-ocr-1".into(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_get_vector_round_trips() {
        use crate::model::{Chunk, EmbeddingStatus, PageLocation};

        let (store, document_id, ocr_id) = seeded_store("alpha").await;
        store
            .insert_chunks(&[Chunk {
                id: "c1".into(),
                document_id,
                ocr_result_id: ocr_id,
                chunk_index: 0,
                character_start: 0,
                character_end: 5,
                text: "alpha".into(),
                text_hash: crate::hash::hash_str("alpha"),
                page_location: PageLocation::Single(1),
                overlap_with_previous: 0,
                overlap_with_next: 0,
                is_atomic: false,
                embedding_status: EmbeddingStatus::Pending,
                provenance_id: "prov-ocr-1".into(),
                created_at: chrono::Utc::now(),
            }])
            .await
            .unwrap();

        let vector = vec![0.5f32; DIMENSION];
        store.insert_embedding(&embedding("e1", "c1"), &vector).await.unwrap();
        let fetched = store.get_embedding_vector("e1").await.unwrap();
        assert_eq!(fetched.len(), DIMENSION);
        assert!((fetched[0] - 0.5).abs() < f32::EPSILON);
    }
}
