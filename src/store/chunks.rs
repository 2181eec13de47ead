//! CRUD for `chunks`.

use super::documents::parse_dt;
use super::{batched, Store};
use crate::error::{Result, StoreError};
use crate::model::{Chunk, EmbeddingStatus, PageLocation};
use sqlx::{QueryBuilder, Row, Sqlite};

impl Store {
    pub async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (id, document_id, ocr_result_id, chunk_index, character_start, character_end,
                     text, text_hash, page_location, overlap_with_previous, overlap_with_next,
                     is_atomic, embedding_status, provenance_id, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.ocr_result_id)
            .bind(chunk.chunk_index)
            .bind(chunk.character_start)
            .bind(chunk.character_end)
            .bind(&chunk.text)
            .bind(&chunk.text_hash)
            .bind(serde_json::to_string(&chunk.page_location)?)
            .bind(chunk.overlap_with_previous)
            .bind(chunk.overlap_with_next)
            .bind(chunk.is_atomic)
            .bind(embedding_status_str(chunk.embedding_status))
            .bind(&chunk.provenance_id)
            .bind(chunk.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, text) VALUES (?1, ?2)")
                .bind(&chunk.id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        self.refresh_metadata().await?;
        Ok(())
    }

    pub async fn get_chunk(&self, id: &str) -> Result<Chunk> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "chunks",
                id: id.to_string(),
            })?;
        row_to_chunk(&row)
    }

    pub async fn list_chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ?1 ORDER BY chunk_index ASC")
            .bind(document_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    /// Fan out over `ids` in batches of at most [`super::BATCH_SIZE`] (§4.2).
    pub async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let mut out = Vec::with_capacity(ids.len());
        for batch in batched(ids) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM chunks WHERE id IN (");
            let mut separated = qb.separated(", ");
            for id in batch {
                separated.push_bind(id);
            }
            qb.push(")");
            let rows = qb.build().fetch_all(self.pool()).await?;
            for row in &rows {
                out.push(row_to_chunk(row)?);
            }
        }
        Ok(out)
    }

    pub async fn set_chunk_embedding_status(&self, id: &str, status: EmbeddingStatus) -> Result<()> {
        sqlx::query("UPDATE chunks SET embedding_status = ?1 WHERE id = ?2")
            .bind(embedding_status_str(status))
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Every `chunk_id:text_hash` pair ordered by id, for the FTS content-integrity hash.
    pub async fn chunk_hash_pairs(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT id, text_hash FROM chunks ORDER BY id ASC")
            .fetch_all(self.pool())
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("id"), row.get("text_hash")))
            .collect())
    }
}

fn embedding_status_str(status: EmbeddingStatus) -> &'static str {
    match status {
        EmbeddingStatus::Pending => "pending",
        EmbeddingStatus::Complete => "complete",
        EmbeddingStatus::Failed => "failed",
    }
}

fn parse_embedding_status(s: &str) -> Result<EmbeddingStatus> {
    Ok(match s {
        "pending" => EmbeddingStatus::Pending,
        "complete" => EmbeddingStatus::Complete,
        "failed" => EmbeddingStatus::Failed,
        other => {
            return Err(StoreError::MalformedValue {
                field: "chunks.embedding_status".into(),
                value: other.to_string(),
            }
            .into())
        }
    })
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk> {
    let page_location: String = row.get("page_location");
    let page_location: PageLocation = serde_json::from_str(&page_location)?;
    let embedding_status: String = row.get("embedding_status");
    Ok(Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        ocr_result_id: row.get("ocr_result_id"),
        chunk_index: row.get("chunk_index"),
        character_start: row.get("character_start"),
        character_end: row.get("character_end"),
        text: row.get("text"),
        text_hash: row.get("text_hash"),
        page_location,
        overlap_with_previous: row.get("overlap_with_previous"),
        overlap_with_next: row.get("overlap_with_next"),
        is_atomic: row.get("is_atomic"),
        embedding_status: parse_embedding_status(&embedding_status)?,
        provenance_id: row.get("provenance_id"),
        created_at: parse_dt(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::seeded_store;

    fn chunk(id: &str, document_id: &str, ocr_result_id: &str, index: i64, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: document_id.to_string(),
            ocr_result_id: ocr_result_id.to_string(),
            chunk_index: index,
            character_start: 0,
            character_end: text.len() as i64,
            text: text.to_string(),
            text_hash: crate::hash::hash_str(text),
            page_location: PageLocation::Single(1),
            overlap_with_previous: 0,
            overlap_with_next: 0,
            is_atomic: false,
            embedding_status: EmbeddingStatus::Pending,
            provenance_id: "prov-ocr-1".into(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_list_preserve_order() {
        let (store, document_id, ocr_id) = seeded_store("alpha beta").await;
        let chunks = vec![
            chunk("c1", &document_id, &ocr_id, 0, "alpha"),
            chunk("c2", &document_id, &ocr_id, 1, "beta"),
        ];
        store.insert_chunks(&chunks).await.unwrap();
        let listed = store.list_chunks_for_document(&document_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "c1");
        assert_eq!(listed[1].id, "c2");
    }

    #[tokio::test]
    async fn hash_pairs_are_ordered_by_id() {
        let (store, document_id, ocr_id) = seeded_store("alpha beta").await;
        store
            .insert_chunks(&[
                chunk("c2", &document_id, &ocr_id, 1, "beta"),
                chunk("c1", &document_id, &ocr_id, 0, "alpha"),
            ])
            .await
            .unwrap();
        let pairs = store.chunk_hash_pairs().await.unwrap();
        assert_eq!(pairs[0].0, "c1");
        assert_eq!(pairs[1].0, "c2");
    }

    #[tokio::test]
    async fn get_chunks_batches_large_id_lists() {
        let (store, document_id, ocr_id) = seeded_store("alpha").await;
        store
            .insert_chunks(&[chunk("c1", &document_id, &ocr_id, 0, "alpha")])
            .await
            .unwrap();
        let found = store.get_chunks(&["c1".to_string()]).await.unwrap();
        assert_eq!(found.len(), 1);
    }
}
