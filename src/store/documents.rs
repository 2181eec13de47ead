//! CRUD for `documents`.

use super::provenance::remap_fk;
use super::Store;
use crate::error::{Result, StoreError};
use crate::model::{Document, DocumentStatus};
use chrono::Utc;
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;

impl Store {
    pub async fn create_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents
                (id, path, filename, file_hash, size_bytes, doc_type, status, page_count,
                 provenance_id, error_message, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.path)
        .bind(&doc.filename)
        .bind(&doc.file_hash)
        .bind(doc.size_bytes)
        .bind(doc.doc_type.as_str())
        .bind(doc.status.to_string())
        .bind(doc.page_count)
        .bind(&doc.provenance_id)
        .bind(&doc.error_message)
        .bind(doc.created_at.to_rfc3339())
        .bind(doc.updated_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(remap_fk("documents"))?;
        self.refresh_metadata().await?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Document> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::DocumentNotFound(id.to_string()))?;
        row_to_document(&row)
    }

    /// Look up a document by the hash of its source bytes (idempotent re-ingest, invariant 8).
    pub async fn find_document_by_file_hash(&self, file_hash: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE file_hash = ?1")
            .bind(file_hash)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    pub async fn list_documents_by_status(
        &self,
        status: DocumentStatus,
        limit: i64,
    ) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents WHERE status = ?1 ORDER BY created_at ASC LIMIT ?2")
            .bind(status.to_string())
            .bind(limit.min(super::DEFAULT_PENDING_LIMIT))
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_document).collect()
    }

    pub async fn set_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE documents SET status = ?1, error_message = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(status.to_string())
            .bind(error_message)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_document_page_count(&self, id: &str, page_count: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET page_count = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(page_count)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Cascading delete: OCR results, chunks, images, embeddings, entities, mentions,
    /// comparisons, and this document's node-entity links (invariant 5). The
    /// `ON DELETE CASCADE` foreign keys do most of the work; node-entity links and
    /// node aggregate decrements are handled explicitly because they must NOT
    /// remove nodes or edges still evidenced by other documents. Before
    /// anything is deleted, the document's knowledge-graph subgraph (every
    /// node its entities resolved to, and the edges incident on those nodes)
    /// is snapshotted to an on-disk JSON archive.
    pub async fn delete_document(&self, id: &str) -> Result<()> {
        self.archive_kg_subgraph(id).await?;

        let mut tx = self.pool().begin().await?;
        decrement_node_counts_for_document(&mut tx, id).await?;
        sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.refresh_metadata().await?;
        Ok(())
    }

    /// Writes `<archive_dir>/<document_id>.json` with every knowledge-graph
    /// node the document's entities resolved to, plus every edge incident on
    /// those nodes. A no-op when the store has no archive directory (e.g. an
    /// in-memory store) or the document has no resolved entities.
    async fn archive_kg_subgraph(&self, document_id: &str) -> Result<()> {
        let Some(archive_dir) = self.archive_dir.clone() else {
            return Ok(());
        };

        let entities = self.list_entities_for_document(document_id).await?;
        if entities.is_empty() {
            return Ok(());
        }
        let entity_ids: Vec<String> = entities.iter().map(|e| e.id.clone()).collect();
        let links = self.nodes_for_entities(&entity_ids).await?;

        let mut node_ids: Vec<String> = links.into_iter().map(|(_, node_id)| node_id).collect();
        node_ids.sort();
        node_ids.dedup();

        let mut nodes = Vec::with_capacity(node_ids.len());
        let mut edge_ids_seen = std::collections::HashSet::new();
        let mut edges = Vec::new();
        for node_id in &node_ids {
            nodes.push(self.get_node(node_id).await?);
            for edge in self.edges_for_node(node_id).await? {
                if edge_ids_seen.insert(edge.id.clone()) {
                    edges.push(edge);
                }
            }
        }

        let archive = serde_json::json!({
            "document_id": document_id,
            "archived_at": Utc::now().to_rfc3339(),
            "nodes": nodes,
            "edges": edges,
        });

        std::fs::create_dir_all(&archive_dir)?;
        let path = archive_dir.join(format!("{document_id}.json"));
        std::fs::write(path, serde_json::to_vec_pretty(&archive)?)?;
        Ok(())
    }

    /// Wipes derived data but keeps the document row and its provenance history,
    /// resetting status to `pending` (reprocess, scenario S6).
    pub async fn reset_document_for_reprocess(&self, id: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        decrement_node_counts_for_document(&mut tx, id).await?;
        sqlx::query("DELETE FROM comparisons WHERE document_a_id = ?1 OR document_b_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            DELETE FROM node_entity_links
            WHERE entity_id IN (SELECT id FROM entities WHERE document_id = ?1)
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM entities WHERE document_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM ocr_results WHERE document_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE documents SET status = 'pending', error_message = NULL, page_count = NULL, updated_at = ?2 WHERE id = ?1",
        )
        .bind(id)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        self.refresh_metadata().await?;
        Ok(())
    }
}

async fn decrement_node_counts_for_document(
    tx: &mut Transaction<'_, Sqlite>,
    document_id: &str,
) -> Result<()> {
    let node_ids: Vec<String> = sqlx::query(
        r#"
        SELECT DISTINCT nel.node_id AS node_id
        FROM node_entity_links nel
        JOIN entities e ON e.id = nel.entity_id
        WHERE e.document_id = ?1
        "#,
    )
    .bind(document_id)
    .fetch_all(&mut **tx)
    .await?
    .into_iter()
    .map(|row| row.get("node_id"))
    .collect();

    for node_id in node_ids {
        sqlx::query(
            "UPDATE knowledge_nodes SET document_count = MAX(0, document_count - 1) WHERE id = ?1",
        )
        .bind(&node_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    Ok(Document {
        id: row.get("id"),
        path: row.get("path"),
        filename: row.get("filename"),
        file_hash: row.get("file_hash"),
        size_bytes: row.get("size_bytes"),
        doc_type: row.get("doc_type"),
        status: DocumentStatus::from_str(&status)?,
        page_count: row.get("page_count"),
        provenance_id: row.get("provenance_id"),
        error_message: row.get("error_message"),
        created_at: parse_dt(row, "created_at")?,
        updated_at: parse_dt(row, "updated_at")?,
    })
}

pub(crate) fn parse_dt(
    row: &sqlx::sqlite::SqliteRow,
    field: &'static str,
) -> Result<chrono::DateTime<Utc>> {
    let raw: String = row.get(field);
    Ok(chrono::DateTime::parse_from_rfc3339(&raw)
        .map_err(|e| StoreError::MalformedValue {
            field: field.to_string(),
            value: e.to_string(),
        })?
        .with_timezone(&Utc))
}
