//! CRUD for `provenance_records` (the DAG spine, §4.1).

use super::Store;
use crate::error::{Result, StoreError};
use crate::model::{ProvenanceRecord, ProvenanceType};
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

impl Store {
    pub async fn insert_provenance(&self, record: &ProvenanceRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO provenance_records
                (id, record_type, source_type, root_document_id, content_hash, input_hash,
                 file_hash, processor, processor_version, parameters, duration_ms, quality_score,
                 parent_ids, chain_depth, chain_path, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&record.id)
        .bind(provenance_type_str(record.record_type))
        .bind(&record.source_type)
        .bind(&record.root_document_id)
        .bind(&record.content_hash)
        .bind(&record.input_hash)
        .bind(&record.file_hash)
        .bind(&record.processor)
        .bind(&record.processor_version)
        .bind(serde_json::to_string(&record.parameters)?)
        .bind(record.duration_ms)
        .bind(record.quality_score)
        .bind(serde_json::to_string(&record.parent_ids)?)
        .bind(record.chain_depth)
        .bind(serde_json::to_string(
            &record
                .chain_path
                .iter()
                .map(|t| provenance_type_str(*t))
                .collect::<Vec<_>>(),
        )?)
        .bind(record.created_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(remap_fk("provenance_records"))?;
        Ok(())
    }

    pub async fn get_provenance(&self, id: &str) -> Result<ProvenanceRecord> {
        let row = sqlx::query("SELECT * FROM provenance_records WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "provenance_records",
                id: id.to_string(),
            })?;
        row_to_provenance(&row)
    }

    /// Walk parents back to the root DOCUMENT record (the "chain").
    pub async fn get_chain(&self, id: &str) -> Result<Vec<ProvenanceRecord>> {
        let mut chain = Vec::new();
        let mut current = self.get_provenance(id).await?;
        loop {
            let parent_id = current.parent_ids.first().cloned();
            chain.push(current);
            match parent_id {
                Some(pid) => current = self.get_provenance(&pid).await?,
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// Every record whose `root_document_id` matches `root_id`.
    pub async fn get_subtree_by_root(&self, root_id: &str) -> Result<Vec<ProvenanceRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM provenance_records WHERE root_document_id = ?1 ORDER BY chain_depth ASC",
        )
        .bind(root_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_provenance).collect()
    }

    /// Direct children: records whose `parent_ids` contains `id`.
    pub async fn get_children(&self, id: &str) -> Result<Vec<ProvenanceRecord>> {
        let root = self.get_provenance(id).await?;
        let subtree = self.get_subtree_by_root(&root.root_document_id).await?;
        Ok(subtree
            .into_iter()
            .filter(|r| r.parent_ids.iter().any(|p| p == id))
            .collect())
    }
}

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

pub fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}

pub fn provenance_type_str(t: ProvenanceType) -> &'static str {
    match t {
        ProvenanceType::Document => "DOCUMENT",
        ProvenanceType::OcrResult => "OCR_RESULT",
        ProvenanceType::Chunk => "CHUNK",
        ProvenanceType::Image => "IMAGE",
        ProvenanceType::Embedding => "EMBEDDING",
        ProvenanceType::VlmDescription => "VLM_DESCRIPTION",
        ProvenanceType::EntityExtraction => "ENTITY_EXTRACTION",
        ProvenanceType::KnowledgeGraph => "KNOWLEDGE_GRAPH",
        ProvenanceType::Comparison => "COMPARISON",
        ProvenanceType::FormFill => "FORM_FILL",
    }
}

fn parse_provenance_type(s: &str) -> Result<ProvenanceType> {
    Ok(match s {
        "DOCUMENT" => ProvenanceType::Document,
        "OCR_RESULT" => ProvenanceType::OcrResult,
        "CHUNK" => ProvenanceType::Chunk,
        "IMAGE" => ProvenanceType::Image,
        "EMBEDDING" => ProvenanceType::Embedding,
        "VLM_DESCRIPTION" => ProvenanceType::VlmDescription,
        "ENTITY_EXTRACTION" => ProvenanceType::EntityExtraction,
        "KNOWLEDGE_GRAPH" => ProvenanceType::KnowledgeGraph,
        "COMPARISON" => ProvenanceType::Comparison,
        "FORM_FILL" => ProvenanceType::FormFill,
        other => {
            return Err(StoreError::MalformedValue {
                field: "provenance_records.record_type".into(),
                value: other.to_string(),
            }
            .into())
        }
    })
}

fn row_to_provenance(row: &sqlx::sqlite::SqliteRow) -> Result<ProvenanceRecord> {
    let record_type: String = row.get("record_type");
    let parent_ids: String = row.get("parent_ids");
    let chain_path: String = row.get("chain_path");
    let parameters: String = row.get("parameters");
    let chain_path_strs: Vec<String> = serde_json::from_str(&chain_path)?;
    let created_at: String = row.get("created_at");
    Ok(ProvenanceRecord {
        id: row.get("id"),
        record_type: parse_provenance_type(&record_type)?,
        source_type: row.get("source_type"),
        root_document_id: row.get("root_document_id"),
        content_hash: row.get("content_hash"),
        input_hash: row.get("input_hash"),
        file_hash: row.get("file_hash"),
        processor: row.get("processor"),
        processor_version: row.get("processor_version"),
        parameters: serde_json::from_str(&parameters)?,
        duration_ms: row.get("duration_ms"),
        quality_score: row.get("quality_score"),
        parent_ids: serde_json::from_str(&parent_ids)?,
        chain_depth: row.get("chain_depth"),
        chain_path: chain_path_strs
            .iter()
            .map(|s| parse_provenance_type(s))
            .collect::<Result<Vec<_>>>()?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StoreError::MalformedValue {
                field: "provenance_records.created_at".into(),
                value: e.to_string(),
            })?
            .with_timezone(&Utc),
    })
}

/// Maps a sqlx foreign-key-constraint failure to a named `ForeignKeyViolation`.
pub fn remap_fk(relation: &'static str) -> impl FnOnce(sqlx::Error) -> crate::error::DocProvError {
    move |e: sqlx::Error| {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.code().as_deref() == Some("787") || db_err.message().contains("FOREIGN KEY") {
                return StoreError::ForeignKeyViolation {
                    relation: relation.to_string(),
                }
                .into();
            }
        }
        StoreError::Sqlx(e).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use serde_json::json;

    fn root_record(id: &str) -> ProvenanceRecord {
        ProvenanceRecord {
            id: id.to_string(),
            record_type: ProvenanceType::Document,
            source_type: "file".into(),
            root_document_id: id.to_string(),
            content_hash: crate::hash::hash_str("alpha"),
            input_hash: None,
            file_hash: Some(crate::hash::hash_str("alpha")),
            processor: "ingest".into(),
            processor_version: "1".into(),
            parameters: json!({}),
            duration_ms: None,
            quality_score: None,
            parent_ids: vec![],
            chain_depth: 0,
            chain_path: vec![ProvenanceType::Document],
            created_at: now(),
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trips() {
        let store = Store::open_in_memory().await.unwrap();
        let record = root_record("doc-1");
        store.insert_provenance(&record).await.unwrap();
        let fetched = store.get_provenance("doc-1").await.unwrap();
        assert_eq!(fetched.content_hash, record.content_hash);
        assert_eq!(fetched.chain_depth, 0);
    }

    #[tokio::test]
    async fn chain_walks_back_to_root() {
        let store = Store::open_in_memory().await.unwrap();
        let root = root_record("doc-1");
        store.insert_provenance(&root).await.unwrap();

        let mut child = root.clone();
        child.id = "ocr-1".into();
        child.record_type = ProvenanceType::OcrResult;
        child.input_hash = Some(root.content_hash.clone());
        child.parent_ids = vec!["doc-1".into()];
        child.chain_depth = 1;
        child.chain_path = vec![ProvenanceType::Document, ProvenanceType::OcrResult];
        store.insert_provenance(&child).await.unwrap();

        let chain = store.get_chain("ocr-1").await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].id, "doc-1");
        assert_eq!(chain[1].id, "ocr-1");
    }
}
