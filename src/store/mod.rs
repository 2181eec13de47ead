//! Relational store (component B): schema, migrations, and aggregate bookkeeping.
//!
//! Per-entity CRUD lives in sibling modules (`documents`, `ocr_results`, …) as
//! `impl Store` blocks, mirroring how the teacher split `SqliteMemoryStore`'s
//! concerns by keeping one connection pool behind a single owning type.

pub mod chunks;
pub mod comparisons;
pub mod documents;
pub mod embeddings;
pub mod entities;
pub mod graph;
pub mod images;
pub mod ocr_results;
pub mod provenance;
pub mod tags;

#[cfg(test)]
pub mod test_support;

use crate::error::{Result, StoreError};
use crate::model::DatabaseMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{ConnectOptions, Row, SqlitePool};
use std::str::FromStr;

/// Parameter fan-out batch size for `IN (...)` queries (§4.2).
pub const BATCH_SIZE: usize = 500;

/// Default cap on unbounded pending-set counts (§4.2).
pub const DEFAULT_PENDING_LIMIT: i64 = 1000;

const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Owns the connection pool for one database file (or `sqlite::memory:`).
pub struct Store {
    pool: SqlitePool,
    /// Directory a document's knowledge-graph subgraph is archived to before
    /// a cascading delete; `None` for in-memory/throwaway stores, which have
    /// nowhere durable to write one.
    archive_dir: Option<std::path::PathBuf>,
}

impl Store {
    /// Open (creating if absent) the database file at `path`, running migrations.
    pub async fn open(path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Sqlx(sqlx::Error::Configuration(e.into())))?
            .foreign_keys(true)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(StoreError::from)?;
        let archive_dir = path.parent().map(|parent| parent.join("kg-archives"));
        let store = Self { pool, archive_dir };
        store.migrate().await?;
        Ok(store)
    }

    /// Open a throwaway in-memory database, for tests and short-lived runs.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Sqlx(sqlx::Error::Configuration(e.into())))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StoreError::from)?;
        let store = Self { pool, archive_dir: None };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply forward migrations in order, one transaction per step, verifying
    /// `PRAGMA foreign_key_check` is empty after each. Idempotent at the
    /// already-current version.
    async fn migrate(&self) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys = ON").execute(&self.pool).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (id INTEGER PRIMARY KEY CHECK (id = 1), version INTEGER NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        let current: Option<i64> =
            sqlx::query("SELECT version FROM schema_version WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?
                .map(|row| row.get("version"));

        let start = current.unwrap_or(0);
        for version in (start + 1)..=CURRENT_SCHEMA_VERSION {
            self.apply_migration(version).await?;
        }
        if current.is_none() {
            sqlx::query("INSERT INTO schema_version (id, version) VALUES (1, ?1)")
                .bind(CURRENT_SCHEMA_VERSION)
                .execute(&self.pool)
                .await?;
        } else if start < CURRENT_SCHEMA_VERSION {
            sqlx::query("UPDATE schema_version SET version = ?1 WHERE id = 1")
                .bind(CURRENT_SCHEMA_VERSION)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn apply_migration(&self, version: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        match version {
            1 => {
                sqlx::query(SCHEMA_V1).execute(&mut *tx).await?;
            }
            other => {
                return Err(StoreError::MigrationFailed {
                    version: other,
                    reason: "unknown schema version".into(),
                }
                .into())
            }
        }
        tx.commit().await?;

        let violations = sqlx::query("PRAGMA foreign_key_check")
            .fetch_all(&self.pool)
            .await?;
        if !violations.is_empty() {
            return Err(StoreError::MigrationFailed {
                version,
                reason: format!("{} foreign key violations after migration", violations.len()),
            }
            .into());
        }
        Ok(())
    }

    /// Cached totals from the `database_metadata` singleton row.
    pub async fn metadata(&self) -> Result<DatabaseMetadata> {
        let row = sqlx::query(
            "SELECT documents, ocr_results, chunks, embeddings FROM database_metadata WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row_to_metadata(&row))
    }

    /// Recompute `database_metadata` from the base tables (used after bulk mutation).
    pub async fn refresh_metadata(&self) -> Result<DatabaseMetadata> {
        let documents: i64 = sqlx::query("SELECT COUNT(*) AS c FROM documents")
            .fetch_one(&self.pool)
            .await?
            .get("c");
        let ocr_results: i64 = sqlx::query("SELECT COUNT(*) AS c FROM ocr_results")
            .fetch_one(&self.pool)
            .await?
            .get("c");
        let chunks: i64 = sqlx::query("SELECT COUNT(*) AS c FROM chunks")
            .fetch_one(&self.pool)
            .await?
            .get("c");
        let embeddings: i64 = sqlx::query("SELECT COUNT(*) AS c FROM embeddings")
            .fetch_one(&self.pool)
            .await?
            .get("c");

        sqlx::query(
            "INSERT INTO database_metadata (id, documents, ocr_results, chunks, embeddings)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET documents = ?1, ocr_results = ?2, chunks = ?3, embeddings = ?4",
        )
        .bind(documents)
        .bind(ocr_results)
        .bind(chunks)
        .bind(embeddings)
        .execute(&self.pool)
        .await?;

        Ok(DatabaseMetadata {
            documents,
            ocr_results,
            chunks,
            embeddings,
        })
    }
}

fn row_to_metadata(row: &SqliteRow) -> DatabaseMetadata {
    DatabaseMetadata {
        documents: row.get("documents"),
        ocr_results: row.get("ocr_results"),
        chunks: row.get("chunks"),
        embeddings: row.get("embeddings"),
    }
}

/// Split `ids` into batches of at most [`BATCH_SIZE`] for `IN (...)` fan-out (§4.2).
pub fn batched<'a, T>(ids: &'a [T]) -> impl Iterator<Item = &'a [T]> {
    ids.chunks(BATCH_SIZE)
}

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS database_metadata (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    documents INTEGER NOT NULL DEFAULT 0,
    ocr_results INTEGER NOT NULL DEFAULT 0,
    chunks INTEGER NOT NULL DEFAULT 0,
    embeddings INTEGER NOT NULL DEFAULT 0
);
INSERT OR IGNORE INTO database_metadata (id) VALUES (1);

CREATE TABLE IF NOT EXISTS provenance_records (
    id TEXT PRIMARY KEY,
    record_type TEXT NOT NULL,
    source_type TEXT NOT NULL,
    root_document_id TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    input_hash TEXT,
    file_hash TEXT,
    processor TEXT NOT NULL,
    processor_version TEXT NOT NULL,
    parameters TEXT NOT NULL DEFAULT '{}',
    duration_ms INTEGER,
    quality_score REAL,
    parent_ids TEXT NOT NULL DEFAULT '[]',
    chain_depth INTEGER NOT NULL,
    chain_path TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_provenance_root ON provenance_records(root_document_id);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    filename TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    doc_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    page_count INTEGER,
    provenance_id TEXT REFERENCES provenance_records(id),
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
CREATE INDEX IF NOT EXISTS idx_documents_file_hash ON documents(file_hash);

CREATE TABLE IF NOT EXISTS ocr_results (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    extracted_text TEXT NOT NULL,
    text_length INTEGER NOT NULL,
    mode TEXT NOT NULL,
    page_count INTEGER NOT NULL,
    page_offsets TEXT NOT NULL DEFAULT '[]',
    quality_score REAL NOT NULL,
    cost_cents REAL NOT NULL,
    content_hash TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ocr_document ON ocr_results(document_id);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    ocr_result_id TEXT NOT NULL REFERENCES ocr_results(id) ON DELETE CASCADE,
    chunk_index INTEGER NOT NULL,
    character_start INTEGER NOT NULL,
    character_end INTEGER NOT NULL,
    text TEXT NOT NULL,
    text_hash TEXT NOT NULL,
    page_location TEXT NOT NULL,
    overlap_with_previous INTEGER NOT NULL DEFAULT 0,
    overlap_with_next INTEGER NOT NULL DEFAULT 0,
    is_atomic INTEGER NOT NULL DEFAULT 0,
    embedding_status TEXT NOT NULL DEFAULT 'pending',
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, chunk_index);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    chunk_id UNINDEXED,
    text,
    tokenize = 'porter'
);

CREATE TABLE IF NOT EXISTS fts_index_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    content_hash TEXT NOT NULL,
    rebuilt_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS images (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    ocr_result_id TEXT NOT NULL REFERENCES ocr_results(id) ON DELETE CASCADE,
    page_number INTEGER NOT NULL,
    bbox_x REAL NOT NULL DEFAULT 0,
    bbox_y REAL NOT NULL DEFAULT 0,
    bbox_width REAL NOT NULL DEFAULT 0,
    bbox_height REAL NOT NULL DEFAULT 0,
    format TEXT NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    path TEXT NOT NULL,
    block_type TEXT,
    is_header_footer INTEGER NOT NULL DEFAULT 0,
    content_hash TEXT NOT NULL,
    vlm_status TEXT NOT NULL DEFAULT 'pending',
    vlm_description TEXT,
    vlm_structured_data TEXT,
    vlm_confidence REAL,
    vlm_tokens_used INTEGER,
    error_message TEXT,
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_images_document ON images(document_id);
CREATE INDEX IF NOT EXISTS idx_images_content_hash ON images(content_hash);

CREATE TABLE IF NOT EXISTS embeddings (
    id TEXT PRIMARY KEY,
    chunk_id TEXT REFERENCES chunks(id) ON DELETE CASCADE,
    image_id TEXT REFERENCES images(id) ON DELETE CASCADE,
    extraction_id TEXT,
    model TEXT NOT NULL,
    model_version TEXT NOT NULL,
    task TEXT NOT NULL,
    device TEXT NOT NULL,
    source_text TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    dimension INTEGER NOT NULL,
    vector BLOB NOT NULL,
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_embeddings_chunk ON embeddings(chunk_id);
CREATE INDEX IF NOT EXISTS idx_embeddings_image ON embeddings(image_id);

CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    entity_type TEXT NOT NULL,
    raw_text TEXT NOT NULL,
    normalized_text TEXT NOT NULL,
    confidence REAL NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entities_document ON entities(document_id);
CREATE INDEX IF NOT EXISTS idx_entities_normalized ON entities(entity_type, normalized_text);

CREATE TABLE IF NOT EXISTS entity_mentions (
    id TEXT PRIMARY KEY,
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    chunk_id TEXT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
    page_number INTEGER NOT NULL,
    character_start INTEGER NOT NULL,
    character_end INTEGER NOT NULL,
    context_snippet TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_mentions_entity ON entity_mentions(entity_id);
CREATE INDEX IF NOT EXISTS idx_mentions_chunk ON entity_mentions(chunk_id);

CREATE TABLE IF NOT EXISTS knowledge_nodes (
    id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    canonical_name TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    aliases TEXT NOT NULL DEFAULT '[]',
    document_count INTEGER NOT NULL DEFAULT 0,
    mention_count INTEGER NOT NULL DEFAULT 0,
    edge_count INTEGER NOT NULL DEFAULT 0,
    avg_confidence REAL NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}',
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_nodes_type_normalized ON knowledge_nodes(entity_type, normalized_name);

CREATE TABLE IF NOT EXISTS knowledge_edges (
    id TEXT PRIMARY KEY,
    source_node_id TEXT NOT NULL REFERENCES knowledge_nodes(id) ON DELETE CASCADE,
    target_node_id TEXT NOT NULL REFERENCES knowledge_nodes(id) ON DELETE CASCADE,
    relationship_type TEXT NOT NULL,
    weight REAL NOT NULL,
    normalized_weight REAL NOT NULL DEFAULT 0,
    evidence_count INTEGER NOT NULL DEFAULT 1,
    document_ids TEXT NOT NULL DEFAULT '[]',
    valid_from TEXT,
    valid_until TEXT,
    contradiction_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_edges_source ON knowledge_edges(source_node_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON knowledge_edges(target_node_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_edges_unique ON knowledge_edges(source_node_id, target_node_id, relationship_type);

CREATE TABLE IF NOT EXISTS node_entity_links (
    id TEXT PRIMARY KEY,
    node_id TEXT NOT NULL REFERENCES knowledge_nodes(id) ON DELETE CASCADE,
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    similarity_score REAL NOT NULL,
    resolution_method TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_links_node ON node_entity_links(node_id);
CREATE INDEX IF NOT EXISTS idx_links_entity ON node_entity_links(entity_id);

CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    target_id TEXT NOT NULL,
    label TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tags_target ON tags(kind, target_id);

CREATE TABLE IF NOT EXISTS comparisons (
    id TEXT PRIMARY KEY,
    document_a_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    document_b_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    similarity_ratio REAL NOT NULL,
    text_diff TEXT NOT NULL DEFAULT '{}',
    structural_diff TEXT NOT NULL DEFAULT '{}',
    entity_diff TEXT NOT NULL DEFAULT '{}',
    summary TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    provenance_id TEXT NOT NULL REFERENCES provenance_records(id),
    duration_ms INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_comparisons_a ON comparisons(document_a_id);
CREATE INDEX IF NOT EXISTS idx_comparisons_b ON comparisons(document_b_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_store_starts_at_current_version() {
        let store = Store::open_in_memory().await.unwrap();
        let version: i64 = sqlx::query("SELECT version FROM schema_version WHERE id = 1")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn reopening_same_version_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        let meta = store.metadata().await.unwrap();
        assert_eq!(meta.documents, 0);
    }

    #[tokio::test]
    async fn batched_splits_large_id_lists() {
        let ids: Vec<i64> = (0..1200).collect();
        let batches: Vec<&[i64]> = batched(&ids).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), BATCH_SIZE);
        assert_eq!(batches[2].len(), 200);
    }
}
