//! FTS index (component D): a thin wrapper over the `chunks_fts` virtual table
//! created in [`crate::store`]'s schema. Porter-stemmed, BM25-scored, content
//! hash over every indexed chunk for drift detection.

use crate::error::{Result, SearchError};
use crate::hash::hash_concat;
use crate::model::Chunk;
use crate::store::Store;
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct FtsHit {
    pub chunk_id: String,
    /// BM25 score, always surfaced as its absolute value so higher = better (§4.2).
    pub score: f64,
    pub snippet: String,
}

pub struct FtsIndex<'a> {
    store: &'a Store,
}

impl<'a> FtsIndex<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Tokenizes `query` (strip quotes, whitespace-split, drop empties); in phrase
    /// mode matches the tokens as a quoted phrase, else AND-joins them.
    pub fn tokenize(query: &str) -> Vec<String> {
        query
            .split_whitespace()
            .map(|t| t.trim_matches('"').to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }

    fn build_match(tokens: &[String], phrase: bool) -> String {
        if phrase {
            format!("\"{}\"", tokens.join(" "))
        } else {
            tokens.join(" AND ")
        }
    }

    pub async fn search(&self, query: &str, limit: i64, phrase: bool) -> Result<Vec<FtsHit>> {
        let tokens = Self::tokenize(query);
        if tokens.is_empty() {
            return Err(SearchError::EmptyQuery.into());
        }
        let match_expr = Self::build_match(&tokens, phrase);

        let rows = sqlx::query(
            r#"
            SELECT chunk_id, bm25(chunks_fts) AS score,
                   snippet(chunks_fts, 1, '<b>', '</b>', '…', 12) AS snippet
            FROM chunks_fts
            WHERE chunks_fts MATCH ?1
            ORDER BY score ASC
            LIMIT ?2
            "#,
        )
        .bind(&match_expr)
        .bind(limit)
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| SearchError::FtsIndex(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let raw_score: f64 = row.get("score");
                FtsHit {
                    chunk_id: row.get("chunk_id"),
                    score: raw_score.abs(),
                    snippet: row.get("snippet"),
                }
            })
            .collect())
    }

    /// Drops and repopulates `chunks_fts` from every chunk currently in `chunks`.
    pub async fn rebuild(&self) -> Result<()> {
        let chunks: Vec<Chunk> = {
            let rows = sqlx::query("SELECT id FROM chunks")
                .fetch_all(self.store.pool())
                .await?;
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let id: String = row.get("id");
                out.push(self.store.get_chunk(&id).await?);
            }
            out
        };

        sqlx::query("DELETE FROM chunks_fts").execute(self.store.pool()).await?;
        for chunk in &chunks {
            sqlx::query("INSERT INTO chunks_fts (chunk_id, text) VALUES (?1, ?2)")
                .bind(&chunk.id)
                .bind(&chunk.text)
                .execute(self.store.pool())
                .await?;
        }

        self.persist_integrity_hash().await
    }

    /// `sha256(concat(chunk_id:chunk_text_hash for chunk_id in chunks ordered by id))`,
    /// persisted alongside the rebuild timestamp (§4.2).
    pub async fn content_integrity_hash(&self) -> Result<String> {
        let pairs = self.store.chunk_hash_pairs().await?;
        Ok(hash_concat(pairs.iter().map(|(id, hash)| (id.as_str(), hash.as_str()))))
    }

    async fn persist_integrity_hash(&self) -> Result<()> {
        let hash = self.content_integrity_hash().await?;
        sqlx::query(
            r#"
            INSERT INTO fts_index_meta (id, content_hash, rebuilt_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET content_hash = excluded.content_hash,
                                           rebuilt_at = excluded.rebuilt_at
            "#,
        )
        .bind(hash)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(self.store.pool())
        .await?;
        Ok(())
    }
}
