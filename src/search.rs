//! Search (component L): BM25 over the FTS index, semantic k-NN over the
//! vector index, Reciprocal Rank Fusion between them, optional query
//! expansion and reranking, and bounded RAG context assembly (§4.7).

use crate::embedder::{embed_checked, Embedder};
use crate::error::{BackendError, Result, SearchError};
use crate::fts_index::FtsIndex;
use crate::model::EmbeddingTask;
use crate::store::Store;
use crate::vector_index::k_nearest;
use async_trait::async_trait;
use std::collections::HashMap;

pub const DEFAULT_K_RRF: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct BmHit {
    pub chunk_id: String,
    pub document_id: String,
    pub rank: usize,
    pub score: f64,
    pub provenance_id: String,
    pub content_hash: String,
    pub snippet: String,
}

#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub chunk_id: String,
    pub document_id: String,
    pub rank: usize,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct FusedHit {
    pub chunk_id: String,
    pub document_id: String,
    pub fused_score: f64,
    pub bm25_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
}

pub struct SearchEngine<'a> {
    store: &'a Store,
}

impl<'a> SearchEngine<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Tokenizes, matches against `chunks_fts`, and resolves each hit's chunk
    /// to its document, provenance id, and content hash (§4.7 BM25 operation).
    pub async fn bm25(
        &self,
        query: &str,
        document_filter: Option<&[String]>,
        limit: i64,
        phrase: bool,
    ) -> Result<Vec<BmHit>> {
        let index = FtsIndex::new(self.store);
        let raw_hits = index.search(query, limit * 3, phrase).await?;

        let mut hits = Vec::new();
        let mut rank = 0usize;
        for hit in raw_hits {
            let chunk = self.store.get_chunk(&hit.chunk_id).await?;
            if let Some(filter) = document_filter {
                if !filter.iter().any(|d| d == &chunk.document_id) {
                    continue;
                }
            }
            rank += 1;
            hits.push(BmHit {
                chunk_id: hit.chunk_id,
                document_id: chunk.document_id,
                rank,
                score: hit.score,
                provenance_id: chunk.provenance_id,
                content_hash: chunk.text_hash,
                snippet: hit.snippet,
            });
            if hits.len() as i64 >= limit {
                break;
            }
        }
        Ok(hits)
    }

    /// Embeds `query` in query mode, k-NN searches every stored embedding
    /// vector, resolves hits back to chunks, and optionally filters by
    /// document id and a minimum similarity threshold (§4.7 semantic operation).
    pub async fn semantic(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        document_filter: Option<&[String]>,
        limit: i64,
        min_similarity: Option<f32>,
    ) -> Result<Vec<SemanticHit>> {
        let query_vectors = embed_checked(embedder, &[query.to_string()], EmbeddingTask::Query).await?;
        let query_vector = &query_vectors[0];

        let candidates = self.store.all_embedding_vectors().await?;
        let ranked = k_nearest(query_vector, &candidates, candidates.len());

        let mut hits = Vec::new();
        let mut rank = 0usize;
        for (embedding_id, score) in ranked {
            if let Some(threshold) = min_similarity {
                if score < threshold {
                    continue;
                }
            }
            let embedding = self.store.get_embedding(&embedding_id).await?;
            let Some(chunk_id) = embedding.chunk_id else { continue };
            let chunk = self.store.get_chunk(&chunk_id).await?;
            if let Some(filter) = document_filter {
                if !filter.iter().any(|d| d == &chunk.document_id) {
                    continue;
                }
            }
            rank += 1;
            hits.push(SemanticHit { chunk_id, document_id: chunk.document_id, rank, score });
            if hits.len() as i64 >= limit {
                break;
            }
        }
        Ok(hits)
    }

    /// Combines BM25 and semantic hits via Reciprocal Rank Fusion and an
    /// optional entity boost, sorted descending and truncated to `limit` (§4.7).
    pub async fn hybrid(
        &self,
        bm25_hits: &[BmHit],
        semantic_hits: &[SemanticHit],
        weights: RrfWeights,
        limit: usize,
        entity_boosted_chunks: &[String],
    ) -> Vec<FusedHit> {
        let bm25_ranks: Vec<(String, String, usize)> =
            bm25_hits.iter().map(|h| (h.chunk_id.clone(), h.document_id.clone(), h.rank)).collect();
        let semantic_ranks: Vec<(String, String, usize)> =
            semantic_hits.iter().map(|h| (h.chunk_id.clone(), h.document_id.clone(), h.rank)).collect();

        let fused = reciprocal_rank_fusion(&bm25_ranks, &semantic_ranks, weights);
        let mut hits: Vec<FusedHit> = fused
            .into_iter()
            .map(|(chunk_id, document_id, score, bm25_rank, semantic_rank)| {
                let boosted = if entity_boosted_chunks.iter().any(|c| c == &chunk_id) {
                    score + weights.entity_boost
                } else {
                    score
                };
                FusedHit { chunk_id, document_id, fused_score: boosted, bm25_rank, semantic_rank }
            })
            .collect();

        hits.sort_by(|a, b| b.fused_score.partial_cmp(&a.fused_score).unwrap());
        hits.truncate(limit);
        hits
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RrfWeights {
    pub bm25: f64,
    pub semantic: f64,
    pub k_rrf: f64,
    pub entity_boost: f64,
}

impl Default for RrfWeights {
    fn default() -> Self {
        Self { bm25: 1.0, semantic: 1.0, k_rrf: DEFAULT_K_RRF, entity_boost: 0.0 }
    }
}

/// `score(d) = w_b/(k_RRF+rank_b(d)) + w_s/(k_RRF+rank_s(d))`, merged by chunk
/// id; a chunk missing from one list contributes 0 for that term (§4.7, scenario S3).
pub fn reciprocal_rank_fusion(
    bm25_ranks: &[(String, String, usize)],
    semantic_ranks: &[(String, String, usize)],
    weights: RrfWeights,
) -> Vec<(String, String, f64, Option<usize>, Option<usize>)> {
    let mut merged: HashMap<String, (String, f64, Option<usize>, Option<usize>)> = HashMap::new();

    for (chunk_id, document_id, rank) in bm25_ranks {
        let contribution = weights.bm25 / (weights.k_rrf + *rank as f64);
        let entry = merged.entry(chunk_id.clone()).or_insert((document_id.clone(), 0.0, None, None));
        entry.1 += contribution;
        entry.2 = Some(*rank);
    }
    for (chunk_id, document_id, rank) in semantic_ranks {
        let contribution = weights.semantic / (weights.k_rrf + *rank as f64);
        let entry = merged.entry(chunk_id.clone()).or_insert((document_id.clone(), 0.0, None, None));
        entry.1 += contribution;
        entry.3 = Some(*rank);
    }

    let mut result: Vec<(String, String, f64, Option<usize>, Option<usize>)> = merged
        .into_iter()
        .map(|(chunk_id, (document_id, score, bm25_rank, semantic_rank))| {
            (chunk_id, document_id, score, bm25_rank, semantic_rank)
        })
        .collect();
    result.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap());
    result
}

/// Static domain-specific synonyms, keyed by lowercase token.
pub struct SynonymTable(HashMap<&'static str, &'static [&'static str]>);

impl Default for SynonymTable {
    fn default() -> Self {
        let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        map.insert("doctor", &["physician", "md"]);
        map.insert("plaintiff", &["claimant", "petitioner"]);
        map.insert("defendant", &["respondent"]);
        map.insert("contract", &["agreement"]);
        Self(map)
    }
}

impl SynonymTable {
    pub fn lookup(&self, token: &str) -> Option<&'static [&'static str]> {
        self.0.get(token.to_lowercase().as_str()).copied()
    }
}

/// One corpus-learned term cluster; only clusters with `coherence_score > 0.3`
/// contribute terms to expansion (§4.7).
#[derive(Debug, Clone)]
pub struct TermCluster {
    pub anchor: String,
    pub terms: Vec<String>,
    pub coherence_score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterTable(pub Vec<TermCluster>);

impl ClusterTable {
    pub fn terms_for(&self, token: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|c| c.anchor.eq_ignore_ascii_case(token) && c.coherence_score > 0.3)
            .flat_map(|c| c.terms.iter().take(3).cloned())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct QueryExpansion {
    pub original: String,
    pub expanded: String,
    pub synonyms_found: Vec<String>,
    pub corpus_terms: Vec<String>,
}

/// Expands each query token with static synonyms and coherent corpus
/// clusters, producing an OR-joined query string for BM25 (§4.7).
pub fn expand_query(query: &str, synonyms: &SynonymTable, clusters: &ClusterTable) -> QueryExpansion {
    let tokens = FtsIndex::tokenize(query);
    let mut synonyms_found = Vec::new();
    let mut corpus_terms = Vec::new();
    let mut or_groups = Vec::new();

    for token in &tokens {
        let mut group = vec![token.clone()];
        if let Some(syns) = synonyms.lookup(token) {
            for s in syns {
                synonyms_found.push(s.to_string());
                group.push(s.to_string());
            }
        }
        for term in clusters.terms_for(token) {
            corpus_terms.push(term.clone());
            group.push(term);
        }
        or_groups.push(if group.len() > 1 { format!("({})", group.join(" OR ")) } else { group[0].clone() });
    }

    QueryExpansion {
        original: query.to_string(),
        expanded: or_groups.join(" AND "),
        synonyms_found,
        corpus_terms,
    }
}

/// External reranker contract (§6): returns a 0-10 score per candidate chunk.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[(String, String)],
    ) -> std::result::Result<Vec<(String, f64)>, BackendError>;
}

/// Sends the top ≤20 fused hits to `reranker`, remaps scores to 0-10, and
/// re-sorts descending (§4.7 optional rerank).
pub async fn rerank(
    reranker: &dyn Reranker,
    query: &str,
    hits: &[FusedHit],
    chunk_texts: &HashMap<String, String>,
) -> Result<Vec<(FusedHit, f64)>> {
    let top: Vec<FusedHit> = hits.iter().take(20).cloned().collect();
    let candidates: Vec<(String, String)> = top
        .iter()
        .map(|h| (h.chunk_id.clone(), chunk_texts.get(&h.chunk_id).cloned().unwrap_or_default()))
        .collect();

    let scores = reranker.rerank(query, &candidates).await.map_err(|e| SearchError::Rerank(e.to_string()))?;
    let mut scored: Vec<(FusedHit, f64)> = top
        .into_iter()
        .map(|hit| {
            let score = scores.iter().find(|(id, _)| id == &hit.chunk_id).map(|(_, s)| *s).unwrap_or(0.0);
            (hit, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    Ok(scored)
}

/// One excerpt plus its entity annotations, ready to render into RAG context.
pub struct ContextEntry {
    pub chunk_id: String,
    pub text: String,
    pub entity_names: Vec<String>,
    pub relationships: Vec<String>,
}

/// Builds bounded markdown with `## Excerpts`, `## Entity Context`, and
/// `## Entity Relationships` sections, dropping lower-ranked sections first
/// once `max_context_length` (in characters) is exceeded (§4.7 RAG context).
pub fn build_rag_context(entries: &[ContextEntry], max_context_length: usize) -> String {
    let excerpts: String = entries
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{}. {}\n", i + 1, e.text))
        .collect();

    let entity_context: String = entries
        .iter()
        .flat_map(|e| e.entity_names.iter())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .map(|name| format!("- {name}\n"))
        .collect();

    let relationships: String = entries
        .iter()
        .flat_map(|e| e.relationships.iter())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .map(|rel| format!("- {rel}\n"))
        .collect();

    let sections = [
        ("## Excerpts\n", excerpts),
        ("## Entity Context\n", entity_context),
        ("## Entity Relationships\n", relationships),
    ];

    let mut rendered: Vec<String> = sections
        .iter()
        .filter(|(_, body)| !body.is_empty())
        .map(|(header, body)| format!("{header}{body}"))
        .collect();

    let mut total: usize = rendered.iter().map(|s| s.len()).sum();
    while total > max_context_length && rendered.len() > 1 {
        let dropped = rendered.pop().unwrap();
        total -= dropped.len();
    }
    if let Some(last) = rendered.last_mut() {
        if total > max_context_length {
            last.truncate(max_context_length.min(last.len()));
        }
    }
    rendered.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario S3: BM25 `[A,B,C]`, semantic `[B,D,A]`, `w_b=w_s=1`, `k_RRF=60`.
    /// Fused order B, A, D, C with exact scores.
    #[test]
    fn s3_reciprocal_rank_fusion_matches_worked_example() {
        let bm25 = vec![
            ("A".to_string(), "doc".to_string(), 1),
            ("B".to_string(), "doc".to_string(), 2),
            ("C".to_string(), "doc".to_string(), 3),
        ];
        let semantic = vec![
            ("B".to_string(), "doc".to_string(), 1),
            ("D".to_string(), "doc".to_string(), 2),
            ("A".to_string(), "doc".to_string(), 3),
        ];
        let fused = reciprocal_rank_fusion(&bm25, &semantic, RrfWeights::default());

        let ids: Vec<&str> = fused.iter().map(|(id, ..)| id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A", "D", "C"]);

        let score_of = |id: &str| fused.iter().find(|(cid, ..)| cid == id).unwrap().2;
        assert!((score_of("B") - (1.0 / 61.0 + 1.0 / 61.0)).abs() < 1e-9);
        assert!((score_of("A") - (1.0 / 61.0 + 1.0 / 63.0)).abs() < 1e-9);
        assert!((score_of("D") - (1.0 / 62.0)).abs() < 1e-9);
        assert!((score_of("C") - (1.0 / 63.0)).abs() < 1e-9);
    }

    #[test]
    fn query_expansion_or_joins_synonyms_and_clusters() {
        let synonyms = SynonymTable::default();
        let clusters = ClusterTable(vec![TermCluster {
            anchor: "contract".into(),
            terms: vec!["lease".into(), "deed".into()],
            coherence_score: 0.5,
        }]);
        let expansion = expand_query("contract dispute", &synonyms, &clusters);
        assert!(expansion.synonyms_found.contains(&"agreement".to_string()));
        assert!(expansion.corpus_terms.contains(&"lease".to_string()));
        assert!(expansion.expanded.contains("OR"));
    }

    #[test]
    fn low_coherence_clusters_are_excluded() {
        let synonyms = SynonymTable::default();
        let clusters = ClusterTable(vec![TermCluster {
            anchor: "contract".into(),
            terms: vec!["lease".into()],
            coherence_score: 0.1,
        }]);
        let expansion = expand_query("contract", &synonyms, &clusters);
        assert!(expansion.corpus_terms.is_empty());
    }

    #[test]
    fn rag_context_drops_lower_sections_under_tight_budget() {
        let entries = vec![ContextEntry {
            chunk_id: "c1".into(),
            text: "the quick brown fox".into(),
            entity_names: vec!["Acme".into()],
            relationships: vec!["Acme -[works_at]-> J. Smith".into()],
        }];
        let full = build_rag_context(&entries, 10_000);
        assert!(full.contains("## Excerpts"));
        assert!(full.contains("## Entity Context"));
        assert!(full.contains("## Entity Relationships"));

        let tight = build_rag_context(&entries, 30);
        assert!(tight.contains("## Excerpts"));
        assert!(!tight.contains("## Entity Relationships"));
    }
}
