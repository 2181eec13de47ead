//! Knowledge graph builder (component K): resolves extracted entities onto
//! canonical nodes, links co-occurring nodes with weighted edges, and detects
//! contradictions between two documents' evidence (§4.6).
//!
//! Per-entity-type match thresholds aren't pinned down by name in the source
//! material; this crate keeps them as a named [`ResolutionThresholds`]
//! configuration rather than guessing a single global cutoff, falling back to
//! the generic Sørensen–Dice ≥ 0.85 bound for any type without an override.

use crate::error::Result;
use crate::model::{EntityType, KnowledgeEdge, KnowledgeNode, NodeEntityLink, RelationshipType};
use crate::store::graph::relationship_type_str;
use crate::store::provenance::new_id;
use crate::store::Store;
use std::collections::HashMap;

pub const DEFAULT_DICE_THRESHOLD: f64 = 0.85;

/// Per-entity-type acceptance thresholds for candidate-node matching. Falls
/// back to [`DEFAULT_DICE_THRESHOLD`] for any type without an explicit entry.
#[derive(Debug, Clone)]
pub struct ResolutionThresholds {
    by_type: HashMap<EntityType, f64>,
    default: f64,
}

impl Default for ResolutionThresholds {
    fn default() -> Self {
        let mut by_type = HashMap::new();
        by_type.insert(EntityType::Person, 0.80);
        by_type.insert(EntityType::Organization, 0.75);
        by_type.insert(EntityType::Location, 0.85);
        by_type.insert(EntityType::CaseNumber, 0.95);
        by_type.insert(EntityType::Amount, 0.98);
        Self { by_type, default: DEFAULT_DICE_THRESHOLD }
    }
}

impl ResolutionThresholds {
    pub fn for_type(&self, entity_type: EntityType) -> f64 {
        self.by_type.get(&entity_type).copied().unwrap_or(self.default)
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn bigrams(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() < 2 {
        return Vec::new();
    }
    chars.windows(2).map(|w| w.iter().collect()).collect()
}

/// `2·|A∩B| / (|A|+|B|)` over character bigrams of lowercased, trimmed strings.
/// Exact match short-circuits to 1.0; strings shorter than 2 chars are 0.0
/// unless identical (§4.6).
pub fn dice_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize(a), normalize(b));
    if a == b {
        return 1.0;
    }
    if a.chars().count() < 2 || b.chars().count() < 2 {
        return 0.0;
    }
    let bigrams_a = bigrams(&a);
    let bigrams_b = bigrams(&b);
    let mut pool = bigrams_b.clone();
    let mut intersection = 0usize;
    for bg in &bigrams_a {
        if let Some(pos) = pool.iter().position(|x| x == bg) {
            pool.remove(pos);
            intersection += 1;
        }
    }
    (2.0 * intersection as f64) / (bigrams_a.len() + bigrams_b.len()) as f64
}

/// `J. Smith` ↔ `John Smith`: one side's first token is a single initial that
/// matches the other side's first-token initial, and trailing tokens match.
pub fn initial_match(a: &str, b: &str) -> bool {
    initial_match_tokens(&normalize(a), &normalize(b))
}

fn initial_match_tokens(a: &str, b: &str) -> bool {
    let ta: Vec<String> = a.split_whitespace().map(|s| s.trim_end_matches('.').to_string()).collect();
    let tb: Vec<String> = b.split_whitespace().map(|s| s.trim_end_matches('.').to_string()).collect();
    if ta.len() != tb.len() || ta.is_empty() {
        return false;
    }
    let (rest_a, rest_b): (Vec<String>, Vec<String>) = match (ta.split_first(), tb.split_first()) {
        (Some((fa, ra)), Some((fb, rb))) => {
            let initials_compatible = |short: &str, long: &str| {
                short.chars().count() == 1 && long.starts_with(short.chars().next().unwrap())
            };
            if fa != fb && !initials_compatible(fa, fb) && !initials_compatible(fb, fa) {
                return false;
            }
            (ra.to_vec(), rb.to_vec())
        }
        _ => return false,
    };
    rest_a == rest_b // trailing tokens (everything after the first) must match exactly
}

const ORG_ABBREVIATIONS: &[(&str, &str)] = &[
    ("corp.", "corporation"),
    ("corp", "corporation"),
    ("inc.", "incorporated"),
    ("inc", "incorporated"),
    ("co.", "company"),
    ("ltd.", "limited"),
    ("ltd", "limited"),
    ("llc", "limited liability company"),
];

/// Expands trailing organization abbreviations (`Acme Corp.` → `acme corporation`).
pub fn expand_abbreviation(name: &str) -> String {
    let normalized = normalize(name);
    for (abbr, full) in ORG_ABBREVIATIONS {
        if let Some(stripped) = normalized.strip_suffix(abbr) {
            return format!("{} {full}", stripped.trim_end());
        }
    }
    normalized
}

/// Strips non-alphanumerics and leading zeros so `CV-2024-001` and `cv 2024 1` compare equal.
pub fn normalize_case_number(s: &str) -> String {
    let cleaned: String = s.chars().filter(|c| c.is_alphanumeric()).collect();
    let cleaned = cleaned.to_lowercase();
    let mut out = String::new();
    let mut digits = String::new();
    let flush = |digits: &mut String, out: &mut String| {
        if !digits.is_empty() {
            let trimmed = digits.trim_start_matches('0');
            out.push_str(if trimmed.is_empty() { "0" } else { trimmed });
            digits.clear();
        }
    };
    for c in cleaned.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else {
            flush(&mut digits, &mut out);
            out.push(c);
        }
    }
    flush(&mut digits, &mut out);
    out
}

/// Two amounts are equal within `tolerance_pct` percent of the larger magnitude.
pub fn amount_within_tolerance(a: f64, b: f64, tolerance_pct: f64) -> bool {
    let larger = a.abs().max(b.abs());
    if larger == 0.0 {
        return a == b;
    }
    ((a - b).abs() / larger) * 100.0 <= tolerance_pct
}

/// One location string contains the other after normalization (`"Austin"` in `"Austin, TX"`).
pub fn location_contains(a: &str, b: &str) -> bool {
    let (a, b) = (normalize(a), normalize(b));
    a.contains(&b) || b.contains(&a)
}

/// Scores a candidate node against an incoming entity by type-appropriate rules,
/// returning the best matching score in `[0.0, 1.0]`.
pub fn match_score(entity_type: EntityType, candidate_name: &str, raw: &str, normalized: &str) -> f64 {
    if normalize(candidate_name) == normalize(normalized) {
        return 1.0;
    }
    let dice = dice_similarity(candidate_name, normalized).max(dice_similarity(candidate_name, raw));
    match entity_type {
        EntityType::Person if initial_match(candidate_name, raw) || initial_match(candidate_name, normalized) => 1.0,
        EntityType::Organization => {
            let expanded_candidate = expand_abbreviation(candidate_name);
            let expanded_raw = expand_abbreviation(raw);
            if expanded_candidate == expanded_raw {
                1.0
            } else {
                dice
            }
        }
        EntityType::CaseNumber => {
            if normalize_case_number(candidate_name) == normalize_case_number(raw) {
                1.0
            } else {
                dice
            }
        }
        EntityType::Location if location_contains(candidate_name, raw) => 1.0,
        _ => dice,
    }
}

pub struct KnowledgeGraphBuilder<'a> {
    store: &'a Store,
    thresholds: ResolutionThresholds,
}

impl<'a> KnowledgeGraphBuilder<'a> {
    pub fn new(store: &'a Store, thresholds: ResolutionThresholds) -> Self {
        Self { store, thresholds }
    }

    /// Resolves every entity extracted for `document_id` onto a canonical
    /// node (creating one if no candidate clears threshold), then upserts
    /// co-occurrence edges for node pairs sharing a chunk (§4.6 steps 1-5).
    pub async fn build_for_document(&self, document_id: &str) -> Result<usize> {
        let entities = self.store.list_entities_for_document(document_id).await?;
        let mut entity_to_node: HashMap<String, String> = HashMap::new();
        let mut nodes_touched_this_document: std::collections::HashSet<String> = std::collections::HashSet::new();

        for entity in &entities {
            let node_id = self.resolve_or_create(entity, &mut nodes_touched_this_document).await?;
            entity_to_node.insert(entity.id.clone(), node_id);
        }

        let co_occurring = self.store.entities_by_chunk(document_id).await?;
        let mut edges_written = 0;
        for (_chunk_id, entity_ids) in co_occurring {
            for i in 0..entity_ids.len() {
                for j in (i + 1)..entity_ids.len() {
                    let (Some(node_a), Some(node_b)) =
                        (entity_to_node.get(&entity_ids[i]), entity_to_node.get(&entity_ids[j]))
                    else {
                        continue;
                    };
                    if node_a == node_b {
                        continue;
                    }
                    self.store
                        .upsert_edge(node_a, node_b, RelationshipType::CoMentioned, 1.0, document_id)
                        .await?;
                    self.store.renormalize_edges_for_node(node_a).await?;
                    self.store.renormalize_edges_for_node(node_b).await?;
                    edges_written += 1;
                }
            }
        }
        Ok(edges_written)
    }

    async fn resolve_or_create(
        &self,
        entity: &crate::model::Entity,
        nodes_touched_this_document: &mut std::collections::HashSet<String>,
    ) -> Result<String> {
        let candidates = self.store.nodes_by_type(entity.entity_type).await?;
        let threshold = self.thresholds.for_type(entity.entity_type);

        let best = candidates
            .iter()
            .map(|c| (c, match_score(entity.entity_type, &c.normalized_name, &entity.raw_text, &entity.normalized_text)))
            .filter(|(_, score)| *score >= threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

        let (node, similarity, method) = match best {
            Some((node, score)) => (node.clone(), score, "bigram_or_rule"),
            None => {
                let now = chrono::Utc::now();
                let node = KnowledgeNode {
                    id: new_id("node"),
                    entity_type: entity.entity_type,
                    canonical_name: entity.raw_text.clone(),
                    normalized_name: entity.normalized_text.clone(),
                    aliases: vec![],
                    document_count: 0,
                    mention_count: 0,
                    edge_count: 0,
                    avg_confidence: entity.confidence,
                    metadata: serde_json::json!({}),
                    provenance_id: entity.provenance_id.clone(),
                    created_at: now,
                    updated_at: now,
                };
                self.store.insert_node(&node).await?;
                (node, 1.0, "new_node")
            }
        };

        self.store
            .link_entity_to_node(&NodeEntityLink {
                id: new_id("link"),
                node_id: node.id.clone(),
                entity_id: entity.id.clone(),
                similarity_score: similarity,
                resolution_method: method.to_string(),
                created_at: chrono::Utc::now(),
            })
            .await?;

        let mentions = self.store.list_mentions_for_entity(&entity.id).await?;
        let is_first_link_from_document = nodes_touched_this_document.insert(node.id.clone());
        let document_count = if is_first_link_from_document { node.document_count + 1 } else { node.document_count };
        let mention_count = node.mention_count + mentions.len() as i64;
        let avg_confidence = if mention_count > 0 {
            (node.avg_confidence * node.mention_count as f64 + entity.confidence * mentions.len() as f64)
                / mention_count as f64
        } else {
            node.avg_confidence
        };
        let mut aliases = node.aliases.clone();
        if !aliases.iter().any(|a| a == &entity.raw_text) {
            aliases.push(entity.raw_text.clone());
        }
        self.store.update_node_stats(&node.id, document_count, mention_count, avg_confidence, &aliases).await?;

        Ok(node.id)
    }

    /// Compares two documents' semantic edges over nodes mentioned by both,
    /// classifying contradictions HIGH/MEDIUM/LOW and deduplicating by
    /// `(entity, rel_type, target1, target2, severity)` (§4.6, scenario S5).
    pub async fn detect_contradictions(&self, document_a: &str, document_b: &str) -> Result<Vec<Contradiction>> {
        let entities_a = self.store.list_entities_for_document(document_a).await?;
        let entities_b = self.store.list_entities_for_document(document_b).await?;

        let nodes_a = self.node_set(&entities_a).await?;
        let nodes_b = self.node_set(&entities_b).await?;
        let shared: Vec<&KnowledgeNode> = nodes_a.iter().filter(|n| nodes_b.iter().any(|m| m.id == n.id)).collect();

        let mut contradictions = Vec::new();
        for node in shared {
            let edges = self.store.edges_for_node(&node.id).await?;
            let semantic: Vec<&KnowledgeEdge> = edges.iter().filter(|e| e.relationship_type.is_semantic()).collect();
            let in_a: Vec<&&KnowledgeEdge> = semantic.iter().filter(|e| e.document_ids.iter().any(|d| d == document_a)).collect();
            let in_b: Vec<&&KnowledgeEdge> = semantic.iter().filter(|e| e.document_ids.iter().any(|d| d == document_b)).collect();

            for ea in &in_a {
                for eb in &in_b {
                    if ea.id == eb.id {
                        continue;
                    }
                    if ea.relationship_type == eb.relationship_type && ea.target_node_id != eb.target_node_id {
                        contradictions.push(Contradiction {
                            entity_node_id: node.id.clone(),
                            relationship_type: ea.relationship_type,
                            target_a: ea.target_node_id.clone(),
                            target_b: eb.target_node_id.clone(),
                            severity: Severity::High,
                        });
                    } else if ea.relationship_type != eb.relationship_type {
                        contradictions.push(Contradiction {
                            entity_node_id: node.id.clone(),
                            relationship_type: ea.relationship_type,
                            target_a: ea.target_node_id.clone(),
                            target_b: eb.target_node_id.clone(),
                            severity: Severity::Medium,
                        });
                    }
                }
            }

            if in_a.len() != in_b.len() {
                let (longer, shorter, longer_is_a) =
                    if in_a.len() > in_b.len() { (&in_a, &in_b, true) } else { (&in_b, &in_a, false) };
                for edge in longer.iter() {
                    if !shorter.iter().any(|e| e.relationship_type == edge.relationship_type) {
                        contradictions.push(Contradiction {
                            entity_node_id: node.id.clone(),
                            relationship_type: edge.relationship_type,
                            target_a: if longer_is_a { edge.target_node_id.clone() } else { String::new() },
                            target_b: if longer_is_a { String::new() } else { edge.target_node_id.clone() },
                            severity: Severity::Low,
                        });
                    }
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        contradictions.retain(|c| {
            seen.insert((c.entity_node_id.clone(), relationship_type_str(c.relationship_type), c.target_a.clone(), c.target_b.clone(), c.severity))
        });
        contradictions.sort_by_key(|c| match c.severity {
            Severity::High => 0,
            Severity::Medium => 1,
            Severity::Low => 2,
        });
        Ok(contradictions)
    }

    async fn node_set(&self, entities: &[crate::model::Entity]) -> Result<Vec<KnowledgeNode>> {
        let ids: Vec<String> = entities.iter().map(|e| e.id.clone()).collect();
        let links = self.store.nodes_for_entities(&ids).await?;
        let mut nodes = Vec::new();
        for (_entity_id, node_id) in links {
            if !nodes.iter().any(|n: &KnowledgeNode| n.id == node_id) {
                nodes.push(self.store.get_node(&node_id).await?);
            }
        }
        Ok(nodes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone)]
pub struct Contradiction {
    pub entity_node_id: String,
    pub relationship_type: RelationshipType,
    pub target_a: String,
    pub target_b: String,
    pub severity: Severity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dice_exact_match_is_one() {
        assert_eq!(dice_similarity("Acme", "acme"), 1.0);
    }

    #[test]
    fn dice_short_strings_are_zero_unless_identical() {
        assert_eq!(dice_similarity("a", "b"), 0.0);
        assert_eq!(dice_similarity("a", "a"), 1.0);
    }

    #[test]
    fn dice_similarity_of_similar_words() {
        let score = dice_similarity("night", "nacht");
        assert!(score > 0.0 && score < 1.0);
    }

    /// Scenario S4: "J. Smith" and "John Smith" resolve to the same person node.
    #[test]
    fn s4_initial_expansion_matches() {
        assert!(initial_match("J. Smith", "John Smith"));
        assert!(initial_match("John Smith", "J. Smith"));
        assert!(!initial_match("J. Smith", "Jane Doe"));
    }

    #[test]
    fn abbreviation_expansion_normalizes_suffix() {
        assert_eq!(expand_abbreviation("Acme Corp."), "acme corporation");
        assert_eq!(expand_abbreviation("Acme Corporation"), "acme corporation");
    }

    #[test]
    fn case_number_normalization_ignores_punctuation_and_leading_zeros() {
        assert_eq!(normalize_case_number("CV-2024-001"), normalize_case_number("cv20241"));
    }

    #[test]
    fn amount_tolerance_accepts_within_band_rejects_outside() {
        assert!(amount_within_tolerance(1000.0, 1005.0, 1.0));
        assert!(!amount_within_tolerance(1000.0, 1200.0, 1.0));
    }

    #[test]
    fn location_containment_either_direction() {
        assert!(location_contains("Austin, TX", "Austin"));
        assert!(location_contains("Austin", "Austin, TX"));
    }

    use crate::model::{Entity, ProvenanceType};
    use crate::store::test_support::{document, provenance};
    use crate::store::Store;

    async fn store_with_two_documents() -> (Store, String, String) {
        let store = Store::open_in_memory().await.unwrap();
        for (doc_id, hash) in [("doc-a", "sha256:a"), ("doc-b", "sha256:b")] {
            let doc = document(doc_id, hash);
            store
                .insert_provenance(&provenance(&format!("prov-{doc_id}"), ProvenanceType::Document, &doc.id, vec![]))
                .await
                .unwrap();
            store.create_document(&doc).await.unwrap();
        }
        (store, "doc-a".into(), "doc-b".into())
    }

    fn entity(id: &str, document_id: &str, raw: &str) -> Entity {
        Entity {
            id: id.into(),
            document_id: document_id.into(),
            entity_type: EntityType::Person,
            raw_text: raw.into(),
            normalized_text: raw.to_lowercase(),
            confidence: 0.9,
            metadata: serde_json::json!({}),
            provenance_id: format!("prov-{document_id}"),
            created_at: chrono::Utc::now(),
        }
    }

    /// Scenario S4: doc-a's "J. Smith" and doc-b's "John Smith" resolve to one node,
    /// with `document_count = 2` and both raw forms present in `aliases`.
    #[tokio::test]
    async fn s4_resolves_both_documents_to_one_node() {
        let (store, doc_a, doc_b) = store_with_two_documents().await;
        store.insert_entity(&entity("e1", &doc_a, "J. Smith")).await.unwrap();
        store.insert_entity(&entity("e2", &doc_b, "John Smith")).await.unwrap();

        let builder = KnowledgeGraphBuilder::new(&store, ResolutionThresholds::default());
        builder.build_for_document(&doc_a).await.unwrap();
        builder.build_for_document(&doc_b).await.unwrap();

        let nodes = store.nodes_by_type(EntityType::Person).await.unwrap();
        assert_eq!(nodes.len(), 1, "both mentions should resolve onto a single node");
        assert_eq!(nodes[0].document_count, 2);
        assert!(nodes[0].aliases.contains(&"J. Smith".to_string()));
        assert!(nodes[0].aliases.contains(&"John Smith".to_string()));
    }

    /// Scenario S5: doc-a has (John Smith)-[works_at]->(Acme); doc-b has
    /// (John Smith)-[works_at]->(Beta). Detection yields one HIGH contradiction.
    #[tokio::test]
    async fn s5_detects_high_contradiction_on_conflicting_target() {
        let (store, doc_a, doc_b) = store_with_two_documents().await;
        store.insert_entity(&entity("e1", &doc_a, "John Smith")).await.unwrap();
        store.insert_entity(&entity("e2", &doc_b, "John Smith")).await.unwrap();

        let builder = KnowledgeGraphBuilder::new(&store, ResolutionThresholds::default());
        builder.build_for_document(&doc_a).await.unwrap();
        builder.build_for_document(&doc_b).await.unwrap();

        let person_node = store.nodes_by_type(EntityType::Person).await.unwrap().remove(0);
        let acme = KnowledgeNode {
            id: "node-acme".into(),
            entity_type: EntityType::Organization,
            canonical_name: "Acme".into(),
            normalized_name: "acme".into(),
            aliases: vec![],
            document_count: 1,
            mention_count: 1,
            edge_count: 0,
            avg_confidence: 0.9,
            metadata: serde_json::json!({}),
            provenance_id: format!("prov-{doc_a}"),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let mut beta = acme.clone();
        beta.id = "node-beta".into();
        beta.canonical_name = "Beta".into();
        beta.normalized_name = "beta".into();
        store.insert_node(&acme).await.unwrap();
        store.insert_node(&beta).await.unwrap();

        store
            .upsert_edge(&person_node.id, &acme.id, RelationshipType::WorksAt, 1.0, &doc_a)
            .await
            .unwrap();
        store
            .upsert_edge(&person_node.id, &beta.id, RelationshipType::WorksAt, 1.0, &doc_b)
            .await
            .unwrap();

        let contradictions = builder.detect_contradictions(&doc_a, &doc_b).await.unwrap();
        assert_eq!(contradictions.len(), 1);
        assert_eq!(contradictions[0].severity, Severity::High);
        assert_eq!(contradictions[0].relationship_type, RelationshipType::WorksAt);
    }
}
