//! CRUD for `knowledge_nodes`, `knowledge_edges` and `node_entity_links`.
//!
//! This is the storage layer the resolver in [`crate::knowledge_graph`] sits on top of.

use super::documents::parse_dt;
use super::entities::{entity_type_str, parse_entity_type};
use super::{batched, Store};
use crate::error::{Result, StoreError};
use crate::model::{KnowledgeEdge, KnowledgeNode, NodeEntityLink, RelationshipType};
use sqlx::{QueryBuilder, Row, Sqlite};

impl Store {
    pub async fn insert_node(&self, node: &KnowledgeNode) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_nodes
                (id, entity_type, canonical_name, normalized_name, aliases, document_count,
                 mention_count, edge_count, avg_confidence, metadata, provenance_id, created_at, updated_at)
            VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
            "#,
        )
        .bind(&node.id)
        .bind(entity_type_str(node.entity_type))
        .bind(&node.canonical_name)
        .bind(&node.normalized_name)
        .bind(serde_json::to_string(&node.aliases)?)
        .bind(node.document_count)
        .bind(node.mention_count)
        .bind(node.edge_count)
        .bind(node.avg_confidence)
        .bind(serde_json::to_string(&node.metadata)?)
        .bind(&node.provenance_id)
        .bind(node.created_at.to_rfc3339())
        .bind(node.updated_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_node(&self, id: &str) -> Result<KnowledgeNode> {
        let row = sqlx::query("SELECT * FROM knowledge_nodes WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "knowledge_nodes",
                id: id.to_string(),
            })?;
        row_to_node(&row)
    }

    /// Candidate nodes to resolve against: same entity type, for Sørensen–Dice comparison.
    pub async fn nodes_by_type(&self, entity_type: crate::model::EntityType) -> Result<Vec<KnowledgeNode>> {
        let rows = sqlx::query("SELECT * FROM knowledge_nodes WHERE entity_type = ?1")
            .bind(entity_type_str(entity_type))
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_node).collect()
    }

    pub async fn update_node_stats(
        &self,
        id: &str,
        document_count: i64,
        mention_count: i64,
        avg_confidence: f64,
        aliases: &[String],
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE knowledge_nodes
            SET document_count = ?1, mention_count = ?2, avg_confidence = ?3, aliases = ?4, updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(document_count)
        .bind(mention_count)
        .bind(avg_confidence)
        .bind(serde_json::to_string(aliases)?)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn link_entity_to_node(&self, link: &NodeEntityLink) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO node_entity_links (id, node_id, entity_id, similarity_score, resolution_method, created_at)
            VALUES (?1,?2,?3,?4,?5,?6)
            "#,
        )
        .bind(&link.id)
        .bind(&link.node_id)
        .bind(&link.entity_id)
        .bind(link.similarity_score)
        .bind(&link.resolution_method)
        .bind(link.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn upsert_edge(
        &self,
        source_node_id: &str,
        target_node_id: &str,
        relationship_type: RelationshipType,
        weight_delta: f64,
        document_id: &str,
    ) -> Result<KnowledgeEdge> {
        let existing = sqlx::query(
            "SELECT * FROM knowledge_edges WHERE source_node_id = ?1 AND target_node_id = ?2 AND relationship_type = ?3",
        )
        .bind(source_node_id)
        .bind(target_node_id)
        .bind(relationship_type_str(relationship_type))
        .fetch_optional(self.pool())
        .await?;

        let now = chrono::Utc::now();
        if let Some(row) = existing {
            let mut edge = row_to_edge(&row)?;
            edge.weight += weight_delta;
            edge.evidence_count += 1;
            if !edge.document_ids.iter().any(|d| d == document_id) {
                edge.document_ids.push(document_id.to_string());
            }
            edge.updated_at = now;
            sqlx::query(
                r#"
                UPDATE knowledge_edges
                SET weight = ?1, evidence_count = ?2, document_ids = ?3, updated_at = ?4
                WHERE id = ?5
                "#,
            )
            .bind(edge.weight)
            .bind(edge.evidence_count)
            .bind(serde_json::to_string(&edge.document_ids)?)
            .bind(edge.updated_at.to_rfc3339())
            .bind(&edge.id)
            .execute(self.pool())
            .await?;
            Ok(edge)
        } else {
            let edge = KnowledgeEdge {
                id: crate::store::provenance::new_id("edge"),
                source_node_id: source_node_id.to_string(),
                target_node_id: target_node_id.to_string(),
                relationship_type,
                weight: weight_delta,
                normalized_weight: 0.0,
                evidence_count: 1,
                document_ids: vec![document_id.to_string()],
                valid_from: None,
                valid_until: None,
                contradiction_count: 0,
                created_at: now,
                updated_at: now,
            };
            sqlx::query(
                r#"
                INSERT INTO knowledge_edges
                    (id, source_node_id, target_node_id, relationship_type, weight, normalized_weight,
                     evidence_count, document_ids, valid_from, valid_until, contradiction_count,
                     created_at, updated_at)
                VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
                "#,
            )
            .bind(&edge.id)
            .bind(&edge.source_node_id)
            .bind(&edge.target_node_id)
            .bind(relationship_type_str(edge.relationship_type))
            .bind(edge.weight)
            .bind(edge.normalized_weight)
            .bind(edge.evidence_count)
            .bind(serde_json::to_string(&edge.document_ids)?)
            .bind(edge.valid_from.map(|d| d.to_rfc3339()))
            .bind(edge.valid_until.map(|d| d.to_rfc3339()))
            .bind(edge.contradiction_count)
            .bind(edge.created_at.to_rfc3339())
            .bind(edge.updated_at.to_rfc3339())
            .execute(self.pool())
            .await?;
            Ok(edge)
        }
    }

    pub async fn edges_for_node(&self, node_id: &str) -> Result<Vec<KnowledgeEdge>> {
        let rows = sqlx::query(
            "SELECT * FROM knowledge_edges WHERE source_node_id = ?1 OR target_node_id = ?1",
        )
        .bind(node_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_edge).collect()
    }

    /// Renormalizes every incident edge weight against the node's own maximum (§4.6 step 6).
    pub async fn renormalize_edges_for_node(&self, node_id: &str) -> Result<()> {
        let edges = self.edges_for_node(node_id).await?;
        let max_weight = edges.iter().map(|e| e.weight).fold(0.0_f64, f64::max);
        if max_weight <= 0.0 {
            return Ok(());
        }
        for edge in edges {
            let normalized = edge.weight / max_weight;
            sqlx::query("UPDATE knowledge_edges SET normalized_weight = ?1 WHERE id = ?2")
                .bind(normalized)
                .bind(&edge.id)
                .execute(self.pool())
                .await?;
        }
        Ok(())
    }

    pub async fn increment_contradiction_count(&self, edge_id: &str) -> Result<()> {
        sqlx::query("UPDATE knowledge_edges SET contradiction_count = contradiction_count + 1 WHERE id = ?1")
            .bind(edge_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn nodes_for_entities(&self, entity_ids: &[String]) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        for batch in batched(entity_ids) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT entity_id, node_id FROM node_entity_links WHERE entity_id IN (");
            let mut separated = qb.separated(", ");
            for id in batch {
                separated.push_bind(id);
            }
            qb.push(")");
            let rows = qb.build().fetch_all(self.pool()).await?;
            for row in rows {
                out.push((row.get("entity_id"), row.get("node_id")));
            }
        }
        Ok(out)
    }
}

pub fn relationship_type_str(t: RelationshipType) -> &'static str {
    match t {
        RelationshipType::CoMentioned => "co_mentioned",
        RelationshipType::CoLocated => "co_located",
        RelationshipType::WorksAt => "works_at",
        RelationshipType::Represents => "represents",
        RelationshipType::PartyTo => "party_to",
        RelationshipType::LocatedIn => "located_in",
        RelationshipType::FiledIn => "filed_in",
        RelationshipType::Cites => "cites",
        RelationshipType::References => "references",
        RelationshipType::OccurredAt => "occurred_at",
        RelationshipType::Precedes => "precedes",
        RelationshipType::RelatedTo => "related_to",
        RelationshipType::TreatedWith => "treated_with",
        RelationshipType::AdministeredVia => "administered_via",
        RelationshipType::ManagedBy => "managed_by",
        RelationshipType::InteractsWith => "interacts_with",
    }
}

pub fn parse_relationship_type(s: &str) -> Result<RelationshipType> {
    Ok(match s {
        "co_mentioned" => RelationshipType::CoMentioned,
        "co_located" => RelationshipType::CoLocated,
        "works_at" => RelationshipType::WorksAt,
        "represents" => RelationshipType::Represents,
        "party_to" => RelationshipType::PartyTo,
        "located_in" => RelationshipType::LocatedIn,
        "filed_in" => RelationshipType::FiledIn,
        "cites" => RelationshipType::Cites,
        "references" => RelationshipType::References,
        "occurred_at" => RelationshipType::OccurredAt,
        "precedes" => RelationshipType::Precedes,
        "related_to" => RelationshipType::RelatedTo,
        "treated_with" => RelationshipType::TreatedWith,
        "administered_via" => RelationshipType::AdministeredVia,
        "managed_by" => RelationshipType::ManagedBy,
        "interacts_with" => RelationshipType::InteractsWith,
        other => {
            return Err(StoreError::MalformedValue {
                field: "knowledge_edges.relationship_type".into(),
                value: other.to_string(),
            }
            .into())
        }
    })
}

fn row_to_node(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeNode> {
    let entity_type: String = row.get("entity_type");
    let aliases: String = row.get("aliases");
    let metadata: String = row.get("metadata");
    Ok(KnowledgeNode {
        id: row.get("id"),
        entity_type: parse_entity_type(&entity_type)?,
        canonical_name: row.get("canonical_name"),
        normalized_name: row.get("normalized_name"),
        aliases: serde_json::from_str(&aliases)?,
        document_count: row.get("document_count"),
        mention_count: row.get("mention_count"),
        edge_count: row.get("edge_count"),
        avg_confidence: row.get("avg_confidence"),
        metadata: serde_json::from_str(&metadata)?,
        provenance_id: row.get("provenance_id"),
        created_at: parse_dt(row, "created_at")?,
        updated_at: parse_dt(row, "updated_at")?,
    })
}

fn row_to_edge(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeEdge> {
    let relationship_type: String = row.get("relationship_type");
    let document_ids: String = row.get("document_ids");
    let valid_from: Option<String> = row.get("valid_from");
    let valid_until: Option<String> = row.get("valid_until");
    Ok(KnowledgeEdge {
        id: row.get("id"),
        source_node_id: row.get("source_node_id"),
        target_node_id: row.get("target_node_id"),
        relationship_type: parse_relationship_type(&relationship_type)?,
        weight: row.get("weight"),
        normalized_weight: row.get("normalized_weight"),
        evidence_count: row.get("evidence_count"),
        document_ids: serde_json::from_str(&document_ids)?,
        valid_from: valid_from
            .map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&chrono::Utc)))
            .transpose()
            .map_err(|_| StoreError::MalformedValue {
                field: "knowledge_edges.valid_from".into(),
                value: "unparseable".into(),
            })?,
        valid_until: valid_until
            .map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&chrono::Utc)))
            .transpose()
            .map_err(|_| StoreError::MalformedValue {
                field: "knowledge_edges.valid_until".into(),
                value: "unparseable".into(),
            })?,
        contradiction_count: row.get("contradiction_count"),
        created_at: parse_dt(row, "created_at")?,
        updated_at: parse_dt(row, "updated_at")?,
    })
}
