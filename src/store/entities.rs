//! CRUD for `entities` and `entity_mentions`.

use super::documents::parse_dt;
use super::Store;
use crate::error::{Result, StoreError};
use crate::model::{Entity, EntityMention, EntityType};
use sqlx::Row;

impl Store {
    pub async fn insert_entity(&self, entity: &Entity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entities
                (id, document_id, entity_type, raw_text, normalized_text, confidence, metadata,
                 provenance_id, created_at)
            VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.document_id)
        .bind(entity_type_str(entity.entity_type))
        .bind(&entity.raw_text)
        .bind(&entity.normalized_text)
        .bind(entity.confidence)
        .bind(serde_json::to_string(&entity.metadata)?)
        .bind(&entity.provenance_id)
        .bind(entity.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn insert_mention(&self, mention: &EntityMention) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entity_mentions
                (id, entity_id, chunk_id, page_number, character_start, character_end, context_snippet)
            VALUES (?1,?2,?3,?4,?5,?6,?7)
            "#,
        )
        .bind(&mention.id)
        .bind(&mention.entity_id)
        .bind(&mention.chunk_id)
        .bind(mention.page_number)
        .bind(mention.character_start)
        .bind(mention.character_end)
        .bind(&mention.context_snippet)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_entities_for_document(&self, document_id: &str) -> Result<Vec<Entity>> {
        let rows = sqlx::query("SELECT * FROM entities WHERE document_id = ?1 ORDER BY created_at ASC")
            .bind(document_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_entity).collect()
    }

    pub async fn list_mentions_for_entity(&self, entity_id: &str) -> Result<Vec<EntityMention>> {
        let rows = sqlx::query("SELECT * FROM entity_mentions WHERE entity_id = ?1")
            .bind(entity_id)
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(row_to_mention).collect())
    }

    /// Distinct `(entity_id, chunk_id)` co-occurrences within one document, grouped by
    /// chunk — used by the KG builder to find candidate co-mention pairs (§4.6 step 4).
    pub async fn entities_by_chunk(&self, document_id: &str) -> Result<Vec<(String, Vec<String>)>> {
        let rows = sqlx::query(
            r#"
            SELECT em.chunk_id AS chunk_id, e.id AS entity_id
            FROM entity_mentions em
            JOIN entities e ON e.id = em.entity_id
            WHERE e.document_id = ?1
            ORDER BY em.chunk_id ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(self.pool())
        .await?;

        let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
        for row in rows {
            let chunk_id: String = row.get("chunk_id");
            let entity_id: String = row.get("entity_id");
            match grouped.last_mut() {
                Some((last_chunk, ids)) if last_chunk == &chunk_id => {
                    if !ids.contains(&entity_id) {
                        ids.push(entity_id);
                    }
                }
                _ => grouped.push((chunk_id, vec![entity_id])),
            }
        }
        Ok(grouped)
    }
}

pub fn entity_type_str(t: EntityType) -> &'static str {
    match t {
        EntityType::Person => "person",
        EntityType::Organization => "organization",
        EntityType::Location => "location",
        EntityType::Date => "date",
        EntityType::Amount => "amount",
        EntityType::CaseNumber => "case_number",
        EntityType::Medication => "medication",
        EntityType::Diagnosis => "diagnosis",
        EntityType::MedicalDevice => "medical_device",
        EntityType::Other => "other",
    }
}

pub fn parse_entity_type(s: &str) -> Result<EntityType> {
    Ok(match s {
        "person" => EntityType::Person,
        "organization" => EntityType::Organization,
        "location" => EntityType::Location,
        "date" => EntityType::Date,
        "amount" => EntityType::Amount,
        "case_number" => EntityType::CaseNumber,
        "medication" => EntityType::Medication,
        "diagnosis" => EntityType::Diagnosis,
        "medical_device" => EntityType::MedicalDevice,
        "other" => EntityType::Other,
        other => {
            return Err(StoreError::MalformedValue {
                field: "entities.entity_type".into(),
                value: other.to_string(),
            }
            .into())
        }
    })
}

fn row_to_entity(row: &sqlx::sqlite::SqliteRow) -> Result<Entity> {
    let entity_type: String = row.get("entity_type");
    let metadata: String = row.get("metadata");
    Ok(Entity {
        id: row.get("id"),
        document_id: row.get("document_id"),
        entity_type: parse_entity_type(&entity_type)?,
        raw_text: row.get("raw_text"),
        normalized_text: row.get("normalized_text"),
        confidence: row.get("confidence"),
        metadata: serde_json::from_str(&metadata)?,
        provenance_id: row.get("provenance_id"),
        created_at: parse_dt(row, "created_at")?,
    })
}

fn row_to_mention(row: sqlx::sqlite::SqliteRow) -> EntityMention {
    EntityMention {
        id: row.get("id"),
        entity_id: row.get("entity_id"),
        chunk_id: row.get("chunk_id"),
        page_number: row.get("page_number"),
        character_start: row.get("character_start"),
        character_end: row.get("character_end"),
        context_snippet: row.get("context_snippet"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::seeded_store;

    fn entity(id: &str, document_id: &str, raw: &str) -> Entity {
        Entity {
            id: id.to_string(),
            document_id: document_id.to_string(),
            entity_type: EntityType::Person,
            raw_text: raw.to_string(),
            normalized_text: raw.to_lowercase(),
            confidence: 0.9,
            metadata: serde_json::json!({}),
            provenance_id: "prov-ocr-1".into(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn entities_by_chunk_groups_co_occurring_entities() {
        use crate::model::{Chunk, EmbeddingStatus, PageLocation};

        let (store, document_id, ocr_id) = seeded_store("J. Smith works at Acme").await;
        store
            .insert_chunks(&[Chunk {
                id: "c1".into(),
                document_id: document_id.clone(),
                ocr_result_id: ocr_id,
                chunk_index: 0,
                character_start: 0,
                character_end: 23,
                text: "J. Smith works at Acme".into(),
                text_hash: crate::hash::hash_str("J. Smith works at Acme"),
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

        let e1 = entity("e1", &document_id, "J. Smith");
        let e2 = entity("e2", &document_id, "Acme");
        store.insert_entity(&e1).await.unwrap();
        store.insert_entity(&e2).await.unwrap();

        store
            .insert_mention(&EntityMention {
                id: "m1".into(),
                entity_id: "e1".into(),
                chunk_id: "c1".into(),
                page_number: 1,
                character_start: 0,
                character_end: 8,
                context_snippet: "J. Smith works at Acme".into(),
            })
            .await
            .unwrap();
        store
            .insert_mention(&EntityMention {
                id: "m2".into(),
                entity_id: "e2".into(),
                chunk_id: "c1".into(),
                page_number: 1,
                character_start: 19,
                character_end: 23,
                context_snippet: "J. Smith works at Acme".into(),
            })
            .await
            .unwrap();

        let grouped = store.entities_by_chunk(&document_id).await.unwrap();
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].1.len(), 2);
    }
}
