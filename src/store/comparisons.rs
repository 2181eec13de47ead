//! CRUD for `comparisons`.

use super::documents::parse_dt;
use super::Store;
use crate::error::{Result, StoreError};
use crate::model::Comparison;
use sqlx::Row;

impl Store {
    pub async fn insert_comparison(&self, comparison: &Comparison) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO comparisons
                (id, document_a_id, document_b_id, similarity_ratio, text_diff, structural_diff,
                 entity_diff, summary, content_hash, provenance_id, duration_ms, created_at)
            VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
            "#,
        )
        .bind(&comparison.id)
        .bind(&comparison.document_a_id)
        .bind(&comparison.document_b_id)
        .bind(comparison.similarity_ratio)
        .bind(serde_json::to_string(&comparison.text_diff)?)
        .bind(serde_json::to_string(&comparison.structural_diff)?)
        .bind(serde_json::to_string(&comparison.entity_diff)?)
        .bind(&comparison.summary)
        .bind(&comparison.content_hash)
        .bind(&comparison.provenance_id)
        .bind(comparison.duration_ms)
        .bind(comparison.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_comparison(&self, id: &str) -> Result<Comparison> {
        let row = sqlx::query("SELECT * FROM comparisons WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "comparisons",
                id: id.to_string(),
            })?;
        row_to_comparison(&row)
    }

    pub async fn find_comparison(&self, document_a_id: &str, document_b_id: &str) -> Result<Option<Comparison>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM comparisons
            WHERE (document_a_id = ?1 AND document_b_id = ?2) OR (document_a_id = ?2 AND document_b_id = ?1)
            ORDER BY created_at DESC LIMIT 1
            "#,
        )
        .bind(document_a_id)
        .bind(document_b_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_comparison).transpose()
    }
}

fn row_to_comparison(row: &sqlx::sqlite::SqliteRow) -> Result<Comparison> {
    let text_diff: String = row.get("text_diff");
    let structural_diff: String = row.get("structural_diff");
    let entity_diff: String = row.get("entity_diff");
    Ok(Comparison {
        id: row.get("id"),
        document_a_id: row.get("document_a_id"),
        document_b_id: row.get("document_b_id"),
        similarity_ratio: row.get("similarity_ratio"),
        text_diff: serde_json::from_str(&text_diff)?,
        structural_diff: serde_json::from_str(&structural_diff)?,
        entity_diff: serde_json::from_str(&entity_diff)?,
        summary: row.get("summary"),
        content_hash: row.get("content_hash"),
        provenance_id: row.get("provenance_id"),
        duration_ms: row.get("duration_ms"),
        created_at: parse_dt(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{document, provenance, seeded_store};
    use crate::model::ProvenanceType;

    #[tokio::test]
    async fn insert_and_find_comparison_either_order() {
        let (store, document_a, _) = seeded_store("alpha").await;
        let doc_b = document("doc-2", "sha256:other");
        store
            .insert_provenance(&provenance("prov-doc-2", ProvenanceType::Document, &doc_b.id, vec![]))
            .await
            .unwrap();
        store.create_document(&doc_b).await.unwrap();

        store
            .insert_provenance(&provenance(
                "prov-cmp-1",
                ProvenanceType::Comparison,
                &document_a,
                vec!["prov-doc-1".into(), "prov-doc-2".into()],
            ))
            .await
            .unwrap();

        store
            .insert_comparison(&Comparison {
                id: "cmp-1".into(),
                document_a_id: document_a.clone(),
                document_b_id: doc_b.id.clone(),
                similarity_ratio: 0.5,
                text_diff: serde_json::json!({}),
                structural_diff: serde_json::json!({}),
                entity_diff: serde_json::json!({}),
                summary: "half similar".into(),
                content_hash: crate::hash::hash_str("cmp-1"),
                provenance_id: "prov-cmp-1".into(),
                duration_ms: 5,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let found = store.find_comparison(&doc_b.id, &document_a).await.unwrap();
        assert_eq!(found.unwrap().id, "cmp-1");
    }
}
