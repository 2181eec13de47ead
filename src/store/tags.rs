//! CRUD for the polymorphic `tags` table (§9 tagged-union dispatch).

use super::documents::parse_dt;
use super::Store;
use crate::error::{Result, StoreError};
use crate::model::{Tag, TagKind};
use sqlx::Row;

impl Store {
    pub async fn insert_tag(&self, tag: &Tag) -> Result<()> {
        sqlx::query("INSERT INTO tags (id, kind, target_id, label, created_at) VALUES (?1,?2,?3,?4,?5)")
            .bind(&tag.id)
            .bind(tag.kind.as_str())
            .bind(&tag.target_id)
            .bind(&tag.label)
            .bind(tag.created_at.to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn list_tags_for_target(&self, kind: TagKind, target_id: &str) -> Result<Vec<Tag>> {
        let rows = sqlx::query("SELECT * FROM tags WHERE kind = ?1 AND target_id = ?2 ORDER BY created_at ASC")
            .bind(kind.as_str())
            .bind(target_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_tag).collect()
    }

    pub async fn delete_tag(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM tags WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

fn row_to_tag(row: &sqlx::sqlite::SqliteRow) -> Result<Tag> {
    let kind: String = row.get("kind");
    Ok(Tag {
        id: row.get("id"),
        kind: TagKind::parse(&kind).ok_or_else(|| StoreError::MalformedValue {
            field: "tags.kind".into(),
            value: kind.clone(),
        })?,
        target_id: row.get("target_id"),
        label: row.get("label"),
        created_at: parse_dt(row, "created_at")?,
    })
}
