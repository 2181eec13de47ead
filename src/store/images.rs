//! CRUD for `images`.

use super::documents::parse_dt;
use super::Store;
use crate::error::{Result, StoreError};
use crate::model::{BlockType, BoundingBox, Image, VlmStatus};
use sqlx::Row;

impl Store {
    pub async fn insert_image(&self, image: &Image) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO images
                (id, document_id, ocr_result_id, page_number, bbox_x, bbox_y, bbox_width, bbox_height,
                 format, width, height, path, block_type, is_header_footer, content_hash, vlm_status,
                 vlm_description, vlm_structured_data, vlm_confidence, vlm_tokens_used, error_message,
                 provenance_id, created_at)
            VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)
            "#,
        )
        .bind(&image.id)
        .bind(&image.document_id)
        .bind(&image.ocr_result_id)
        .bind(image.page_number)
        .bind(image.bbox.x)
        .bind(image.bbox.y)
        .bind(image.bbox.width)
        .bind(image.bbox.height)
        .bind(&image.format)
        .bind(image.width)
        .bind(image.height)
        .bind(&image.path)
        .bind(image.block_type.map(block_type_str))
        .bind(image.is_header_footer)
        .bind(&image.content_hash)
        .bind(vlm_status_str(image.vlm_status))
        .bind(&image.vlm_description)
        .bind(
            image
                .vlm_structured_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(image.vlm_confidence)
        .bind(image.vlm_tokens_used)
        .bind(&image.error_message)
        .bind(&image.provenance_id)
        .bind(image.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_image(&self, id: &str) -> Result<Image> {
        let row = sqlx::query("SELECT * FROM images WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "images",
                id: id.to_string(),
            })?;
        row_to_image(&row)
    }

    pub async fn list_images_for_document(&self, document_id: &str) -> Result<Vec<Image>> {
        let rows = sqlx::query("SELECT * FROM images WHERE document_id = ?1 ORDER BY page_number ASC")
            .bind(document_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_image).collect()
    }

    /// First other image already VLM-complete sharing `content_hash`, self excluded (§4.4 dedup).
    pub async fn find_completed_image_by_content_hash(
        &self,
        content_hash: &str,
        exclude_id: &str,
    ) -> Result<Option<Image>> {
        let row = sqlx::query(
            "SELECT * FROM images WHERE content_hash = ?1 AND vlm_status = 'complete' AND id != ?2 LIMIT 1",
        )
        .bind(content_hash)
        .bind(exclude_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_image).transpose()
    }

    pub async fn set_vlm_result(
        &self,
        id: &str,
        description: &str,
        structured_data: Option<&serde_json::Value>,
        confidence: f64,
        tokens_used: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE images SET vlm_status = 'complete', vlm_description = ?1, vlm_structured_data = ?2,
             vlm_confidence = ?3, vlm_tokens_used = ?4 WHERE id = ?5",
        )
        .bind(description)
        .bind(structured_data.map(serde_json::to_string).transpose()?)
        .bind(confidence)
        .bind(tokens_used)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn set_vlm_failed(&self, id: &str, error_message: &str) -> Result<()> {
        sqlx::query("UPDATE images SET vlm_status = 'failed', error_message = ?1 WHERE id = ?2")
            .bind(error_message)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

fn block_type_str(t: BlockType) -> &'static str {
    match t {
        BlockType::Table => "table",
        BlockType::Code => "code",
        BlockType::Figure => "figure",
        BlockType::TableGroup => "table_group",
        BlockType::Text => "text",
    }
}

fn parse_block_type(s: &str) -> Result<BlockType> {
    Ok(match s {
        "table" => BlockType::Table,
        "code" => BlockType::Code,
        "figure" => BlockType::Figure,
        "table_group" => BlockType::TableGroup,
        "text" => BlockType::Text,
        other => {
            return Err(StoreError::MalformedValue {
                field: "images.block_type".into(),
                value: other.to_string(),
            }
            .into())
        }
    })
}

fn vlm_status_str(status: VlmStatus) -> &'static str {
    match status {
        VlmStatus::Pending => "pending",
        VlmStatus::Complete => "complete",
        VlmStatus::Failed => "failed",
        VlmStatus::Skipped => "skipped",
    }
}

fn parse_vlm_status(s: &str) -> Result<VlmStatus> {
    Ok(match s {
        "pending" => VlmStatus::Pending,
        "complete" => VlmStatus::Complete,
        "failed" => VlmStatus::Failed,
        "skipped" => VlmStatus::Skipped,
        other => {
            return Err(StoreError::MalformedValue {
                field: "images.vlm_status".into(),
                value: other.to_string(),
            }
            .into())
        }
    })
}

fn row_to_image(row: &sqlx::sqlite::SqliteRow) -> Result<Image> {
    let block_type: Option<String> = row.get("block_type");
    let vlm_status: String = row.get("vlm_status");
    let vlm_structured_data: Option<String> = row.get("vlm_structured_data");
    Ok(Image {
        id: row.get("id"),
        document_id: row.get("document_id"),
        ocr_result_id: row.get("ocr_result_id"),
        page_number: row.get("page_number"),
        bbox: BoundingBox {
            x: row.get("bbox_x"),
            y: row.get("bbox_y"),
            width: row.get("bbox_width"),
            height: row.get("bbox_height"),
        },
        format: row.get("format"),
        width: row.get("width"),
        height: row.get("height"),
        path: row.get("path"),
        block_type: block_type.map(|s| parse_block_type(&s)).transpose()?,
        is_header_footer: row.get("is_header_footer"),
        content_hash: row.get("content_hash"),
        vlm_status: parse_vlm_status(&vlm_status)?,
        vlm_description: row.get("vlm_description"),
        vlm_structured_data: vlm_structured_data
            .map(|s| serde_json::from_str(&s))
            .transpose()?,
        vlm_confidence: row.get("vlm_confidence"),
        vlm_tokens_used: row.get("vlm_tokens_used"),
        error_message: row.get("error_message"),
        provenance_id: row.get("provenance_id"),
        created_at: parse_dt(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::seeded_store;

    fn image(id: &str, document_id: &str, ocr_result_id: &str, content_hash: &str) -> Image {
        Image {
            id: id.to_string(),
            document_id: document_id.to_string(),
            ocr_result_id: ocr_result_id.to_string(),
            page_number: 1,
            bbox: BoundingBox::default(),
            format: "png".into(),
            width: 100,
            height: 100,
            path: format!("images/{id}.png"),
            block_type: Some(BlockType::Figure),
            is_header_footer: false,
            content_hash: content_hash.to_string(),
            vlm_status: VlmStatus::Pending,
            vlm_description: None,
            vlm_structured_data: None,
            vlm_confidence: None,
            vlm_tokens_used: None,
            error_message: None,
            provenance_id: "prov-ocr-1".into(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn dedup_lookup_excludes_self_and_requires_complete() {
        let (store, document_id, ocr_id) = seeded_store("alpha").await;
        store
            .insert_image(&image("img-1", &document_id, &ocr_id, "sha256:shared"))
            .await
            .unwrap();
        store
            .insert_image(&image("img-2", &document_id, &ocr_id, "sha256:shared"))
            .await
            .unwrap();

        assert!(store
            .find_completed_image_by_content_hash("sha256:shared", "img-2")
            .await
            .unwrap()
            .is_none());

        store
            .set_vlm_result("img-1", "a figure", None, 0.9, 42)
            .await
            .unwrap();

        let found = store
            .find_completed_image_by_content_hash("sha256:shared", "img-2")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, "img-1");

        assert!(store
            .find_completed_image_by_content_hash("sha256:shared", "img-1")
            .await
            .unwrap()
            .is_none());
    }
}
