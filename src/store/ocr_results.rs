//! CRUD for `ocr_results`.

use super::documents::parse_dt;
use super::Store;
use crate::error::{Result, StoreError};
use crate::model::{OcrMode, OcrResult, PageOffset};
use sqlx::Row;

impl Store {
    pub async fn insert_ocr_result(&self, result: &OcrResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ocr_results
                (id, document_id, extracted_text, text_length, mode, page_count, page_offsets,
                 quality_score, cost_cents, content_hash, duration_ms, provenance_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&result.id)
        .bind(&result.document_id)
        .bind(&result.extracted_text)
        .bind(result.text_length)
        .bind(mode_str(result.mode))
        .bind(result.page_count)
        .bind(serde_json::to_string(&result.page_offsets)?)
        .bind(result.quality_score)
        .bind(result.cost_cents)
        .bind(&result.content_hash)
        .bind(result.duration_ms)
        .bind(&result.provenance_id)
        .bind(result.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        self.refresh_metadata().await?;
        Ok(())
    }

    pub async fn get_ocr_result(&self, id: &str) -> Result<OcrResult> {
        let row = sqlx::query("SELECT * FROM ocr_results WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "ocr_results",
                id: id.to_string(),
            })?;
        row_to_ocr_result(&row)
    }

    pub async fn get_ocr_result_for_document(&self, document_id: &str) -> Result<Option<OcrResult>> {
        let row = sqlx::query("SELECT * FROM ocr_results WHERE document_id = ?1")
            .bind(document_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_ocr_result).transpose()
    }

    /// Overwrite `extracted_text` without touching `content_hash` — used only by
    /// tamper-detection tests (scenario S2); production code never calls this.
    #[cfg(test)]
    pub async fn tamper_extracted_text(&self, id: &str, text: &str) -> Result<()> {
        sqlx::query("UPDATE ocr_results SET extracted_text = ?1 WHERE id = ?2")
            .bind(text)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

fn mode_str(mode: OcrMode) -> &'static str {
    match mode {
        OcrMode::Fast => "fast",
        OcrMode::Balanced => "balanced",
        OcrMode::Accurate => "accurate",
    }
}

fn parse_mode(s: &str) -> Result<OcrMode> {
    Ok(match s {
        "fast" => OcrMode::Fast,
        "balanced" => OcrMode::Balanced,
        "accurate" => OcrMode::Accurate,
        other => {
            return Err(StoreError::MalformedValue {
                field: "ocr_results.mode".into(),
                value: other.to_string(),
            }
            .into())
        }
    })
}

fn row_to_ocr_result(row: &sqlx::sqlite::SqliteRow) -> Result<OcrResult> {
    let mode: String = row.get("mode");
    let page_offsets: String = row.get("page_offsets");
    let page_offsets: Vec<PageOffset> = serde_json::from_str(&page_offsets)?;
    Ok(OcrResult {
        id: row.get("id"),
        document_id: row.get("document_id"),
        extracted_text: row.get("extracted_text"),
        text_length: row.get("text_length"),
        mode: parse_mode(&mode)?,
        page_count: row.get("page_count"),
        page_offsets,
        quality_score: row.get("quality_score"),
        cost_cents: row.get("cost_cents"),
        content_hash: row.get("content_hash"),
        duration_ms: row.get("duration_ms"),
        provenance_id: row.get("provenance_id"),
        created_at: parse_dt(row, "created_at")?,
    })
}
