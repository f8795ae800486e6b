//! SQLite-backed [`MetadataStore`] implementation.
//!
//! Files, fragments and reconciliation records each get an append-only
//! table (see [`crate::migrate`]). Structured fields that the store never
//! queries on (upload metadata, fragment metadata, raw responses,
//! references) are kept as JSON text.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use recon_harness_core::models::{BatchId, FileRecord, Fragment, Metadata, ReconRecord};
use recon_harness_core::services::MetadataStore;

/// SQLite implementation of the [`MetadataStore`] trait.
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// File records of one use case, oldest first.
    pub async fn list_files(&self, use_case: &str) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT use_case, file_id, storage_uri, object_key, sha256, batch_id,
                   meta_json, uploaded_at
            FROM files
            WHERE use_case = ?
            ORDER BY uploaded_at ASC, rowid ASC
            "#,
        )
        .bind(use_case)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(file_from_row).collect()
    }

    /// Number of fragment records stored for a batch.
    pub async fn count_fragments(&self, batch_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fragments WHERE batch_id = ?")
            .bind(batch_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn file_from_row(row: &SqliteRow) -> Result<FileRecord> {
    let meta_json: String = row.get("meta_json");
    let batch_id: String = row.get("batch_id");
    Ok(FileRecord {
        use_case: row.get("use_case"),
        file_id: row.get("file_id"),
        storage_uri: row.get("storage_uri"),
        object_key: row.get("object_key"),
        sha256: row.get("sha256"),
        batch_id: BatchId::from(batch_id.as_str()),
        meta: serde_json::from_str::<Metadata>(&meta_json).context("corrupt file metadata")?,
        uploaded_at: millis_to_datetime(row.get("uploaded_at")),
    })
}

fn recon_from_row(row: &SqliteRow) -> Result<ReconRecord> {
    let raw: String = row.get("raw_response_json");
    let references: String = row.get("references_json");
    Ok(ReconRecord {
        recon_id: row.get("recon_id"),
        use_case: row.get("use_case"),
        kb_id: row.get("kb_id"),
        batch_id: row.get("batch_id"),
        prompt: row.get("prompt"),
        model: row.get("model"),
        raw_response: serde_json::from_str(&raw).context("corrupt raw response")?,
        references: serde_json::from_str(&references).context("corrupt references")?,
        created_at: millis_to_datetime(row.get("created_at")),
    })
}

const RECON_COLUMNS: &str = "use_case, recon_id, kb_id, batch_id, prompt, model, \
                             raw_response_json, references_json, created_at";

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn put_file(&self, record: &FileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (use_case, file_id, storage_uri, object_key, sha256,
                               batch_id, meta_json, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.use_case)
        .bind(&record.file_id)
        .bind(&record.storage_uri)
        .bind(&record.object_key)
        .bind(&record.sha256)
        .bind(record.batch_id.as_str())
        .bind(serde_json::to_string(&record.meta)?)
        .bind(record.uploaded_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to record file {}", record.file_id))?;
        Ok(())
    }

    async fn put_fragment(&self, use_case: &str, fragment: &Fragment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fragments (use_case, fragment_id, batch_id, text, metadata_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(use_case)
        .bind(&fragment.id)
        .bind(fragment.batch_id())
        .bind(&fragment.text)
        .bind(serde_json::to_string(&fragment.metadata)?)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to record fragment {}", fragment.id))?;
        Ok(())
    }

    async fn put_recon(&self, record: &ReconRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO recons ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            RECON_COLUMNS
        ))
        .bind(&record.use_case)
        .bind(&record.recon_id)
        .bind(&record.kb_id)
        .bind(&record.batch_id)
        .bind(&record.prompt)
        .bind(&record.model)
        .bind(serde_json::to_string(&record.raw_response)?)
        .bind(serde_json::to_string(&record.references)?)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to record recon {}", record.recon_id))?;
        Ok(())
    }

    async fn list_recons(&self, use_case: &str, limit: usize) -> Result<Vec<ReconRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM recons WHERE use_case = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
            RECON_COLUMNS
        ))
        .bind(use_case)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(recon_from_row).collect()
    }

    async fn get_recon(&self, use_case: &str, recon_id: &str) -> Result<Option<ReconRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM recons WHERE use_case = ? AND recon_id = ?",
            RECON_COLUMNS
        ))
        .bind(use_case)
        .bind(recon_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(recon_from_row).transpose()
    }

    async fn purge_recons_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM recons WHERE created_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_batches_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let batches: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT batch_id FROM files WHERE uploaded_at < ?")
                .bind(cutoff.timestamp_millis())
                .fetch_all(&mut *tx)
                .await?;

        for batch_id in &batches {
            sqlx::query("DELETE FROM fragments WHERE batch_id = ?")
                .bind(batch_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM files WHERE batch_id = ?")
                .bind(batch_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(batches.len() as u64)
    }
}
