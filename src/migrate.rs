use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the metadata schema. Idempotent.
///
/// Timestamps are Unix milliseconds so records created within the same
/// second still order correctly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per uploaded source file
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            use_case TEXT NOT NULL,
            file_id TEXT NOT NULL,
            storage_uri TEXT NOT NULL,
            object_key TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            batch_id TEXT NOT NULL,
            meta_json TEXT NOT NULL DEFAULT '{}',
            uploaded_at INTEGER NOT NULL,
            PRIMARY KEY (use_case, file_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per persisted fragment
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fragments (
            use_case TEXT NOT NULL,
            fragment_id TEXT NOT NULL,
            batch_id TEXT,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            PRIMARY KEY (use_case, fragment_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per reconciliation query
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recons (
            use_case TEXT NOT NULL,
            recon_id TEXT NOT NULL,
            kb_id TEXT NOT NULL,
            batch_id TEXT,
            prompt TEXT NOT NULL,
            model TEXT,
            raw_response_json TEXT NOT NULL,
            references_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            PRIMARY KEY (use_case, recon_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_batch ON files(batch_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_fragments_batch ON fragments(batch_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_recons_use_case_created ON recons(use_case, created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
