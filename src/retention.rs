//! Age-based pruning of reconciliation records and ingestion batches.
//!
//! Nothing is deleted unless `[retention]` sets an age. Only metadata
//! records are removed; stored objects are left to bucket lifecycle rules.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use recon_harness_core::services::MetadataStore;

use crate::config::{Config, RetentionConfig};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub recons_removed: u64,
    pub batches_removed: u64,
}

/// Apply `retention` relative to `now`.
pub async fn prune(
    store: &dyn MetadataStore,
    retention: &RetentionConfig,
    now: DateTime<Utc>,
) -> Result<PruneReport> {
    let mut report = PruneReport::default();

    if let Some(days) = retention.recon_days {
        let cutoff = now - Duration::days(i64::from(days));
        report.recons_removed = store.purge_recons_before(cutoff).await?;
        info!(%cutoff, removed = report.recons_removed, "pruned reconciliation records");
    }
    if let Some(days) = retention.batch_days {
        let cutoff = now - Duration::days(i64::from(days));
        report.batches_removed = store.purge_batches_before(cutoff).await?;
        info!(%cutoff, removed = report.batches_removed, "pruned ingestion batches");
    }

    Ok(report)
}

/// `recon prune`
pub async fn run_prune(config: &Config) -> Result<()> {
    let retention = &config.retention;
    if retention.recon_days.is_none() && retention.batch_days.is_none() {
        println!("No retention configured; nothing to prune.");
        return Ok(());
    }

    let pool = crate::db::connect(config).await?;
    crate::migrate::apply(&pool).await?;
    let store = crate::sqlite_store::SqliteMetadataStore::new(pool);
    let report = prune(&store, retention, Utc::now()).await?;

    println!("prune");
    println!("  reconciliation records removed: {}", report.recons_removed);
    println!("  batches removed: {}", report.batches_removed);
    Ok(())
}
