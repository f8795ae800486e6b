//! SQLite metadata store on a temporary database file.

use chrono::{Duration, Utc};
use serde_json::json;
use tempfile::TempDir;

use recon_harness::db;
use recon_harness::migrate;
use recon_harness::sqlite_store::SqliteMetadataStore;
use recon_harness_core::models::{
    content_hash, new_id, BatchId, FileRecord, Fragment, Metadata, MetadataBuilder, ReconRecord,
    Reference,
};
use recon_harness_core::services::MetadataStore;

async fn store(tmp: &TempDir) -> SqliteMetadataStore {
    let pool = db::connect_path(&tmp.path().join("data/recon.sqlite"))
        .await
        .unwrap();
    migrate::apply(&pool).await.unwrap();
    // Applying twice is harmless.
    migrate::apply(&pool).await.unwrap();
    SqliteMetadataStore::new(pool)
}

fn file(batch: &BatchId, name: &str, bytes: &[u8], age_days: i64) -> FileRecord {
    let mut meta = Metadata::new();
    meta.insert("filename".into(), json!(name));
    FileRecord {
        use_case: "payments".into(),
        file_id: new_id(),
        storage_uri: format!("s3://recon-docs/usecase/payments/incoming/{}/1-{}", batch, name),
        object_key: format!("usecase/payments/incoming/{}/1-{}", batch, name),
        sha256: content_hash(bytes),
        batch_id: batch.clone(),
        meta,
        uploaded_at: Utc::now() - Duration::days(age_days),
    }
}

fn fragment(batch: &BatchId, text: &str) -> Fragment {
    let mut f = Fragment::new(
        text,
        MetadataBuilder::new("s3://recon-docs/x").with("page", 1).build(),
    );
    f.stamp_batch(batch);
    f
}

fn recon(id: &str, age_minutes: i64) -> ReconRecord {
    ReconRecord {
        recon_id: id.into(),
        use_case: "payments".into(),
        kb_id: "KB1".into(),
        batch_id: Some("batch-aaaa1111".into()),
        prompt: "User Query:\nq".into(),
        model: Some("model-arn".into()),
        raw_response: json!({"output": {"text": "answer"}}),
        references: vec![Reference {
            fragment_id: Some("frag-1".into()),
            metadata: MetadataBuilder::new("s3://recon-docs/x").with("row", 2).build(),
        }],
        created_at: Utc::now() - Duration::minutes(age_minutes),
    }
}

#[tokio::test]
async fn file_records_round_trip() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp).await;
    let batch = BatchId::generate();

    let a = file(&batch, "ledger.csv", b"same bytes", 0);
    let b = file(&BatchId::generate(), "copy.csv", b"same bytes", 0);
    store.put_file(&a).await.unwrap();
    store.put_file(&b).await.unwrap();

    let files = store.list_files("payments").await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].sha256, files[1].sha256);
    assert_ne!(files[0].object_key, files[1].object_key);
    assert_eq!(files[0].batch_id, batch);
    assert_eq!(files[0].meta["filename"], json!("ledger.csv"));
    assert_eq!(
        files[0].uploaded_at.timestamp_millis(),
        a.uploaded_at.timestamp_millis()
    );
}

#[tokio::test]
async fn recons_list_newest_first_and_replay() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp).await;

    store.put_recon(&recon("r-old", 30)).await.unwrap();
    store.put_recon(&recon("r-new", 1)).await.unwrap();
    store.put_recon(&recon("r-mid", 10)).await.unwrap();

    let listed = store.list_recons("payments", 10).await.unwrap();
    let ids: Vec<_> = listed.iter().map(|r| r.recon_id.as_str()).collect();
    assert_eq!(ids, vec!["r-new", "r-mid", "r-old"]);
    assert_eq!(store.list_recons("payments", 1).await.unwrap().len(), 1);

    let replay = store.get_recon("payments", "r-mid").await.unwrap().unwrap();
    assert_eq!(replay.raw_response, json!({"output": {"text": "answer"}}));
    assert_eq!(replay.references[0].fragment_id.as_deref(), Some("frag-1"));
    assert_eq!(replay.references[0].metadata["row"], json!(2));
    assert!(store.get_recon("other", "r-mid").await.unwrap().is_none());
}

#[tokio::test]
async fn purges_respect_cutoff() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp).await;

    let old_batch = BatchId::generate();
    let new_batch = BatchId::generate();
    store.put_file(&file(&old_batch, "old.csv", b"1", 90)).await.unwrap();
    store.put_file(&file(&new_batch, "new.csv", b"2", 1)).await.unwrap();
    for text in ["a", "b"] {
        store.put_fragment("payments", &fragment(&old_batch, text)).await.unwrap();
    }
    store.put_fragment("payments", &fragment(&new_batch, "c")).await.unwrap();

    let cutoff = Utc::now() - Duration::days(30);
    assert_eq!(store.purge_batches_before(cutoff).await.unwrap(), 1);
    assert_eq!(store.count_fragments(old_batch.as_str()).await.unwrap(), 0);
    assert_eq!(store.count_fragments(new_batch.as_str()).await.unwrap(), 1);
    assert_eq!(store.list_files("payments").await.unwrap().len(), 1);

    store.put_recon(&recon("r-old", 60 * 24 * 40)).await.unwrap();
    store.put_recon(&recon("r-new", 5)).await.unwrap();
    assert_eq!(store.purge_recons_before(cutoff).await.unwrap(), 1);
    let left = store.list_recons("payments", 10).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].recon_id, "r-new");
}
