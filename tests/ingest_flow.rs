//! Ingestion coordinator against in-memory collaborators.
//!
//! Time is virtual: every wait runs on a `ManualClock`, so build and
//! analysis polling finish instantly while the coordinator still sees the
//! configured intervals.

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use zip::write::SimpleFileOptions;

use recon_harness::ingest::{
    IngestCoordinator, IngestRequest, IngestSettings, IngestStatus, WaitOptions,
};
use recon_harness_core::analysis::{AnalysisResponse, FeatureType};
use recon_harness_core::error::ReconError;
use recon_harness_core::models::{content_hash, meta, Fragment};
use recon_harness_core::poll::{ManualClock, PollConfig};
use recon_harness_core::services::memory::{
    InMemoryMetadataStore, InMemoryObjectStore, ScriptedAnalysis, ScriptedKnowledgeBase,
};
use recon_harness_core::services::Services;

const BUCKET: &str = "recon-docs";

struct Harness {
    objects: Arc<InMemoryObjectStore>,
    metadata: Arc<InMemoryMetadataStore>,
    kb: Arc<ScriptedKnowledgeBase>,
    analysis: Arc<ScriptedAnalysis>,
    clock: Arc<ManualClock>,
    coordinator: IngestCoordinator,
}

fn harness(build_statuses: &[&str], analysis: ScriptedAnalysis) -> Harness {
    let objects = Arc::new(InMemoryObjectStore::new());
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let kb = Arc::new(ScriptedKnowledgeBase::new(build_statuses, json!({})));
    let analysis = Arc::new(analysis);
    let clock = Arc::new(ManualClock::new());

    let services = Services {
        objects: objects.clone(),
        metadata: metadata.clone(),
        knowledge_base: kb.clone(),
        analysis: analysis.clone(),
        clock: clock.clone(),
    };
    let settings = IngestSettings {
        bucket: BUCKET.to_string(),
        features: vec![FeatureType::Tables, FeatureType::Forms],
        analysis_poll: PollConfig::new(Duration::from_secs(5), Some(Duration::from_secs(1800))),
    };

    Harness {
        objects,
        metadata,
        kb,
        analysis,
        clock,
        coordinator: IngestCoordinator::new(services, settings),
    }
}

fn no_analysis() -> ScriptedAnalysis {
    ScriptedAnalysis::new(AnalysisResponse::default(), vec![])
}

fn request(filename: &str, wait: Option<WaitOptions>) -> IngestRequest {
    IngestRequest {
        use_case: "payments".into(),
        kb_id: "KB1".into(),
        filename: filename.into(),
        uploader: "alice".into(),
        wait,
    }
}

fn wait(interval: u64, timeout: u64) -> Option<WaitOptions> {
    Some(WaitOptions {
        poll_interval: Duration::from_secs(interval),
        timeout: Duration::from_secs(timeout),
    })
}

const LEDGER_CSV: &[u8] = b"invoice,amount,currency\nINV-1,120.5,EUR\nINV-2,80,EUR\n,,\n";

#[tokio::test]
async fn csv_ingest_writes_rows_and_waits_for_build() {
    let h = harness(&["IN_PROGRESS", "COMPLETE"], no_analysis());

    let report = h
        .coordinator
        .ingest_bytes(&request("ledger.csv", wait(15, 600)), LEDGER_CSV)
        .await
        .unwrap();

    assert_eq!(report.status, IngestStatus::UploadedAndIndexed);
    assert_eq!(report.fragment_count, 3);
    assert!(report.batch_id.starts_with("batch-"));
    assert_eq!(report.sha256, content_hash(LEDGER_CSV));

    // One source file, three row objects, all under this batch.
    let keys = h.objects.keys(BUCKET);
    let incoming: Vec<_> = keys.iter().filter(|k| k.contains("/incoming/")).collect();
    let rows: Vec<_> = keys
        .iter()
        .filter(|k| k.contains("/structured_rows/"))
        .collect();
    assert_eq!(incoming.len(), 1);
    assert!(incoming[0].starts_with(&format!("usecase/payments/incoming/{}/", report.batch_id)));
    assert!(incoming[0].ends_with("-ledger.csv"));
    assert_eq!(rows.len(), 3);
    assert!(keys.iter().all(|k| !k.contains("/kb_chunks/")));

    let source_meta = h.objects.object_metadata(BUCKET, incoming[0]).unwrap();
    assert_eq!(source_meta["sha256"], report.sha256);
    assert_eq!(source_meta["uploaded_by"], "alice");
    assert_eq!(source_meta["batch_id"], report.batch_id);

    // The all-null last row still yields a fragment, with an empty object.
    let fragments = h.metadata.fragments("payments");
    assert_eq!(fragments.len(), 3);
    for (i, f) in fragments.iter().enumerate() {
        assert_eq!(f.batch_id(), Some(report.batch_id.as_str()));
        assert_eq!(f.metadata[meta::SHEET], json!("Sheet1"));
        assert_eq!(f.metadata[meta::ROW], json!(i));
    }
    assert_eq!(fragments[2].text, "{}");

    // Each stored row object is the fragment itself.
    let stored: Fragment = serde_json::from_slice(
        &recon_harness_core::services::ObjectStore::get(h.objects.as_ref(), BUCKET, rows[0])
            .await
            .unwrap()
            .unwrap(),
    )
    .unwrap();
    assert!(fragments.contains(&stored));

    assert_eq!(h.kb.builds_started(), vec!["KB1".to_string()]);
    assert_eq!(h.kb.status_polls(), 2);
    assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(15)]);

    let files = h.metadata.files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].storage_uri, report.file_uri);
    assert_eq!(files[0].meta["filename"], json!("ledger.csv"));
}

#[tokio::test]
async fn failed_build_is_fatal_on_first_poll() {
    let h = harness(&["FAILED"], no_analysis());

    let err = h
        .coordinator
        .ingest_bytes(&request("ledger.csv", wait(15, 600)), LEDGER_CSV)
        .await
        .unwrap_err();

    match err {
        ReconError::BuildFailed { status, payload } => {
            assert_eq!(status, "FAILED");
            assert_eq!(payload["status"], "FAILED");
        }
        other => panic!("expected BuildFailed, got {other:?}"),
    }
    assert_eq!(h.kb.status_polls(), 1);
    assert!(h.clock.sleeps().is_empty());
    // Fragments persisted before the trigger stay persisted.
    assert_eq!(h.metadata.fragments("payments").len(), 3);
}

#[tokio::test]
async fn build_that_never_settles_times_out() {
    let h = harness(&["IN_PROGRESS"], no_analysis());

    let err = h
        .coordinator
        .ingest_bytes(&request("ledger.csv", wait(15, 60)), LEDGER_CSV)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "timeout");
    match err {
        ReconError::Timeout { operation, elapsed, .. } => {
            assert_eq!(operation, "knowledge base build");
            assert!(elapsed > Duration::from_secs(60));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn without_wait_returns_after_trigger() {
    let h = harness(&[], no_analysis());

    let report = h
        .coordinator
        .ingest_bytes(&request("ledger.csv", None), LEDGER_CSV)
        .await
        .unwrap();

    assert_eq!(report.status, IngestStatus::UploadedAndSyncTriggered);
    assert_eq!(h.kb.builds_started().len(), 1);
    assert_eq!(h.kb.status_polls(), 0);
}

#[tokio::test]
async fn pdf_goes_through_async_analysis() {
    let table = AnalysisResponse::from_json(json!({
        "JobStatus": "SUCCEEDED",
        "Blocks": [
            {"Id": "l1", "BlockType": "LINE", "Page": 1, "Text": "Statement"},
            {"Id": "t1", "BlockType": "TABLE", "Page": 1,
             "Relationships": [{"Type": "CHILD", "Ids": ["c11", "c12", "c21", "c22"]}]},
            {"Id": "c11", "BlockType": "CELL", "Page": 1, "RowIndex": 1, "ColumnIndex": 1,
             "Relationships": [{"Type": "CHILD", "Ids": ["wA"]}]},
            {"Id": "c12", "BlockType": "CELL", "Page": 1, "RowIndex": 1, "ColumnIndex": 2,
             "Relationships": [{"Type": "CHILD", "Ids": ["wB"]}]},
            {"Id": "c21", "BlockType": "CELL", "Page": 1, "RowIndex": 2, "ColumnIndex": 1,
             "Relationships": [{"Type": "CHILD", "Ids": ["wC"]}]},
            {"Id": "c22", "BlockType": "CELL", "Page": 1, "RowIndex": 2, "ColumnIndex": 2,
             "Relationships": [{"Type": "CHILD", "Ids": ["wD"]}]},
            {"Id": "wA", "BlockType": "WORD", "Text": "A"},
            {"Id": "wB", "BlockType": "WORD", "Text": "B"},
            {"Id": "wC", "BlockType": "WORD", "Text": "C"},
            {"Id": "wD", "BlockType": "WORD", "Text": "D"}
        ]
    }))
    .unwrap();
    let pending = AnalysisResponse::from_json(json!({"JobStatus": "IN_PROGRESS"})).unwrap();
    let h = harness(
        &["COMPLETE"],
        ScriptedAnalysis::new(AnalysisResponse::default(), vec![pending, table]),
    );

    let report = h
        .coordinator
        .ingest_bytes(&request("statement.PDF", wait(15, 600)), b"%PDF-1.7")
        .await
        .unwrap();

    // 1 line + 2 rows + 4 cells
    assert_eq!(report.fragment_count, 7);

    let jobs = h.analysis.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].0, BUCKET);
    assert!(jobs[0].1.contains("/incoming/"));
    assert_eq!(jobs[0].2, vec![FeatureType::Tables, FeatureType::Forms]);
    assert_eq!(h.analysis.detect_calls(), 0);

    let texts: Vec<String> = h
        .metadata
        .fragments("payments")
        .into_iter()
        .map(|f| f.text)
        .collect();
    assert!(texts.contains(&"A | B".to_string()));
    assert!(texts.contains(&"C | D".to_string()));

    let chunk_keys = h
        .objects
        .keys(BUCKET)
        .into_iter()
        .filter(|k| k.contains("/kb_chunks/"))
        .count();
    assert_eq!(chunk_keys, 7);

    // One 5s analysis sleep; the build completed on its first poll.
    assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(5)]);
}

#[tokio::test]
async fn unknown_extension_uses_line_detection() {
    let detect = AnalysisResponse::from_json(json!({
        "Blocks": [
            {"Id": "p", "BlockType": "PAGE", "Page": 1},
            {"Id": "l1", "BlockType": "LINE", "Page": 1, "Text": "Total due 200.00"},
            {"Id": "l2", "BlockType": "LINE", "Page": 1, "Text": "Paid 150.00"}
        ]
    }))
    .unwrap();
    let h = harness(&[], ScriptedAnalysis::new(detect, vec![]));

    let report = h
        .coordinator
        .ingest_bytes(&request("notes.txt", None), b"Total due 200.00\nPaid 150.00\n")
        .await
        .unwrap();

    assert_eq!(report.fragment_count, 2);
    assert_eq!(h.analysis.detect_calls(), 1);
    assert!(h.analysis.jobs().is_empty());

    for f in h.metadata.fragments("payments") {
        assert_eq!(f.source_uri(), Some(report.file_uri.as_str()));
        assert!(f.metadata.get(meta::PAGE).is_none());
    }
}

fn pptx_fixture() -> Vec<u8> {
    let slide = r#"<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:spTree>
<p:sp><p:txBody><a:p><a:r><a:t>Q3 close</a:t></a:r></a:p></p:txBody></p:sp>
<p:graphicFrame><a:graphic><a:graphicData><a:tbl>
<a:tr><a:tc><a:txBody><a:p><a:r><a:t>Entity</a:t></a:r></a:p></a:txBody></a:tc><a:tc><a:txBody><a:p><a:r><a:t>Balance</a:t></a:r></a:p></a:txBody></a:tc></a:tr>
</a:tbl></a:graphicData></a:graphic></p:graphicFrame>
</p:spTree></p:cSld></p:sld>"#;

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        zip.start_file("ppt/slides/slide1.xml", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(slide.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

#[tokio::test]
async fn slide_deck_produces_table_and_slide_fragments() {
    let h = harness(&[], no_analysis());

    let report = h
        .coordinator
        .ingest_bytes(&request("close.pptx", None), &pptx_fixture())
        .await
        .unwrap();

    // 2 cells + 1 row + 1 slide text
    assert_eq!(report.fragment_count, 4);
    let fragments = h.metadata.fragments("payments");
    let slide_text = fragments.last().unwrap();
    assert_eq!(slide_text.text, "Q3 close");
    assert_eq!(slide_text.metadata[meta::SLIDE], json!(1));
    assert!(fragments.iter().any(|f| f.text == "Entity | Balance"));
}

#[tokio::test]
async fn same_bytes_under_two_names_share_hash_not_key() {
    let h = harness(&[], no_analysis());

    let a = h
        .coordinator
        .ingest_bytes(&request("ledger.csv", None), LEDGER_CSV)
        .await
        .unwrap();
    let b = h
        .coordinator
        .ingest_bytes(&request("ledger-copy.csv", None), LEDGER_CSV)
        .await
        .unwrap();

    assert_eq!(a.sha256, b.sha256);
    assert_ne!(a.file_uri, b.file_uri);
    assert_ne!(a.batch_id, b.batch_id);

    let files = h.metadata.files();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].sha256, files[1].sha256);
    assert_ne!(files[0].object_key, files[1].object_key);
}

#[tokio::test]
async fn legacy_xls_is_rejected_after_upload() {
    let h = harness(&[], no_analysis());

    let err = h
        .coordinator
        .ingest_bytes(&request("old.xls", None), b"\xD0\xCF\x11\xE0 not a zip")
        .await
        .unwrap_err();

    assert_eq!(err.code(), "bad_request");
    assert!(h.kb.builds_started().is_empty());
    assert_eq!(h.metadata.files().len(), 1);
}
