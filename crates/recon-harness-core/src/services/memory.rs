//! In-memory collaborators for tests and offline runs.
//!
//! Uses `HashMap` and `Vec` behind `std::sync` locks. The scripted
//! knowledge base and analysis service replay queued responses and record
//! every call so tests can assert on what the coordinators sent.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::analysis::{AnalysisResponse, FeatureType};
use crate::kb::{BuildStatus, RagRequest};
use crate::models::{FileRecord, Fragment, ReconRecord};

use super::{DocumentAnalysis, KnowledgeBase, MetadataStore, ObjectMetadata, ObjectStore};

// ═══════════════════════════════════════════════════════════════════════
// Object store
// ═══════════════════════════════════════════════════════════════════════

struct StoredObject {
    body: Vec<u8>,
    metadata: ObjectMetadata,
}

/// Object store keyed by `(bucket, key)`.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    gets: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys in a bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let objects = self.objects.read().unwrap();
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn object_metadata(&self, bucket: &str, key: &str) -> Option<ObjectMetadata> {
        let objects = self.objects.read().unwrap();
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.metadata.clone())
    }

    /// Number of `get` calls served so far.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        let mut objects = self.objects.write().unwrap();
        objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body: body.to_vec(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.read().unwrap();
        Ok(objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.body.clone()))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Metadata store
// ═══════════════════════════════════════════════════════════════════════

/// Metadata store holding records in insertion order.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    files: RwLock<Vec<FileRecord>>,
    fragments: RwLock<Vec<(String, Fragment)>>,
    recons: RwLock<Vec<ReconRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> Vec<FileRecord> {
        self.files.read().unwrap().clone()
    }

    pub fn fragments(&self, use_case: &str) -> Vec<Fragment> {
        self.fragments
            .read()
            .unwrap()
            .iter()
            .filter(|(uc, _)| uc == use_case)
            .map(|(_, f)| f.clone())
            .collect()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn put_file(&self, record: &FileRecord) -> Result<()> {
        self.files.write().unwrap().push(record.clone());
        Ok(())
    }

    async fn put_fragment(&self, use_case: &str, fragment: &Fragment) -> Result<()> {
        self.fragments
            .write()
            .unwrap()
            .push((use_case.to_string(), fragment.clone()));
        Ok(())
    }

    async fn put_recon(&self, record: &ReconRecord) -> Result<()> {
        self.recons.write().unwrap().push(record.clone());
        Ok(())
    }

    async fn list_recons(&self, use_case: &str, limit: usize) -> Result<Vec<ReconRecord>> {
        let recons = self.recons.read().unwrap();
        // Newest insertion first, then a stable sort keeps that order on ties.
        let mut matching: Vec<ReconRecord> = recons
            .iter()
            .rev()
            .filter(|r| r.use_case == use_case)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn get_recon(&self, use_case: &str, recon_id: &str) -> Result<Option<ReconRecord>> {
        let recons = self.recons.read().unwrap();
        Ok(recons
            .iter()
            .find(|r| r.use_case == use_case && r.recon_id == recon_id)
            .cloned())
    }

    async fn purge_recons_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut recons = self.recons.write().unwrap();
        let before = recons.len();
        recons.retain(|r| r.created_at >= cutoff);
        Ok((before - recons.len()) as u64)
    }

    async fn purge_batches_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut files = self.files.write().unwrap();
        let expired: HashSet<String> = files
            .iter()
            .filter(|f| f.uploaded_at < cutoff)
            .map(|f| f.batch_id.to_string())
            .collect();
        files.retain(|f| !expired.contains(f.batch_id.as_str()));
        self.fragments
            .write()
            .unwrap()
            .retain(|(_, f)| f.batch_id().map_or(true, |b| !expired.contains(b)));
        Ok(expired.len() as u64)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Knowledge base
// ═══════════════════════════════════════════════════════════════════════

/// Knowledge base that replays queued build statuses.
///
/// When the queue runs dry `build_status` keeps returning the last status
/// it served, so a single `IN_PROGRESS` entry simulates a build that never
/// finishes.
pub struct ScriptedKnowledgeBase {
    statuses: Mutex<VecDeque<BuildStatus>>,
    last_status: Mutex<Option<BuildStatus>>,
    response: Value,
    builds_started: Mutex<Vec<String>>,
    status_polls: AtomicUsize,
    requests: Mutex<Vec<RagRequest>>,
}

impl ScriptedKnowledgeBase {
    /// Build statuses are given as raw status strings, e.g. `"COMPLETE"`.
    pub fn new(statuses: &[&str], response: Value) -> Self {
        Self {
            statuses: Mutex::new(
                statuses
                    .iter()
                    .map(|s| BuildStatus::from_response(json!({ "status": s })))
                    .collect(),
            ),
            last_status: Mutex::new(None),
            response,
            builds_started: Mutex::new(Vec::new()),
            status_polls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn builds_started(&self) -> Vec<String> {
        self.builds_started.lock().unwrap().clone()
    }

    pub fn status_polls(&self) -> usize {
        self.status_polls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RagRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeBase for ScriptedKnowledgeBase {
    async fn start_build(&self, kb_id: &str) -> Result<BuildStatus> {
        self.builds_started.lock().unwrap().push(kb_id.to_string());
        Ok(BuildStatus::from_response(json!({ "status": "STARTING" })))
    }

    async fn build_status(&self, _kb_id: &str) -> Result<BuildStatus> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        let next = self.statuses.lock().unwrap().pop_front();
        let mut last = self.last_status.lock().unwrap();
        if let Some(status) = next {
            *last = Some(status);
        }
        last.clone()
            .ok_or_else(|| anyhow!("no build status scripted"))
    }

    async fn retrieve_and_generate(&self, request: &RagRequest) -> Result<Value> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.response.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Document analysis
// ═══════════════════════════════════════════════════════════════════════

/// Analysis service returning canned responses.
pub struct ScriptedAnalysis {
    detect: AnalysisResponse,
    polls: Mutex<VecDeque<AnalysisResponse>>,
    jobs: Mutex<Vec<(String, String, Vec<FeatureType>)>>,
    detect_calls: AtomicUsize,
}

impl ScriptedAnalysis {
    /// `detect` answers every `detect_text`; `polls` answer successive
    /// `poll_analysis` calls.
    pub fn new(detect: AnalysisResponse, polls: Vec<AnalysisResponse>) -> Self {
        Self {
            detect,
            polls: Mutex::new(polls.into_iter().collect()),
            jobs: Mutex::new(Vec::new()),
            detect_calls: AtomicUsize::new(0),
        }
    }

    /// `(bucket, key, features)` of every submitted job.
    pub fn jobs(&self) -> Vec<(String, String, Vec<FeatureType>)> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentAnalysis for ScriptedAnalysis {
    async fn detect_text(&self, _document: &[u8]) -> Result<AnalysisResponse> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.detect.clone())
    }

    async fn start_analysis(
        &self,
        bucket: &str,
        key: &str,
        features: &[FeatureType],
    ) -> Result<String> {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push((bucket.to_string(), key.to_string(), features.to_vec()));
        Ok(format!("job-{}", jobs.len()))
    }

    async fn poll_analysis(&self, job_id: &str) -> Result<AnalysisResponse> {
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no analysis response scripted for {}", job_id))
    }
}
