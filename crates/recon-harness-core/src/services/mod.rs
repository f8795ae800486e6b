//! Collaborator contracts.
//!
//! The coordinators never talk to a cloud SDK or database directly. They
//! receive a [`Services`] bundle at construction and call these traits,
//! which lets tests substitute the doubles in [`memory`].
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`ObjectStore`] | Durable put/get of source files and fragment objects |
//! | [`MetadataStore`] | Append-only file, fragment, and reconciliation records |
//! | [`KnowledgeBase`] | Rebuild trigger, rebuild status, retrieve-and-generate |
//! | [`DocumentAnalysis`] | Sync text detection and async document analysis |

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::analysis::{AnalysisResponse, FeatureType};
use crate::kb::{BuildStatus, RagRequest};
use crate::models::{FileRecord, Fragment, ReconRecord};
use crate::poll::Clock;

/// User metadata attached to a stored object.
pub type ObjectMetadata = BTreeMap<String, String>;

/// Key-addressed blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<()>;

    /// Fetch an object. A missing key is `Ok(None)`, not an error.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Append-only metadata index for files, fragments, and reconciliation
/// records, partitioned by use case.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn put_file(&self, record: &FileRecord) -> Result<()>;

    async fn put_fragment(&self, use_case: &str, fragment: &Fragment) -> Result<()>;

    async fn put_recon(&self, record: &ReconRecord) -> Result<()>;

    /// Most recent records first.
    async fn list_recons(&self, use_case: &str, limit: usize) -> Result<Vec<ReconRecord>>;

    async fn get_recon(&self, use_case: &str, recon_id: &str) -> Result<Option<ReconRecord>>;

    /// Delete reconciliation records created before `cutoff`. Returns the
    /// number removed.
    async fn purge_recons_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Delete file records uploaded before `cutoff` together with the
    /// fragment records of their batches. Returns the number of batches
    /// removed.
    async fn purge_batches_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Managed vector index with generation.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn start_build(&self, kb_id: &str) -> Result<BuildStatus>;

    async fn build_status(&self, kb_id: &str) -> Result<BuildStatus>;

    /// Returns the raw service response; callers normalize it through
    /// [`crate::kb`].
    async fn retrieve_and_generate(&self, request: &RagRequest) -> Result<Value>;
}

/// OCR / table-detection service.
#[async_trait]
pub trait DocumentAnalysis: Send + Sync {
    async fn detect_text(&self, document: &[u8]) -> Result<AnalysisResponse>;

    /// Submit an async job for a stored object. Returns the job id.
    async fn start_analysis(
        &self,
        bucket: &str,
        key: &str,
        features: &[FeatureType],
    ) -> Result<String>;

    async fn poll_analysis(&self, job_id: &str) -> Result<AnalysisResponse>;
}

/// Collaborator handles injected into the coordinators.
#[derive(Clone)]
pub struct Services {
    pub objects: Arc<dyn ObjectStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub knowledge_base: Arc<dyn KnowledgeBase>,
    pub analysis: Arc<dyn DocumentAnalysis>,
    pub clock: Arc<dyn Clock>,
}
