//! Ingestion coordinator.
//!
//! One call ingests one file as one batch:
//!
//! 1. generate a batch id
//! 2. store the source file under `usecase/<uc>/incoming/<batch>/` and
//!    record its hash in the metadata store
//! 3. extract fragments with the extractor chosen by file extension
//! 4. stamp and persist every fragment (one object each, plus an index entry)
//! 5. trigger a knowledge-base rebuild and optionally wait for it
//!
//! Writes are not transactional. A failure part-way leaves whatever was
//! already persisted; re-running ingests a new batch.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use recon_harness_core::analysis::{analyze_stored_document, FeatureType};
use recon_harness_core::error::ReconError;
use recon_harness_core::extract::tabular::TabularSource;
use recon_harness_core::extract::{lines, ocr, slides, tabular, FileKind};
use recon_harness_core::kb::BuildStatus;
use recon_harness_core::models::keys::{self, FragmentArea};
use recon_harness_core::models::{content_hash, new_id, BatchId, FileRecord, Fragment, Metadata};
use recon_harness_core::poll::{PollConfig, PollOutcome, Poller};
use recon_harness_core::services::{ObjectMetadata, Services};

use crate::config::Config;

/// Deployment settings the coordinator needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub bucket: String,
    pub features: Vec<FeatureType>,
    pub analysis_poll: PollConfig,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bucket: config.storage.bucket.clone(),
            features: config.analysis.feature_types.clone(),
            analysis_poll: config.analysis.poll_config(),
        }
    }
}

/// How long to wait for the rebuild, and how often to ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub use_case: String,
    pub kb_id: String,
    pub filename: String,
    pub uploader: String,
    /// `None` returns as soon as the rebuild is triggered.
    pub wait: Option<WaitOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Rebuild triggered, not awaited.
    UploadedAndSyncTriggered,
    /// Rebuild finished successfully.
    UploadedAndIndexed,
}

impl IngestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestStatus::UploadedAndSyncTriggered => "uploaded_and_sync_triggered",
            IngestStatus::UploadedAndIndexed => "uploaded_and_indexed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub status: IngestStatus,
    pub batch_id: String,
    pub fragment_count: usize,
    pub file_uri: String,
    pub sha256: String,
}

/// Where the source file of a batch landed.
struct StoredSource {
    key: String,
    uri: String,
    sha256: String,
}

pub struct IngestCoordinator {
    services: Services,
    settings: IngestSettings,
}

impl IngestCoordinator {
    pub fn new(services: Services, settings: IngestSettings) -> Self {
        Self { services, settings }
    }

    /// Ingest the file at `file_path`.
    pub async fn ingest(
        &self,
        request: &IngestRequest,
        file_path: &Path,
    ) -> Result<IngestReport, ReconError> {
        let bytes = tokio::fs::read(file_path).await?;
        self.ingest_bytes(request, &bytes).await
    }

    /// Ingest an in-memory file.
    pub async fn ingest_bytes(
        &self,
        request: &IngestRequest,
        bytes: &[u8],
    ) -> Result<IngestReport, ReconError> {
        let filename = sanitize_filename(&request.filename)?;
        let batch_id = BatchId::generate();
        info!(
            use_case = %request.use_case,
            batch_id = %batch_id,
            filename,
            bytes = bytes.len(),
            "ingest started"
        );

        let source = self
            .store_source(request, filename, &batch_id, bytes)
            .await?;

        let (area, mut fragments) = self
            .extract(request, filename, &batch_id, &source, bytes)
            .await?;
        info!(batch_id = %batch_id, fragments = fragments.len(), "fragments extracted");

        for fragment in &mut fragments {
            fragment.stamp_batch(&batch_id);
            self.persist_fragment(&request.use_case, area, &batch_id, fragment)
                .await?;
        }

        let started = self
            .services
            .knowledge_base
            .start_build(&request.kb_id)
            .await?;
        info!(kb_id = %request.kb_id, status = %started.status, "knowledge base rebuild triggered");

        let status = match request.wait {
            Some(wait) => {
                self.wait_for_build(&request.kb_id, wait).await?;
                IngestStatus::UploadedAndIndexed
            }
            None => IngestStatus::UploadedAndSyncTriggered,
        };

        Ok(IngestReport {
            status,
            batch_id: batch_id.to_string(),
            fragment_count: fragments.len(),
            file_uri: source.uri,
            sha256: source.sha256,
        })
    }

    async fn store_source(
        &self,
        request: &IngestRequest,
        filename: &str,
        batch_id: &BatchId,
        bytes: &[u8],
    ) -> Result<StoredSource, ReconError> {
        let bucket = &self.settings.bucket;
        let now = Utc::now();
        let key = keys::incoming_key(
            &request.use_case,
            batch_id.as_str(),
            now.timestamp(),
            filename,
        );
        let sha256 = content_hash(bytes);

        let mut object_meta = ObjectMetadata::new();
        object_meta.insert("sha256".to_string(), sha256.clone());
        object_meta.insert("uploaded_by".to_string(), request.uploader.clone());
        object_meta.insert("batch_id".to_string(), batch_id.to_string());
        self.services
            .objects
            .put(bucket, &key, bytes, &object_meta)
            .await?;

        let uri = keys::s3_uri(bucket, &key);
        let mut meta = Metadata::new();
        meta.insert("uploaded_by".into(), Value::String(request.uploader.clone()));
        meta.insert("filename".into(), Value::String(filename.to_string()));
        self.services
            .metadata
            .put_file(&FileRecord {
                use_case: request.use_case.clone(),
                file_id: new_id(),
                storage_uri: uri.clone(),
                object_key: key.clone(),
                sha256: sha256.clone(),
                batch_id: batch_id.clone(),
                meta,
                uploaded_at: now,
            })
            .await?;
        info!(%uri, %sha256, "source file stored");

        Ok(StoredSource { key, uri, sha256 })
    }

    async fn extract(
        &self,
        request: &IngestRequest,
        filename: &str,
        batch_id: &BatchId,
        source: &StoredSource,
        bytes: &[u8],
    ) -> Result<(FragmentArea, Vec<Fragment>), ReconError> {
        let kind = FileKind::from_filename(filename);
        debug!(?kind, filename, "extractor selected");

        match kind {
            FileKind::Ocr => {
                let response = analyze_stored_document(
                    self.services.analysis.as_ref(),
                    self.services.clock.as_ref(),
                    &self.settings.bucket,
                    &source.key,
                    &self.settings.features,
                    self.settings.analysis_poll,
                )
                .await?;
                Ok((
                    FragmentArea::KbChunks,
                    ocr::extract_fragments(&response, &source.uri),
                ))
            }
            FileKind::Slides => {
                let deck = slides::parse(bytes)?;
                Ok((
                    FragmentArea::KbChunks,
                    slides::extract_fragments(&deck, &source.uri),
                ))
            }
            FileKind::Tabular(format) => {
                let workbook = tabular::parse(bytes, format)?;
                let target = TabularSource {
                    folder_uri: keys::incoming_folder_uri(
                        &self.settings.bucket,
                        &request.use_case,
                        batch_id.as_str(),
                    ),
                    file_uri: source.uri.clone(),
                };
                Ok((
                    FragmentArea::StructuredRows,
                    tabular::extract_fragments(&workbook, &target),
                ))
            }
            FileKind::PlainText => {
                let response = self.services.analysis.detect_text(bytes).await?;
                Ok((
                    FragmentArea::KbChunks,
                    lines::extract_fragments(&response, &source.uri),
                ))
            }
        }
    }

    async fn persist_fragment(
        &self,
        use_case: &str,
        area: FragmentArea,
        batch_id: &BatchId,
        fragment: &Fragment,
    ) -> Result<(), ReconError> {
        let key = keys::fragment_key(area, use_case, batch_id.as_str(), &fragment.id);
        let body = serde_json::to_vec(fragment)?;
        self.services
            .objects
            .put(&self.settings.bucket, &key, &body, &ObjectMetadata::new())
            .await?;
        self.services.metadata.put_fragment(use_case, fragment).await?;
        Ok(())
    }

    /// Poll the rebuild until it settles. A failed build or an exhausted
    /// budget is fatal.
    async fn wait_for_build(&self, kb_id: &str, wait: WaitOptions) -> Result<BuildStatus, ReconError> {
        let kb = self.services.knowledge_base.as_ref();
        let mut poller = Poller::new(
            self.services.clock.as_ref(),
            PollConfig::new(wait.poll_interval, Some(wait.timeout)),
            "knowledge base build",
        );
        let outcome = poller
            .run(move || async move {
                let status = kb.build_status(kb_id).await?;
                Ok::<_, anyhow::Error>((status.poll_state(), status))
            })
            .await?;

        match outcome {
            PollOutcome::Succeeded(status) => {
                info!(kb_id, status = %status.status, polls = poller.attempts(), "knowledge base rebuild finished");
                Ok(status)
            }
            PollOutcome::Failed(status) => Err(ReconError::BuildFailed {
                status: status.status,
                payload: status.raw,
            }),
        }
    }
}

/// Last path component of an uploaded name.
fn sanitize_filename(name: &str) -> Result<&str, ReconError> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if base.is_empty() || base == "." || base == ".." {
        return Err(ReconError::InvalidInput(format!("invalid filename: {:?}", name)));
    }
    Ok(base)
}

// ============ CLI ============

/// `recon ingest`: ingest one local file and print a summary.
pub async fn run_ingest(
    config: &Config,
    use_case: &str,
    kb_id: Option<String>,
    file_path: &Path,
    filename: Option<String>,
    uploader: &str,
    no_wait: bool,
) -> anyhow::Result<()> {
    let kb_id = config.knowledge_base.resolve_kb_id(kb_id)?;
    let filename = match filename {
        Some(name) => name,
        None => file_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("cannot derive a filename from {}", file_path.display()))?,
    };

    let wait = (config.knowledge_base.wait_for_build && !no_wait).then(|| WaitOptions {
        poll_interval: config.knowledge_base.poll_interval(),
        timeout: config.knowledge_base.timeout(),
    });

    let services = crate::backends::connect_services(config).await?;
    let coordinator = IngestCoordinator::new(services, IngestSettings::from_config(config));
    let report = coordinator
        .ingest(
            &IngestRequest {
                use_case: use_case.to_string(),
                kb_id,
                filename,
                uploader: uploader.to_string(),
                wait,
            },
            file_path,
        )
        .await?;

    println!("ingest {}", file_path.display());
    println!("  batch: {}", report.batch_id);
    println!("  stored: {}", report.file_uri);
    println!("  sha256: {}", report.sha256);
    println!("  fragments: {}", report.fragment_count);
    println!("  status: {}", report.status.as_str());
    Ok(())
}
