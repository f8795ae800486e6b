//! Wires configured collaborators into a [`Services`] bundle.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use recon_harness_core::services::{ObjectStore, Services};

use crate::aws::AwsClient;
use crate::bedrock::BedrockKnowledgeBase;
use crate::clock::TokioClock;
use crate::config::{Config, StorageConfig};
use crate::db;
use crate::migrate;
use crate::object_store::{LocalObjectStore, S3ObjectStore, ServerSideEncryption};
use crate::sqlite_store::SqliteMetadataStore;
use crate::textract::TextractClient;

/// Open the metadata database (applying the schema if needed) and build
/// every collaborator from `config`. AWS credentials are read from the
/// environment.
pub async fn connect_services(config: &Config) -> Result<Services> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let aws = AwsClient::from_env()?;
    let objects = object_store(&config.storage, &aws)?;
    info!(
        backend = %config.storage.backend,
        bucket = %config.storage.bucket,
        db = %config.db.path.display(),
        "services ready"
    );

    Ok(Services {
        objects,
        metadata: Arc::new(SqliteMetadataStore::new(pool)),
        knowledge_base: Arc::new(BedrockKnowledgeBase::new(
            aws.clone(),
            &config.knowledge_base,
        )),
        analysis: Arc::new(TextractClient::new(aws, &config.analysis)),
        clock: Arc::new(TokioClock),
    })
}

fn object_store(storage: &StorageConfig, aws: &AwsClient) -> Result<Arc<dyn ObjectStore>> {
    match storage.backend.as_str() {
        "local" => {
            let root = storage
                .root
                .as_ref()
                .context("storage.root must be set when backend is 'local'")?;
            Ok(Arc::new(LocalObjectStore::new(root)))
        }
        _ => {
            let sse = if storage.sse.trim().is_empty() {
                None
            } else {
                Some(ServerSideEncryption {
                    algorithm: storage.sse.clone(),
                    kms_key_id: storage.kms_key_id.clone(),
                })
            };
            Ok(Arc::new(S3ObjectStore::new(
                aws.clone(),
                &storage.region,
                storage.endpoint_url.clone(),
                sse,
            )))
        }
    }
}
