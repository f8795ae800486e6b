//! [`ObjectStore`] backends: Amazon S3 (or an S3-compatible service) and a
//! local directory tree.
//!
//! # S3
//!
//! Objects are written and read with signed `PutObject` / `GetObject`
//! requests (see [`crate::aws`]). Against AWS the virtual-hosted style
//! `<bucket>.s3.<region>.amazonaws.com` is used; a custom `endpoint_url`
//! (MinIO, LocalStack) switches to path-style addressing. User metadata
//! travels as `x-amz-meta-*` headers, and the configured server-side
//! encryption is requested on every upload.
//!
//! # Local
//!
//! `<root>/<bucket>/<key>`, with user metadata in a `<key>.meta.json`
//! sidecar. Intended for development and tests.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use tracing::debug;

use recon_harness_core::services::{ObjectMetadata, ObjectStore};

use crate::aws::{encode_path, uri_encode, AwsClient, AwsEndpoint};

/// Server-side encryption requested on upload.
#[derive(Debug, Clone)]
pub struct ServerSideEncryption {
    /// `aws:kms` or `AES256`.
    pub algorithm: String,
    pub kms_key_id: Option<String>,
}

pub struct S3ObjectStore {
    client: AwsClient,
    region: String,
    endpoint_url: Option<String>,
    sse: Option<ServerSideEncryption>,
}

impl S3ObjectStore {
    pub fn new(
        client: AwsClient,
        region: &str,
        endpoint_url: Option<String>,
        sse: Option<ServerSideEncryption>,
    ) -> Self {
        Self {
            client,
            region: region.to_string(),
            endpoint_url,
            sse,
        }
    }

    /// User metadata plus encryption headers for a PutObject. Encryption
    /// applies to every object, source files and fragment records alike.
    fn put_headers(&self, metadata: &ObjectMetadata) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = metadata
            .iter()
            .map(|(k, v)| (format!("x-amz-meta-{}", k.to_ascii_lowercase()), header_safe(v)))
            .collect();
        if let Some(ref sse) = self.sse {
            headers.push((
                "x-amz-server-side-encryption".to_string(),
                sse.algorithm.clone(),
            ));
            if let Some(ref key_id) = sse.kms_key_id {
                headers.push((
                    "x-amz-server-side-encryption-aws-kms-key-id".to_string(),
                    key_id.clone(),
                ));
            }
        }
        headers
    }

    /// Endpoint and request path for an object.
    fn locate(&self, bucket: &str, key: &str) -> (AwsEndpoint, String) {
        match self.endpoint_url {
            Some(ref url) => (
                AwsEndpoint::new("s3", &self.region, Some(url), ""),
                format!("/{}/{}", uri_encode(bucket), encode_path(key)),
            ),
            None => (
                AwsEndpoint::new(
                    "s3",
                    &self.region,
                    None,
                    &format!("{}.s3.{}.amazonaws.com", bucket, self.region),
                ),
                format!("/{}", encode_path(key)),
            ),
        }
    }
}

/// Header values must be visible ASCII; anything else is percent-encoded.
fn header_safe(value: &str) -> String {
    if value.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        value.to_string()
    } else {
        uri_encode(value)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        let (endpoint, path) = self.locate(bucket, key);
        let headers = self.put_headers(metadata);

        self.client
            .send_checked(
                &endpoint,
                Method::PUT,
                &path,
                &[],
                &headers,
                body.to_vec(),
                &format!("S3 PutObject s3://{}/{}", bucket, key),
            )
            .await?;
        debug!(bucket, key, bytes = body.len(), "object stored");
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let (endpoint, path) = self.locate(bucket, key);
        let resp = self
            .client
            .send(&endpoint, Method::GET, &path, &[], &[], Vec::new())
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!(
                "S3 GetObject failed (HTTP {}) for s3://{}/{}",
                resp.status(),
                bucket,
                key
            );
        }
        Ok(Some(resp.bytes().await?.to_vec()))
    }
}

/// Directory-backed object store.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(bucket).join(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid object location: {}/{}", bucket, key);
        }
        Ok(self.root.join(relative))
    }

    /// Stored user metadata of an object, if any.
    pub async fn metadata(&self, bucket: &str, key: &str) -> Result<Option<ObjectMetadata>> {
        let path = sidecar_path(&self.object_path(bucket, key)?);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }
}

fn sidecar_path(object: &Path) -> PathBuf {
    let mut name = object.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !metadata.is_empty() {
            tokio::fs::write(sidecar_path(&path), serde_json::to_vec(metadata)?).await?;
        }
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_round_trip_with_metadata() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path());
        let mut meta = ObjectMetadata::new();
        meta.insert("sha256".into(), "abc".into());

        store
            .put("docs", "usecase/pay/incoming/batch-1/1-a.csv", b"a,b\n", &meta)
            .await
            .unwrap();

        let body = store
            .get("docs", "usecase/pay/incoming/batch-1/1-a.csv")
            .await
            .unwrap();
        assert_eq!(body.as_deref(), Some(&b"a,b\n"[..]));
        let stored = store
            .metadata("docs", "usecase/pay/incoming/batch-1/1-a.csv")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["sha256"], "abc");
    }

    #[tokio::test]
    async fn local_missing_is_none_and_traversal_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path());
        assert!(store.get("docs", "nope.json").await.unwrap().is_none());
        assert!(store.get("docs", "../escape").await.is_err());
        assert!(store
            .put("docs", "/etc/passwd", b"x", &ObjectMetadata::new())
            .await
            .is_err());
    }

    #[test]
    fn s3_addressing_styles() {
        let creds = crate::aws::AwsCredentials {
            access_key_id: "a".into(),
            secret_access_key: "b".into(),
            session_token: None,
        };
        let aws = S3ObjectStore::new(AwsClient::new(creds.clone()), "eu-west-1", None, None);
        let (endpoint, path) = aws.locate("docs", "usecase/u/a b.pdf");
        assert_eq!(endpoint.host(), "docs.s3.eu-west-1.amazonaws.com");
        assert_eq!(path, "/usecase/u/a%20b.pdf");

        let minio = S3ObjectStore::new(
            AwsClient::new(creds),
            "us-east-1",
            Some("http://localhost:9000".into()),
            None,
        );
        let (endpoint, path) = minio.locate("docs", "k.json");
        assert_eq!(endpoint.host(), "localhost:9000");
        assert_eq!(path, "/docs/k.json");
    }

    #[test]
    fn encryption_headers_on_every_put() {
        let creds = crate::aws::AwsCredentials {
            access_key_id: "a".into(),
            secret_access_key: "b".into(),
            session_token: None,
        };
        let store = S3ObjectStore::new(
            AwsClient::new(creds),
            "us-east-1",
            None,
            Some(ServerSideEncryption {
                algorithm: "aws:kms".into(),
                kms_key_id: Some("key-1".into()),
            }),
        );

        let mut source_meta = ObjectMetadata::new();
        source_meta.insert("sha256".into(), "abc".into());
        let source = store.put_headers(&source_meta);
        let fragment = store.put_headers(&ObjectMetadata::new());

        for headers in [&source, &fragment] {
            assert!(headers.contains(&(
                "x-amz-server-side-encryption".to_string(),
                "aws:kms".to_string()
            )));
            assert!(headers.contains(&(
                "x-amz-server-side-encryption-aws-kms-key-id".to_string(),
                "key-1".to_string()
            )));
        }
        assert!(source.contains(&("x-amz-meta-sha256".to_string(), "abc".to_string())));
        assert_eq!(fragment.len(), 2);
    }

    #[test]
    fn non_ascii_metadata_is_encoded() {
        assert_eq!(header_safe("ledger.xlsx"), "ledger.xlsx");
        assert_eq!(header_safe("bilan é.xlsx"), "bilan%20%C3%A9.xlsx");
    }
}
