//! AWS request signing and transport shared by the storage, analysis, and
//! knowledge-base clients.
//!
//! Requests are signed with
//! [AWS Signature Version 4](https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_aws-signing.html)
//! using the pure-Rust `hmac` + `sha2` crates, so no C crypto library is
//! needed. Custom endpoints (MinIO, LocalStack) are supported per service.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional (temporary credentials / IAM roles)

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::{Digest, Sha256};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

// ============ AWS Credentials ============

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ Endpoints ============

/// Where a service lives and how its requests are scoped for signing.
#[derive(Debug, Clone)]
pub struct AwsEndpoint {
    /// `scheme://host[:port]`, no trailing slash.
    pub base_url: String,
    pub region: String,
    /// Signing name (`s3`, `textract`, `bedrock`).
    pub service: String,
}

impl AwsEndpoint {
    /// Use `endpoint_url` when configured, else `https://<default_host>`.
    pub fn new(service: &str, region: &str, endpoint_url: Option<&str>, default_host: &str) -> Self {
        let base_url = match endpoint_url {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                url.trim_end_matches('/').to_string()
            }
            Some(host) => format!("https://{}", host.trim_end_matches('/')),
            None => format!("https://{}", default_host),
        };
        Self {
            base_url,
            region: region.to_string(),
            service: service.to_string(),
        }
    }

    pub fn host(&self) -> &str {
        self.base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
    }
}

// ============ Signed transport ============

/// A reqwest client that signs every request.
#[derive(Clone)]
pub struct AwsClient {
    http: reqwest::Client,
    credentials: AwsCredentials,
}

impl AwsClient {
    pub fn new(credentials: AwsCredentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(AwsCredentials::from_env()?))
    }

    /// Send a signed request. `path` must already be URI-encoded.
    /// `headers` are signed along with `host`, `x-amz-date` and
    /// `x-amz-content-sha256`.
    pub async fn send(
        &self,
        endpoint: &AwsEndpoint,
        method: Method,
        path: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let canonical_query = canonical_query_string(query);
        let payload_hash = hex_sha256(&body);
        let amz_date = Utc::now();

        let signed = sign_request(
            &self.credentials,
            endpoint,
            method.as_str(),
            path,
            &canonical_query,
            headers,
            &payload_hash,
            amz_date,
        );

        let url = if canonical_query.is_empty() {
            format!("{}{}", endpoint.base_url, path)
        } else {
            format!("{}{}?{}", endpoint.base_url, path, canonical_query)
        };
        debug!(method = %method, %url, "aws request");

        let mut req = self.http.request(method, &url).body(body);
        for (name, value) in &signed {
            if name != "host" {
                req = req.header(name.as_str(), value.as_str());
            }
        }

        req.send()
            .await
            .with_context(|| format!("request to {} failed", url))
    }

    /// Like [`send`](Self::send), but fails on any non-2xx status.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_checked(
        &self,
        endpoint: &AwsEndpoint,
        method: Method,
        path: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
        body: Vec<u8>,
        operation: &str,
    ) -> Result<reqwest::Response> {
        let resp = self
            .send(endpoint, method, path, query, headers, body)
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "{} failed (HTTP {}): {}",
                operation,
                status,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(resp)
    }
}

/// Build the full header set for a request, `authorization` included.
#[allow(clippy::too_many_arguments)]
pub fn sign_request(
    creds: &AwsCredentials,
    endpoint: &AwsEndpoint,
    method: &str,
    canonical_uri: &str,
    canonical_query: &str,
    extra_headers: &[(String, String)],
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host".to_string(), endpoint.host().to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    for (name, value) in extra_headers {
        headers.push((name.to_ascii_lowercase(), value.trim().to_string()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, endpoint.region, endpoint.service
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(
        &creds.secret_access_key,
        &date_stamp,
        &endpoint.region,
        &endpoint.service,
    );
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    headers.push((
        "authorization".to_string(),
        format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        ),
    ));
    headers
}

// ============ AWS SigV4 Helpers ============

/// Sorted, encoded `k=v&k=v` query string.
pub fn canonical_query_string(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Encode each `/`-separated segment of an object key or path.
pub fn encode_path(path: &str) -> String {
    path.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

pub fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything except `A-Z a-z 0-9 - _ . ~`.
pub fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
