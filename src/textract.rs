//! Amazon Textract client implementing [`DocumentAnalysis`].
//!
//! Speaks the JSON 1.1 protocol: every call is a signed `POST /` with an
//! `X-Amz-Target: Textract.<Operation>` header.
//!
//! | Trait method | Operation |
//! |--------------|-----------|
//! | `detect_text` | `DetectDocumentText` (bytes inline, base64) |
//! | `start_analysis` | `StartDocumentAnalysis` (S3 object) |
//! | `poll_analysis` | `GetDocumentAnalysis`, following `NextToken` once the job is done |

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use recon_harness_core::analysis::{AnalysisResponse, FeatureType};
use recon_harness_core::poll::PollState;
use recon_harness_core::services::DocumentAnalysis;

use crate::aws::{AwsClient, AwsEndpoint};
use crate::config::AnalysisConfig;

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Upper bound on result pages fetched for one job.
const MAX_PAGES: usize = 1000;

pub struct TextractClient {
    client: AwsClient,
    endpoint: AwsEndpoint,
}

impl TextractClient {
    pub fn new(client: AwsClient, config: &AnalysisConfig) -> Self {
        let endpoint = AwsEndpoint::new(
            "textract",
            &config.region,
            config.endpoint_url.as_deref(),
            &format!("textract.{}.amazonaws.com", config.region),
        );
        Self { client, endpoint }
    }

    async fn call(&self, operation: &str, body: &Value) -> Result<Value> {
        let headers = vec![
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            (
                "x-amz-target".to_string(),
                format!("Textract.{}", operation),
            ),
        ];
        let resp = self
            .client
            .send_checked(
                &self.endpoint,
                Method::POST,
                "/",
                &[],
                &headers,
                serde_json::to_vec(body)?,
                &format!("Textract {}", operation),
            )
            .await?;
        resp.json::<Value>()
            .await
            .with_context(|| format!("Textract {} returned invalid JSON", operation))
    }

    async fn get_page(&self, job_id: &str, next_token: Option<&str>) -> Result<AnalysisResponse> {
        let mut body = json!({ "JobId": job_id });
        if let Some(token) = next_token {
            body["NextToken"] = json!(token);
        }
        let raw = self.call("GetDocumentAnalysis", &body).await?;
        AnalysisResponse::from_json(raw).context("unexpected GetDocumentAnalysis response")
    }
}

#[async_trait]
impl DocumentAnalysis for TextractClient {
    async fn detect_text(&self, document: &[u8]) -> Result<AnalysisResponse> {
        let body = json!({
            "Document": {
                "Bytes": base64::engine::general_purpose::STANDARD.encode(document)
            }
        });
        let raw = self.call("DetectDocumentText", &body).await?;
        AnalysisResponse::from_json(raw).context("unexpected DetectDocumentText response")
    }

    async fn start_analysis(
        &self,
        bucket: &str,
        key: &str,
        features: &[FeatureType],
    ) -> Result<String> {
        let body = json!({
            "DocumentLocation": { "S3Object": { "Bucket": bucket, "Name": key } },
            "FeatureTypes": features,
        });
        let raw = self.call("StartDocumentAnalysis", &body).await?;
        raw.get("JobId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("StartDocumentAnalysis response has no JobId"))
    }

    async fn poll_analysis(&self, job_id: &str) -> Result<AnalysisResponse> {
        let mut response = self.get_page(job_id, None).await?;
        if response.poll_state() == PollState::InProgress {
            return Ok(response);
        }

        let mut pages = 1;
        while let Some(token) = response.next_token.take() {
            if pages >= MAX_PAGES {
                return Err(anyhow!(
                    "GetDocumentAnalysis for {} exceeded {} pages",
                    job_id,
                    MAX_PAGES
                ));
            }
            let page = self.get_page(job_id, Some(&token)).await?;
            response.blocks.extend(page.blocks);
            response.next_token = page.next_token;
            pages += 1;
        }
        debug!(job_id, pages, blocks = response.blocks.len(), "analysis results fetched");
        Ok(response)
    }
}
