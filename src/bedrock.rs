//! Amazon Bedrock knowledge-base client implementing [`KnowledgeBase`].
//!
//! A "build" is an ingestion job on the knowledge base's configured data
//! source (control plane, `bedrock-agent`). The job id of the most recent
//! build per knowledge base is remembered so `build_status` can poll it.
//! Retrieve-and-generate goes to the runtime endpoint
//! (`bedrock-agent-runtime`).

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::info;

use recon_harness_core::kb::{BuildStatus, RagRequest};
use recon_harness_core::services::KnowledgeBase;

use crate::aws::{uri_encode, AwsClient, AwsEndpoint};
use crate::config::KnowledgeBaseConfig;

pub struct BedrockKnowledgeBase {
    client: AwsClient,
    agent: AwsEndpoint,
    runtime: AwsEndpoint,
    data_source_id: Option<String>,
    model_arn: Option<String>,
    jobs: Mutex<HashMap<String, String>>,
}

impl BedrockKnowledgeBase {
    pub fn new(client: AwsClient, config: &KnowledgeBaseConfig) -> Self {
        let region = &config.region;
        Self {
            client,
            agent: AwsEndpoint::new(
                "bedrock",
                region,
                config.agent_endpoint_url.as_deref(),
                &format!("bedrock-agent.{}.amazonaws.com", region),
            ),
            runtime: AwsEndpoint::new(
                "bedrock",
                region,
                config.runtime_endpoint_url.as_deref(),
                &format!("bedrock-agent-runtime.{}.amazonaws.com", region),
            ),
            data_source_id: config.data_source_id.clone(),
            model_arn: config.model_arn.clone(),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn jobs_path(&self, kb_id: &str) -> Result<String> {
        let ds = self
            .data_source_id
            .as_deref()
            .ok_or_else(|| anyhow!("knowledge_base.data_source_id is not configured"))?;
        Ok(format!(
            "/knowledgebases/{}/datasources/{}/ingestionjobs/",
            uri_encode(kb_id),
            uri_encode(ds)
        ))
    }

    async fn json_call(
        &self,
        endpoint: &AwsEndpoint,
        method: Method,
        path: &str,
        body: Option<&Value>,
        operation: &str,
    ) -> Result<Value> {
        let (headers, payload) = match body {
            Some(b) => (
                vec![("content-type".to_string(), "application/json".to_string())],
                serde_json::to_vec(b)?,
            ),
            None => (Vec::new(), Vec::new()),
        };
        let resp = self
            .client
            .send_checked(endpoint, method, path, &[], &headers, payload, operation)
            .await?;
        resp.json::<Value>()
            .await
            .with_context(|| format!("{} returned invalid JSON", operation))
    }
}

/// Request body for `RetrieveAndGenerate`.
pub fn retrieve_and_generate_body(request: &RagRequest, default_model: Option<&str>) -> Result<Value> {
    let model = request
        .model
        .as_deref()
        .or(default_model)
        .ok_or_else(|| anyhow!("no model given and knowledge_base.model_arn is not set"))?;

    let mut kb_config = json!({
        "knowledgeBaseId": request.kb_id,
        "modelArn": model,
        "generationConfiguration": {
            "inferenceConfig": {
                "textInferenceConfig": { "maxTokens": request.max_output_tokens }
            }
        }
    });
    if let Some(ref filter) = request.filter {
        kb_config["retrievalConfiguration"] = json!({
            "vectorSearchConfiguration": { "filter": filter }
        });
    }

    Ok(json!({
        "input": { "text": request.prompt },
        "retrieveAndGenerateConfiguration": {
            "type": "KNOWLEDGE_BASE",
            "knowledgeBaseConfiguration": kb_config
        }
    }))
}

#[async_trait]
impl KnowledgeBase for BedrockKnowledgeBase {
    async fn start_build(&self, kb_id: &str) -> Result<BuildStatus> {
        let path = self.jobs_path(kb_id)?;
        let raw = self
            .json_call(&self.agent, Method::PUT, &path, Some(&json!({})), "StartIngestionJob")
            .await?;

        let job_id = raw
            .pointer("/ingestionJob/ingestionJobId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("StartIngestionJob response has no ingestionJobId"))?;
        info!(kb_id, job_id, "ingestion job started");
        self.jobs
            .lock()
            .map_err(|_| anyhow!("ingestion job table poisoned"))?
            .insert(kb_id.to_string(), job_id.to_string());

        Ok(BuildStatus::from_response(raw))
    }

    async fn build_status(&self, kb_id: &str) -> Result<BuildStatus> {
        let job_id = self
            .jobs
            .lock()
            .map_err(|_| anyhow!("ingestion job table poisoned"))?
            .get(kb_id)
            .cloned()
            .ok_or_else(|| anyhow!("no ingestion job started for knowledge base {}", kb_id))?;

        let path = format!("{}{}", self.jobs_path(kb_id)?, uri_encode(&job_id));
        let raw = self
            .json_call(&self.agent, Method::GET, &path, None, "GetIngestionJob")
            .await?;
        Ok(BuildStatus::from_response(raw))
    }

    async fn retrieve_and_generate(&self, request: &RagRequest) -> Result<Value> {
        let body = retrieve_and_generate_body(request, self.model_arn.as_deref())?;
        self.json_call(
            &self.runtime,
            Method::POST,
            "/retrieveAndGenerate",
            Some(&body),
            "RetrieveAndGenerate",
        )
        .await
    }
}
