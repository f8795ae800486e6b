//! Knowledge-base request and response shapes.
//!
//! Build-status and retrieve-and-generate payloads vary in field naming
//! depending on the service API version. The functions here are the only
//! place that looks at raw payloads; everything downstream works with
//! [`BuildStatus`] and [`Reference`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{meta, Metadata, Reference};
use crate::poll::PollState;

/// Normalized state of a knowledge-base rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    InProgress,
    Succeeded,
    Failed,
}

/// Map a raw status string to a [`BuildState`].
pub fn classify_build_status(status: &str) -> BuildState {
    match status.to_ascii_uppercase().as_str() {
        "COMPLETE" | "COMPLETED" | "SUCCEEDED" => BuildState::Succeeded,
        "FAILED" | "ERROR" | "STOPPED" => BuildState::Failed,
        _ => BuildState::InProgress,
    }
}

/// One observation of a rebuild, with the payload it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub state: BuildState,
    pub status: String,
    pub raw: Value,
}

impl BuildStatus {
    /// Read `status`, `buildStatus`, or `ingestionJob.status`. A payload with
    /// none of them (e.g. an error body) stays in progress.
    pub fn from_response(raw: Value) -> Self {
        let status = raw
            .get("status")
            .or_else(|| raw.get("buildStatus"))
            .or_else(|| raw.pointer("/ingestionJob/status"))
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        Self {
            state: classify_build_status(&status),
            status,
            raw,
        }
    }

    pub fn poll_state(&self) -> PollState {
        match self.state {
            BuildState::InProgress => PollState::InProgress,
            BuildState::Succeeded => PollState::Succeeded,
            BuildState::Failed => PollState::Failed,
        }
    }
}

/// Retrieval filter passed to retrieve-and-generate.
///
/// Serializes as `{"equals": {"key": ..., "value": ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetrievalFilter {
    Equals { key: String, value: String },
}

impl RetrievalFilter {
    /// Scope retrieval to fragments of one ingestion batch.
    pub fn batch(batch_id: &str) -> Self {
        RetrievalFilter::Equals {
            key: meta::BATCH_ID.to_string(),
            value: batch_id.to_string(),
        }
    }
}

/// Input to a retrieve-and-generate call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagRequest {
    pub kb_id: String,
    pub prompt: String,
    pub model: Option<String>,
    pub max_output_tokens: u32,
    pub filter: Option<RetrievalFilter>,
}

/// Generated answer text, from `output.text` or `generatedText`.
pub fn generated_text(raw: &Value) -> Option<&str> {
    raw.pointer("/output/text")
        .or_else(|| raw.get("generatedText"))
        .or_else(|| raw.get("generated_text"))
        .and_then(Value::as_str)
}

/// References drawn on by the generation, read from the raw response.
///
/// Accepts `retrievedItems` / `retrieved_items` lists (ids under
/// `documentId` or `id`, metadata under `documentMetadata` or `metadata`)
/// and the citation shape `citations[].retrievedReferences[]`, where the id
/// is the reference's storage location.
pub fn references_from_response(raw: &Value) -> Vec<Reference> {
    let mut refs = Vec::new();

    let items = raw
        .get("retrievedItems")
        .or_else(|| raw.get("retrieved_items"))
        .and_then(Value::as_array);
    for item in items.into_iter().flatten() {
        let fragment_id = item
            .get("documentId")
            .or_else(|| item.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let metadata = item
            .get("documentMetadata")
            .or_else(|| item.get("metadata"))
            .map(metadata_map)
            .unwrap_or_default();
        refs.push(Reference {
            fragment_id,
            metadata,
        });
    }

    let citations = raw.get("citations").and_then(Value::as_array);
    for citation in citations.into_iter().flatten() {
        let retrieved = citation
            .get("retrievedReferences")
            .and_then(Value::as_array);
        for r in retrieved.into_iter().flatten() {
            let fragment_id = r
                .pointer("/location/s3Location/uri")
                .and_then(Value::as_str)
                .map(str::to_string);
            let metadata = r.get("metadata").map(metadata_map).unwrap_or_default();
            refs.push(Reference {
                fragment_id,
                metadata,
            });
        }
    }

    refs
}

fn metadata_map(value: &Value) -> Metadata {
    match value {
        Value::Object(map) => map.clone(),
        _ => Metadata::new(),
    }
}
