//! Document-analysis block graph.
//!
//! The analysis service answers with a flat list of typed blocks (`PAGE`,
//! `LINE`, `WORD`, `TABLE`, `CELL`, ...) linked by parent→child
//! relationship edges. This module owns the canonical shape of that graph
//! and the single decode step that accepts both the service's PascalCase
//! field names and snake_case payloads. Extractors only ever see
//! [`AnalysisResponse`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::ReconError;
use crate::poll::{Clock, PollConfig, PollOutcome, PollState, Poller};
use crate::services::DocumentAnalysis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockType {
    Page,
    Line,
    Word,
    Table,
    Cell,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Child,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "type", alias = "Type")]
    pub kind: RelationshipType,
    #[serde(default, alias = "Ids")]
    pub ids: Vec<String>,
}

/// One node of the analysis graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(alias = "Id")]
    pub id: String,
    #[serde(alias = "BlockType")]
    pub block_type: BlockType,
    #[serde(default, alias = "Text")]
    pub text: Option<String>,
    #[serde(default, alias = "Page")]
    pub page: Option<u32>,
    #[serde(default, alias = "RowIndex")]
    pub row_index: Option<u32>,
    #[serde(default, alias = "ColumnIndex")]
    pub column_index: Option<u32>,
    #[serde(default, alias = "Relationships")]
    pub relationships: Vec<Relationship>,
}

impl Block {
    /// Ids of `CHILD` edges, in relationship order.
    pub fn child_ids(&self) -> impl Iterator<Item = &str> {
        self.relationships
            .iter()
            .filter(|r| r.kind == RelationshipType::Child)
            .flat_map(|r| r.ids.iter().map(String::as_str))
    }
}

/// Status of an asynchronous analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InProgress,
    Succeeded,
    Failed,
    PartialSuccess,
    /// A status this client does not know; polled again.
    #[serde(other)]
    Unknown,
}

/// Canonical analysis response, sync or async.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default, alias = "JobStatus", alias = "status")]
    pub job_status: Option<JobStatus>,
    #[serde(default, alias = "StatusMessage")]
    pub status_message: Option<String>,
    #[serde(default, alias = "Blocks")]
    pub blocks: Vec<Block>,
    #[serde(default, alias = "NextToken")]
    pub next_token: Option<String>,
}

impl AnalysisResponse {
    /// Decode a raw service payload in either naming convention.
    pub fn from_json(raw: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw)
    }

    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks,
            ..Self::default()
        }
    }

    /// Blocks keyed by id.
    pub fn index(&self) -> HashMap<&str, &Block> {
        self.blocks.iter().map(|b| (b.id.as_str(), b)).collect()
    }

    /// A synchronous response (no job status) counts as succeeded.
    /// `PARTIAL_SUCCESS` carries usable blocks and is treated as success.
    pub fn poll_state(&self) -> PollState {
        match self.job_status {
            None | Some(JobStatus::Succeeded) | Some(JobStatus::PartialSuccess) => {
                PollState::Succeeded
            }
            Some(JobStatus::Failed) => PollState::Failed,
            Some(JobStatus::InProgress) | Some(JobStatus::Unknown) => PollState::InProgress,
        }
    }
}

/// Analysis features requested for async jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureType {
    Tables,
    Forms,
    Queries,
    Signatures,
    Layout,
}

/// Submit an async analysis job for a stored object and wait for it.
///
/// A job that ends `FAILED` is returned as data, not raised; the caller
/// inspects [`AnalysisResponse::job_status`].
pub async fn analyze_stored_document(
    service: &dyn DocumentAnalysis,
    clock: &dyn Clock,
    bucket: &str,
    key: &str,
    features: &[FeatureType],
    poll: PollConfig,
) -> Result<AnalysisResponse, ReconError> {
    let job_id = service.start_analysis(bucket, key, features).await?;
    info!(%job_id, key, "document analysis submitted");

    let job = job_id.as_str();
    let mut poller = Poller::new(clock, poll, "document analysis");
    let outcome = poller
        .run(move || async move {
            let response = service.poll_analysis(job).await?;
            Ok::<_, anyhow::Error>((response.poll_state(), response))
        })
        .await?;

    match outcome {
        PollOutcome::Succeeded(response) => {
            info!(
                %job_id,
                blocks = response.blocks.len(),
                polls = poller.attempts(),
                "document analysis finished"
            );
            Ok(response)
        }
        PollOutcome::Failed(response) => {
            warn!(
                %job_id,
                message = response.status_message.as_deref().unwrap_or(""),
                "document analysis job failed"
            );
            Ok(response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_service_shape() {
        let raw = json!({
            "JobStatus": "SUCCEEDED",
            "NextToken": "tok",
            "Blocks": [
                {"Id": "t1", "BlockType": "TABLE", "Page": 2, "Confidence": 99.1,
                 "Relationships": [{"Type": "CHILD", "Ids": ["c1"]}]},
                {"Id": "c1", "BlockType": "CELL", "RowIndex": 1, "ColumnIndex": 3},
                {"Id": "s1", "BlockType": "SELECTION_ELEMENT"}
            ]
        });
        let resp = AnalysisResponse::from_json(raw).unwrap();
        assert_eq!(resp.job_status, Some(JobStatus::Succeeded));
        assert_eq!(resp.next_token.as_deref(), Some("tok"));
        assert_eq!(resp.blocks[0].block_type, BlockType::Table);
        assert_eq!(resp.blocks[0].page, Some(2));
        assert_eq!(resp.blocks[0].child_ids().collect::<Vec<_>>(), vec!["c1"]);
        assert_eq!(resp.blocks[1].row_index, Some(1));
        assert_eq!(resp.blocks[1].column_index, Some(3));
        assert_eq!(resp.blocks[2].block_type, BlockType::Other);
    }

    #[test]
    fn decodes_snake_case_shape() {
        let raw = json!({
            "status": "IN_PROGRESS",
            "blocks": [
                {"id": "l1", "block_type": "LINE", "text": "Invoice 42",
                 "relationships": [{"type": "CHILD", "ids": ["w1"]}]}
            ]
        });
        let resp = AnalysisResponse::from_json(raw).unwrap();
        assert_eq!(resp.poll_state(), PollState::InProgress);
        assert_eq!(resp.blocks[0].text.as_deref(), Some("Invoice 42"));
    }

    #[test]
    fn sync_response_without_status_is_succeeded() {
        let resp = AnalysisResponse::from_json(json!({"Blocks": []})).unwrap();
        assert_eq!(resp.poll_state(), PollState::Succeeded);
        let failed = AnalysisResponse::from_json(json!({"JobStatus": "FAILED"})).unwrap();
        assert_eq!(failed.poll_state(), PollState::Failed);
    }

    #[test]
    fn unrecognised_job_status_keeps_polling() {
        let resp = AnalysisResponse::from_json(json!({
            "JobStatus": "QUEUED",
            "Blocks": [{"Id": "l1", "BlockType": "LINE", "Text": "x"}]
        }))
        .unwrap();
        assert_eq!(resp.job_status, Some(JobStatus::Unknown));
        assert_eq!(resp.poll_state(), PollState::InProgress);
        assert_eq!(resp.blocks.len(), 1);
    }

    #[test]
    fn non_child_relationships_are_ignored() {
        let block: Block = serde_json::from_value(json!({
            "Id": "x", "BlockType": "LINE",
            "Relationships": [
                {"Type": "ANSWER", "Ids": ["a"]},
                {"Type": "CHILD", "Ids": ["b", "c"]}
            ]
        }))
        .unwrap();
        assert_eq!(block.child_ids().collect::<Vec<_>>(), vec!["b", "c"]);
    }
}
