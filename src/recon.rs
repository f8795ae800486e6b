//! Retrieval-and-reconciliation coordinator.
//!
//! A query composes one prompt from the optional global and use-case
//! templates plus the user's question, optionally scopes retrieval to one
//! ingestion batch, runs retrieve-and-generate, and persists a
//! [`ReconRecord`] whose `references` are read from the raw response at
//! that moment and never recomputed.
//!
//! [`ReconCoordinator::fetch_snippet`] resolves a stored reference back to
//! source data for replay. It never fails: anything it cannot resolve comes
//! back as [`Snippet::NotFound`].

use anyhow::{bail, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use recon_harness_core::error::ReconError;
use recon_harness_core::extract::{tabular, TabularFormat};
use recon_harness_core::kb::{generated_text, references_from_response, RagRequest, RetrievalFilter};
use recon_harness_core::models::keys::parse_s3_uri;
use recon_harness_core::models::{meta, new_id, Metadata, ReconRecord, Reference};
use recon_harness_core::services::{MetadataStore, Services};

use crate::config::Config;

/// Compose the generation prompt: each non-empty template followed by a
/// blank line, then the user query.
pub fn compose_prompt(
    global_template: Option<&str>,
    usecase_template: Option<&str>,
    user_query: &str,
) -> String {
    let mut prompt = String::new();
    for template in [global_template, usecase_template].into_iter().flatten() {
        if !template.is_empty() {
            prompt.push_str(template);
            prompt.push_str("\n\n");
        }
    }
    prompt.push_str("User Query:\n");
    prompt.push_str(user_query);
    prompt
}

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub use_case: String,
    pub kb_id: String,
    pub user_query: String,
    pub batch_id: Option<String>,
    pub global_template: Option<String>,
    pub usecase_template: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub recon_id: String,
    pub record: ReconRecord,
}

impl QueryResult {
    /// The generated answer, if the response carried one.
    pub fn answer(&self) -> Option<&str> {
        generated_text(&self.record.raw_response)
    }
}

/// Source data behind a reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Snippet {
    /// Values of a spreadsheet row, keyed by column header.
    Row {
        sheet: String,
        row: u64,
        values: Metadata,
    },
    /// Structural pointer (page/table/row/col or slide), returned as-is.
    Reference { metadata: Metadata },
    /// The reference carries no source location.
    NoSource,
    /// The source or the row could not be resolved.
    NotFound,
}

pub struct ReconCoordinator {
    services: Services,
    model: Option<String>,
    max_output_tokens: u32,
}

impl ReconCoordinator {
    pub fn new(services: Services, model: Option<String>, max_output_tokens: u32) -> Self {
        Self {
            services,
            model,
            max_output_tokens,
        }
    }

    pub fn from_config(services: Services, config: &Config) -> Self {
        Self::new(
            services,
            config.knowledge_base.model_arn.clone(),
            config.knowledge_base.max_output_tokens,
        )
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResult, ReconError> {
        if request.user_query.trim().is_empty() {
            return Err(ReconError::InvalidInput("query must not be empty".into()));
        }

        let prompt = compose_prompt(
            request.global_template.as_deref(),
            request.usecase_template.as_deref(),
            &request.user_query,
        );
        let batch_id = request
            .batch_id
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string);

        let rag = RagRequest {
            kb_id: request.kb_id.clone(),
            prompt: prompt.clone(),
            model: self.model.clone(),
            max_output_tokens: self.max_output_tokens,
            filter: batch_id.as_deref().map(RetrievalFilter::batch),
        };
        let raw = self
            .services
            .knowledge_base
            .retrieve_and_generate(&rag)
            .await?;

        let references = references_from_response(&raw);
        let record = ReconRecord {
            recon_id: new_id(),
            use_case: request.use_case.clone(),
            kb_id: request.kb_id.clone(),
            batch_id,
            prompt,
            model: self.model.clone(),
            raw_response: raw,
            references,
            created_at: Utc::now(),
        };
        self.services.metadata.put_recon(&record).await?;
        info!(
            recon_id = %record.recon_id,
            use_case = %record.use_case,
            scoped = record.batch_id.is_some(),
            references = record.references.len(),
            "reconciliation recorded"
        );

        Ok(QueryResult {
            recon_id: record.recon_id.clone(),
            record,
        })
    }

    /// Most recent `limit` records of a use case, newest first.
    pub async fn list_recons(&self, use_case: &str, limit: usize) -> Result<Vec<ReconRecord>, ReconError> {
        Ok(self.services.metadata.list_recons(use_case, limit).await?)
    }

    pub async fn get_recon(&self, use_case: &str, recon_id: &str) -> Result<Option<ReconRecord>, ReconError> {
        Ok(self.services.metadata.get_recon(use_case, recon_id).await?)
    }

    /// Resolve a reference to the data it points at.
    ///
    /// Tabular references (`sheet` + `row`) re-open the stored workbook and
    /// return the row's values. Anything else is answered from the
    /// reference metadata alone.
    pub async fn fetch_snippet(&self, reference: &Reference) -> Snippet {
        let metadata = &reference.metadata;
        let Some(source_uri) = metadata.get(meta::SOURCE_URI).and_then(Value::as_str) else {
            return Snippet::NoSource;
        };

        let sheet = metadata.get(meta::SHEET).and_then(Value::as_str);
        let row = metadata.get(meta::ROW).and_then(Value::as_u64);
        let (Some(sheet), Some(row)) = (sheet, row) else {
            return Snippet::Reference {
                metadata: metadata.clone(),
            };
        };

        let file_uri = metadata
            .get(meta::SOURCE_FILE)
            .and_then(Value::as_str)
            .unwrap_or(source_uri);
        match self.read_row(file_uri, sheet, row).await {
            Ok(Some(values)) => Snippet::Row {
                sheet: sheet.to_string(),
                row,
                values,
            },
            Ok(None) => Snippet::NotFound,
            Err(e) => {
                warn!(file_uri, sheet, row, error = %e, "snippet lookup failed");
                Snippet::NotFound
            }
        }
    }

    async fn read_row(&self, file_uri: &str, sheet: &str, row: u64) -> Result<Option<Metadata>> {
        let Some((bucket, key)) = parse_s3_uri(file_uri) else {
            bail!("not an object location: {}", file_uri);
        };
        let Some(format) = TabularFormat::from_key(key) else {
            bail!("not a tabular source: {}", key);
        };
        let Some(bytes) = self.services.objects.get(bucket, key).await? else {
            return Ok(None);
        };

        let workbook = tabular::parse(&bytes, format)?;
        let sheet_name = match format {
            TabularFormat::Csv => None,
            _ => Some(sheet),
        };
        Ok(workbook
            .sheet(sheet_name)
            .and_then(|s| usize::try_from(row).ok().and_then(|idx| s.row_values(idx))))
    }
}

// ============ CLI ============

async fn coordinator(config: &Config) -> anyhow::Result<ReconCoordinator> {
    let services = crate::backends::connect_services(config).await?;
    Ok(ReconCoordinator::from_config(services, config))
}

/// Metadata-only access for commands that never reach AWS.
async fn metadata_store(config: &Config) -> anyhow::Result<crate::sqlite_store::SqliteMetadataStore> {
    let pool = crate::db::connect(config).await?;
    crate::migrate::apply(&pool).await?;
    Ok(crate::sqlite_store::SqliteMetadataStore::new(pool))
}

fn read_template(path: Option<&std::path::Path>) -> anyhow::Result<Option<String>> {
    path.map(|p| {
        std::fs::read_to_string(p)
            .map_err(|e| anyhow::anyhow!("Failed to read template {}: {}", p.display(), e))
    })
    .transpose()
}

/// `recon query`
pub async fn run_query(
    config: &Config,
    use_case: &str,
    kb_id: Option<String>,
    query: &str,
    batch_id: Option<String>,
    global_template: Option<&std::path::Path>,
    usecase_template: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let request = QueryRequest {
        use_case: use_case.to_string(),
        kb_id: config.knowledge_base.resolve_kb_id(kb_id)?,
        user_query: query.to_string(),
        batch_id,
        global_template: read_template(global_template)?,
        usecase_template: read_template(usecase_template)?,
    };
    let result = coordinator(config).await?.query(&request).await?;

    println!("{}", result.answer().unwrap_or("(no answer text in response)"));
    println!();
    println!("recon: {}", result.recon_id);
    println!("references: {}", result.record.references.len());
    for (i, r) in result.record.references.iter().enumerate() {
        println!(
            "  [{}] {}",
            i,
            r.fragment_id.as_deref().unwrap_or("(no id)")
        );
    }
    Ok(())
}

/// `recon recons`
pub async fn run_list(config: &Config, use_case: &str, limit: usize) -> anyhow::Result<()> {
    let records = metadata_store(config).await?.list_recons(use_case, limit).await?;
    if records.is_empty() {
        println!("No reconciliations recorded for use case '{}'.", use_case);
        return Ok(());
    }
    for r in records {
        let prompt_line = r.prompt.lines().last().unwrap_or("");
        println!(
            "{}  {}  batch={}  refs={}  {}",
            r.created_at.format("%Y-%m-%d %H:%M:%S"),
            r.recon_id,
            r.batch_id.as_deref().unwrap_or("-"),
            r.references.len(),
            prompt_line
        );
    }
    Ok(())
}

/// `recon replay`: print a stored record as JSON.
pub async fn run_replay(config: &Config, use_case: &str, recon_id: &str) -> anyhow::Result<()> {
    match metadata_store(config).await?.get_recon(use_case, recon_id).await? {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        None => bail!("recon not found: {}", recon_id),
    }
}

/// `recon snippet`: resolve the references of a stored record.
pub async fn run_snippet(
    config: &Config,
    use_case: &str,
    recon_id: &str,
    index: Option<usize>,
) -> anyhow::Result<()> {
    let coordinator = coordinator(config).await?;
    let Some(record) = coordinator.get_recon(use_case, recon_id).await? else {
        bail!("recon not found: {}", recon_id);
    };

    let selected: Vec<(usize, &Reference)> = match index {
        Some(i) => match record.references.get(i) {
            Some(r) => vec![(i, r)],
            None => bail!(
                "reference index {} out of range ({} references)",
                i,
                record.references.len()
            ),
        },
        None => record.references.iter().enumerate().collect(),
    };

    for (i, reference) in selected {
        let snippet = coordinator.fetch_snippet(reference).await;
        println!("[{}] {}", i, serde_json::to_string_pretty(&snippet)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_orders_templates_before_query() {
        assert_eq!(
            compose_prompt(Some("You reconcile ledgers."), Some("Currency is EUR."), "Any gaps?"),
            "You reconcile ledgers.\n\nCurrency is EUR.\n\nUser Query:\nAny gaps?"
        );
    }

    #[test]
    fn prompt_skips_missing_and_empty_templates() {
        assert_eq!(compose_prompt(None, None, "q"), "User Query:\nq");
        assert_eq!(compose_prompt(Some(""), Some("uc"), "q"), "uc\n\nUser Query:\nq");
    }

    #[test]
    fn snippet_serializes_with_kind_tag() {
        let v = serde_json::to_value(Snippet::NoSource).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "no_source"}));
    }
}
