use anyhow::{Context, Result};
use recon_harness_core::analysis::FeatureType;
use recon_harness_core::poll::PollConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Root directory of the `local` backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Server-side encryption for uploaded source files. Empty disables it.
    #[serde(default = "default_sse")]
    pub sse: String,
    #[serde(default)]
    pub kms_key_id: Option<String>,
}

fn default_backend() -> String {
    "s3".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_sse() -> String {
    "aws:kms".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_analysis_poll")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_analysis_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_feature_types")]
    pub feature_types: Vec<FeatureType>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            poll_interval_secs: default_analysis_poll(),
            timeout_secs: default_analysis_timeout(),
            feature_types: default_feature_types(),
        }
    }
}

impl AnalysisConfig {
    pub fn poll_config(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_secs(self.poll_interval_secs),
            Some(Duration::from_secs(self.timeout_secs)),
        )
    }
}

fn default_analysis_poll() -> u64 {
    5
}
fn default_analysis_timeout() -> u64 {
    1800
}
fn default_feature_types() -> Vec<FeatureType> {
    vec![FeatureType::Tables, FeatureType::Forms]
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeBaseConfig {
    #[serde(default = "default_region")]
    pub region: String,
    /// Control-plane endpoint (ingestion jobs).
    #[serde(default)]
    pub agent_endpoint_url: Option<String>,
    /// Runtime endpoint (retrieve-and-generate).
    #[serde(default)]
    pub runtime_endpoint_url: Option<String>,
    /// Knowledge base used when a command does not name one.
    #[serde(default)]
    pub kb_id: Option<String>,
    #[serde(default)]
    pub data_source_id: Option<String>,
    #[serde(default)]
    pub model_arn: Option<String>,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_kb_poll")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_kb_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_wait_for_build")]
    pub wait_for_build: bool,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            agent_endpoint_url: None,
            runtime_endpoint_url: None,
            kb_id: None,
            data_source_id: None,
            model_arn: None,
            max_output_tokens: default_max_output_tokens(),
            poll_interval_secs: default_kb_poll(),
            timeout_secs: default_kb_timeout(),
            wait_for_build: default_wait_for_build(),
        }
    }
}

impl KnowledgeBaseConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Explicit id, else the configured default.
    pub fn resolve_kb_id(&self, explicit: Option<String>) -> Result<String> {
        explicit.or_else(|| self.kb_id.clone()).ok_or_else(|| {
            anyhow::anyhow!("no knowledge base id given and knowledge_base.kb_id is not set")
        })
    }
}

fn default_max_output_tokens() -> u32 {
    1024
}
fn default_kb_poll() -> u64 {
    15
}
fn default_kb_timeout() -> u64 {
    600
}
fn default_wait_for_build() -> bool {
    true
}

/// Age limits applied by `recon prune`. Unset means keep forever.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RetentionConfig {
    #[serde(default)]
    pub recon_days: Option<u32>,
    #[serde(default)]
    pub batch_days: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate storage
    if config.storage.bucket.trim().is_empty() {
        anyhow::bail!("storage.bucket must not be empty");
    }
    match config.storage.backend.as_str() {
        "s3" => {}
        "local" => {
            if config.storage.root.is_none() {
                anyhow::bail!("storage.root must be set when backend is 'local'");
            }
        }
        other => anyhow::bail!(
            "Unknown storage backend: '{}'. Must be s3 or local.",
            other
        ),
    }

    // Validate poll budgets
    if config.analysis.poll_interval_secs == 0 {
        anyhow::bail!("analysis.poll_interval_secs must be > 0");
    }
    if config.analysis.timeout_secs < config.analysis.poll_interval_secs {
        anyhow::bail!("analysis.timeout_secs must be >= analysis.poll_interval_secs");
    }
    if config.knowledge_base.poll_interval_secs == 0 {
        anyhow::bail!("knowledge_base.poll_interval_secs must be > 0");
    }
    if config.knowledge_base.timeout_secs < config.knowledge_base.poll_interval_secs {
        anyhow::bail!("knowledge_base.timeout_secs must be >= knowledge_base.poll_interval_secs");
    }
    if config.knowledge_base.max_output_tokens == 0 {
        anyhow::bail!("knowledge_base.max_output_tokens must be > 0");
    }

    // Validate retention
    if config.retention.recon_days == Some(0) || config.retention.batch_days == Some(0) {
        anyhow::bail!("retention days must be > 0 when set");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [db]
        path = "./data/recon.sqlite"

        [storage]
        bucket = "recon-docs"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.storage.backend, "s3");
        assert_eq!(config.storage.sse, "aws:kms");
        assert_eq!(config.analysis.poll_interval_secs, 5);
        assert_eq!(config.analysis.timeout_secs, 1800);
        assert_eq!(
            config.analysis.feature_types,
            vec![FeatureType::Tables, FeatureType::Forms]
        );
        assert_eq!(config.knowledge_base.max_output_tokens, 1024);
        assert_eq!(config.knowledge_base.poll_interval_secs, 15);
        assert_eq!(config.knowledge_base.timeout_secs, 600);
        assert!(config.knowledge_base.wait_for_build);
        assert!(config.retention.recon_days.is_none());
        assert_eq!(config.server.bind, "127.0.0.1:7340");
    }

    #[test]
    fn rejects_unknown_backend_and_local_without_root() {
        let bad = MINIMAL.replace("bucket = ", "backend = \"ftp\"\nbucket = ");
        let err = parse_config(&bad).unwrap_err().to_string();
        assert!(err.contains("Unknown storage backend"), "{err}");

        let local = MINIMAL.replace("bucket = ", "backend = \"local\"\nbucket = ");
        let err = parse_config(&local).unwrap_err().to_string();
        assert!(err.contains("storage.root"), "{err}");
    }

    #[test]
    fn rejects_timeout_shorter_than_interval() {
        let cfg = format!(
            "{}\n[knowledge_base]\npoll_interval_secs = 30\ntimeout_secs = 10\n",
            MINIMAL
        );
        let err = parse_config(&cfg).unwrap_err().to_string();
        assert!(err.contains("knowledge_base.timeout_secs"), "{err}");
    }

    #[test]
    fn resolve_kb_id_prefers_explicit() {
        let mut kb = KnowledgeBaseConfig::default();
        assert!(kb.resolve_kb_id(None).is_err());
        kb.kb_id = Some("KB1".into());
        assert_eq!(kb.resolve_kb_id(None).unwrap(), "KB1");
        assert_eq!(kb.resolve_kb_id(Some("KB2".into())).unwrap(), "KB2");
    }
}
