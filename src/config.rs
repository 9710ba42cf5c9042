use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub sweep: SweepConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub docs: DocsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Sweep-wide knobs: the subject set, pagination budgets, and the bounded
/// retry policy for transient upstream failures.
#[derive(Debug, Deserialize, Clone)]
pub struct SweepConfig {
    /// Identities the sweep operates on behalf of. Order in the file does
    /// not matter; targets are always enumerated in sorted order.
    pub subjects: Vec<String>,
    /// Pages fetched per target when not running with `--exhaust`.
    #[serde(default = "default_page_budget")]
    pub page_budget: u64,
    /// Documents exported per subject when not running with `--exhaust`.
    #[serde(default = "default_doc_budget")]
    pub doc_budget: u64,
    /// Retries per fetch for transient_5xx / rate_limit classes.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_page_budget() -> u64 {
    25
}
fn default_doc_budget() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    4
}
fn default_backoff_ms() -> u64 {
    250
}
fn default_max_backoff_ms() -> u64 {
    10_000
}

/// Which upstream provider backs the client traits.
///
/// `replay` reads deterministic JSON page fixtures from `fixture_root`;
/// live HTTP providers register behind the same traits.
#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub fixture_root: Option<PathBuf>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            fixture_root: None,
        }
    }
}

fn default_provider() -> String {
    "replay".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    /// MIME type that marks a file-index row as an exportable document.
    #[serde(default = "default_doc_mime")]
    pub mime_type: String,
    /// A doc export older than this is re-fetched on the next docs run.
    /// Zero disables the age check: any existing row counts as done.
    #[serde(default = "default_max_export_age")]
    pub max_export_age_secs: i64,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            mime_type: default_doc_mime(),
            max_export_age_secs: default_max_export_age(),
        }
    }
}

fn default_doc_mime() -> String {
    "application/vnd.document".to_string()
}
fn default_max_export_age() -> i64 {
    30 * 24 * 3600
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.sweep.subjects.is_empty() {
        anyhow::bail!("sweep.subjects must not be empty");
    }
    if config.sweep.page_budget == 0 {
        anyhow::bail!("sweep.page_budget must be > 0");
    }
    if config.sweep.doc_budget == 0 {
        anyhow::bail!("sweep.doc_budget must be > 0");
    }
    if config.sweep.backoff_ms == 0 {
        anyhow::bail!("sweep.backoff_ms must be > 0");
    }
    if config.docs.max_export_age_secs < 0 {
        anyhow::bail!("docs.max_export_age_secs must be >= 0");
    }

    match config.sources.provider.as_str() {
        "replay" => {
            if config.sources.fixture_root.is_none() {
                anyhow::bail!("sources.fixture_root must be set when provider is 'replay'");
            }
        }
        other => anyhow::bail!("Unknown sources provider: '{}'. Must be replay.", other),
    }

    Ok(config)
}
