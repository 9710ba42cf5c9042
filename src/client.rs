//! Upstream client abstractions.
//!
//! Each source paginator consumes one [`SourceClient`] per service that
//! exposes a uniform `fetch_page` returning records, continuation state,
//! and an exhaustion flag. The derived-document stage consumes a
//! [`DocClient`] that fetches one document's metadata and content export.
//!
//! HTTP and auth details live behind these traits and are out of scope
//! here; the shipped provider is [`crate::replay`], which replays
//! deterministic JSON fixtures from disk.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;
use crate::error::FetchError;
use crate::models::{DocExport, DomainRecord, Service};

/// Continuation state for one page fetch.
///
/// `cursors` are the durable values read from the cursor store for this
/// `(service, subject)`; the client uses them to position its fetch
/// window. `page_token` is the in-run continuation token and is never
/// persisted.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub cursors: BTreeMap<String, String>,
    pub page_token: Option<String>,
}

/// One fetched page.
///
/// `cursors` carries the provider-issued cursor candidates observed on
/// this page, keyed the way they will be stored (`history-id`,
/// `last-modified-time`, `space:<id>:last-time`). The paginator folds
/// them with a max-merge and hands them to the cursor gate only at
/// exhaustion. For change-feed sources the final page must carry the
/// head change id at catch-up time, not the last processed id.
#[derive(Debug, Clone, Default)]
pub struct PageResponse {
    pub records: Vec<DomainRecord>,
    pub next_page_token: Option<String>,
    pub cursors: BTreeMap<String, String>,
    pub exhausted: bool,
}

/// A paginated upstream source for one service.
#[async_trait]
pub trait SourceClient: Send + Sync {
    fn service(&self) -> Service;

    /// Fetch one page. Errors must be normalized into [`FetchError`] so
    /// the failure classifier can map them to a retry/skip/abort decision.
    async fn fetch_page(&self, subject: &str, req: PageRequest)
        -> Result<PageResponse, FetchError>;
}

/// Metadata + content export for a single document.
#[async_trait]
pub trait DocClient: Send + Sync {
    async fn fetch_doc(&self, subject: &str, doc_id: &str) -> Result<DocExport, FetchError>;
}

/// The resolved set of upstream clients for one sweep.
pub struct ClientSet {
    sources: HashMap<Service, Arc<dyn SourceClient>>,
    docs: Option<Arc<dyn DocClient>>,
}

impl ClientSet {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            docs: None,
        }
    }

    /// Resolve the provider named in the config.
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.sources.provider.as_str() {
            "replay" => {
                let root = config
                    .sources
                    .fixture_root
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("sources.fixture_root is required"))?;
                let mut set = Self::new();
                for service in Service::PRIMARY {
                    set.register_source(Arc::new(crate::replay::ReplaySource::new(
                        service,
                        root.clone(),
                    )));
                }
                set.register_docs(Arc::new(crate::replay::ReplayDocs::new(root)));
                Ok(set)
            }
            other => anyhow::bail!("Unknown sources provider: '{}'", other),
        }
    }

    pub fn register_source(&mut self, client: Arc<dyn SourceClient>) {
        self.sources.insert(client.service(), client);
    }

    pub fn register_docs(&mut self, client: Arc<dyn DocClient>) {
        self.docs = Some(client);
    }

    pub fn source(&self, service: Service) -> Result<Arc<dyn SourceClient>> {
        self.sources
            .get(&service)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no client registered for service '{}'", service))
    }

    pub fn docs(&self) -> Result<Arc<dyn DocClient>> {
        self.docs
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no document client registered"))
    }
}

impl Default for ClientSet {
    fn default() -> Self {
        Self::new()
    }
}
