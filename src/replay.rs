//! Fixture-backed replay provider.
//!
//! Replays deterministic JSON fixtures from disk behind the
//! [`SourceClient`]/[`DocClient`] traits, so the whole engine is
//! exercisable end to end without live credentials. Fixtures model the
//! upstream contract faithfully: provider-issued sequence counters,
//! token pagination, change-feed catch-up, and injectable failures.
//!
//! # Layout
//!
//! ```text
//! <fixture_root>/<service>/<subject>.json   # one feed per target
//! <fixture_root>/docs/<subject>/<doc_id>.json
//! ```
//!
//! # Feed fixture
//!
//! ```json
//! {
//!   "page_size": 100,
//!   "head": 250,
//!   "fail": { "class": "transient_5xx", "page": 2, "times": 1 },
//!   "records": [
//!     { "id": "m-001", "seq": 1, "payload": { "snippet": "hi" } }
//!   ]
//! }
//! ```
//!
//! `seq` is the provider counter; records with `seq` at or below the
//! stored cursor are not replayed. `head` is the change-feed head id
//! reported at catch-up (defaults to the max `seq` in the feed). A
//! `fail` spec makes the given page (1-based) error `times` times before
//! succeeding; `times = 0` fails on every attempt. A missing feed file
//! is an empty, immediately exhausted feed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::client::{DocClient, PageRequest, PageResponse, SourceClient};
use crate::error::FetchError;
use crate::models::{DocExport, DomainRecord, Service};

fn default_page_size() -> usize {
    100
}
fn default_fail_page() -> u64 {
    1
}
fn default_fail_times() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, Default)]
struct FeedFixture {
    #[serde(default = "default_page_size")]
    page_size: usize,
    #[serde(default)]
    head: Option<i64>,
    #[serde(default)]
    fail: Option<FailSpec>,
    #[serde(default)]
    records: Vec<FixtureRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct FixtureRecord {
    id: String,
    seq: i64,
    #[serde(default)]
    space_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct FailSpec {
    class: String,
    #[serde(default = "default_fail_page")]
    page: u64,
    #[serde(default = "default_fail_times")]
    times: u32,
    #[serde(default)]
    retry_after_ms: Option<u64>,
}

fn make_error(class: &str, what: &str, retry_after_ms: Option<u64>) -> FetchError {
    match class {
        "missing_404" => FetchError::Missing(what.to_string()),
        "transient_5xx" => FetchError::Upstream { status: 503 },
        "rate_limit" => FetchError::RateLimit {
            retry_after: retry_after_ms.map(Duration::from_millis),
        },
        other => FetchError::Other(anyhow::anyhow!("injected failure: {}", other)),
    }
}

struct Feed {
    fixture: FeedFixture,
    fail_used: u32,
}

/// Replay source for one primary service.
pub struct ReplaySource {
    service: Service,
    root: PathBuf,
    feeds: Mutex<HashMap<String, Feed>>,
}

impl ReplaySource {
    pub fn new(service: Service, root: PathBuf) -> Self {
        Self {
            service,
            root,
            feeds: Mutex::new(HashMap::new()),
        }
    }

    fn load_feed(&self, subject: &str) -> Result<FeedFixture, FetchError> {
        let path = self
            .root
            .join(self.service.as_str())
            .join(format!("{}.json", subject));
        if !path.exists() {
            return Ok(FeedFixture::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read fixture: {}", path.display()))
            .map_err(FetchError::Other)?;
        let fixture: FeedFixture = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse fixture: {}", path.display()))
            .map_err(FetchError::Other)?;
        Ok(fixture)
    }

    /// The cursor floor for one record, per this service's strategy.
    fn floor_for(&self, cursors: &std::collections::BTreeMap<String, String>, rec: &FixtureRecord) -> i64 {
        let key = match self.service {
            Service::Chat => {
                let space = rec.space_id.as_deref().unwrap_or("");
                return cursors
                    .get(&format!("space:{}:last-time", space))
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
            }
            other => other.default_cursor_key().to_string(),
        };
        cursors.get(&key).and_then(|v| v.parse().ok()).unwrap_or(0)
    }
}

#[async_trait]
impl SourceClient for ReplaySource {
    fn service(&self) -> Service {
        self.service
    }

    async fn fetch_page(
        &self,
        subject: &str,
        req: PageRequest,
    ) -> Result<PageResponse, FetchError> {
        let mut feeds = self.feeds.lock().expect("replay feed lock poisoned");
        if !feeds.contains_key(subject) {
            let fixture = self.load_feed(subject)?;
            feeds.insert(
                subject.to_string(),
                Feed {
                    fixture,
                    fail_used: 0,
                },
            );
        }
        let feed = feeds.get_mut(subject).expect("feed just inserted");
        let fixture = &feed.fixture;

        // Window: records past the stored cursor, in provider order.
        let mut selected: Vec<&FixtureRecord> = fixture
            .records
            .iter()
            .filter(|r| r.seq > self.floor_for(&req.cursors, r))
            .collect();
        selected.sort_by(|a, b| (a.seq, &a.id).cmp(&(b.seq, &b.id)));

        let page_size = fixture.page_size.max(1);
        let offset: usize = req
            .page_token
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0)
            .min(selected.len());
        let page_number = (offset / page_size) as u64 + 1;

        if let Some(fail) = &fixture.fail {
            if fail.page == page_number && (fail.times == 0 || feed.fail_used < fail.times) {
                let err = make_error(
                    &fail.class,
                    &format!("{}/{} page {}", self.service, subject, page_number),
                    fail.retry_after_ms,
                );
                feed.fail_used += 1;
                return Err(err);
            }
        }

        let end = (offset + page_size).min(selected.len());
        let page = &selected[offset..end];

        let records: Vec<DomainRecord> = page
            .iter()
            .map(|r| DomainRecord {
                natural_key: r.id.clone(),
                subject: subject.to_string(),
                seq: r.seq,
                space_id: r.space_id.clone(),
                name: r.name.clone(),
                mime_type: r.mime_type.clone(),
                payload: r.payload.clone(),
            })
            .collect();

        let next_page_token = if end < selected.len() {
            Some(end.to_string())
        } else {
            None
        };
        let exhausted = next_page_token.is_none();

        let mut cursors = std::collections::BTreeMap::new();
        match self.service {
            Service::Mail => {
                // Change feed: per-page candidates track processed ids;
                // catch-up reports the head id, never the last processed.
                if let Some(max) = page.iter().map(|r| r.seq).max() {
                    cursors.insert("history-id".to_string(), max.to_string());
                }
                if exhausted {
                    let feed_max = fixture.records.iter().map(|r| r.seq).max().unwrap_or(0);
                    // Prefer the larger value: re-scan is safe, a gap is not.
                    let head = fixture.head.unwrap_or(feed_max).max(feed_max);
                    if head > 0 {
                        cursors.insert("history-id".to_string(), head.to_string());
                    }
                }
            }
            Service::Chat => {
                for r in page {
                    let key = format!("space:{}:last-time", r.space_id.as_deref().unwrap_or(""));
                    let entry = cursors.entry(key).or_insert_with(|| r.seq.to_string());
                    if entry.parse::<i64>().unwrap_or(0) < r.seq {
                        *entry = r.seq.to_string();
                    }
                }
            }
            Service::Calendar | Service::FileIndex => {
                if let Some(max) = page.iter().map(|r| r.seq).max() {
                    cursors.insert("last-modified-time".to_string(), max.to_string());
                }
            }
            Service::DerivedDocument => {}
        }

        Ok(PageResponse {
            records,
            next_page_token,
            cursors,
            exhausted,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DocFixture {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    fail: Option<DocFailSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct DocFailSpec {
    class: String,
    #[serde(default = "default_fail_times")]
    times: u32,
    #[serde(default)]
    retry_after_ms: Option<u64>,
}

/// Replay client for the derived-document stage.
pub struct ReplayDocs {
    root: PathBuf,
    fail_used: Mutex<HashMap<(String, String), u32>>,
}

impl ReplayDocs {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            fail_used: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DocClient for ReplayDocs {
    async fn fetch_doc(&self, subject: &str, doc_id: &str) -> Result<DocExport, FetchError> {
        let path = self
            .root
            .join("docs")
            .join(subject)
            .join(format!("{}.json", doc_id));
        if !path.exists() {
            return Err(FetchError::Missing(format!("doc {}/{}", subject, doc_id)));
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read doc fixture: {}", path.display()))
            .map_err(FetchError::Other)?;
        let fixture: DocFixture = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse doc fixture: {}", path.display()))
            .map_err(FetchError::Other)?;

        if let Some(fail) = &fixture.fail {
            let mut used = self.fail_used.lock().expect("doc fail lock poisoned");
            let counter = used
                .entry((subject.to_string(), doc_id.to_string()))
                .or_insert(0);
            if fail.times == 0 || *counter < fail.times {
                *counter += 1;
                return Err(make_error(
                    &fail.class,
                    &format!("doc {}/{}", subject, doc_id),
                    fail.retry_after_ms,
                ));
            }
        }

        Ok(DocExport {
            doc_id: doc_id.to_string(),
            title: fixture.title,
            content: fixture.content,
            payload: fixture.payload,
        })
    }
}
