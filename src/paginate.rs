//! The shared page loop.
//!
//! One loop drives every primary service: fetch a page, persist it,
//! fold its cursor candidates, then decide whether the source is
//! exhausted. Persistence happens before the next fetch (streaming, not
//! end-of-run batching) so a kill between pages loses at most the
//! in-flight page, never previously fetched ones.
//!
//! Pagination boundaries come in a small closed set of strategies rather
//! than one branching loop per service:
//!
//! - [`PageStrategy::TokenPaginated`] (chat, file index): loop while a
//!   next-page token is present; exhausted when none is returned.
//! - [`PageStrategy::ChangeFeed`] (mail): exhausted when the feed reports
//!   itself caught up to the current head; the head id at catch-up time
//!   is the cursor value, not the last processed id.
//! - [`PageStrategy::ModifiedWindow`] (calendar): token pages within a
//!   last-modified window; the cursor is the max provider-issued
//!   modification counter, never client wall-clock time.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use anyhow::Result;

use crate::client::{PageRequest, SourceClient};
use crate::cursor::cursor_cmp;
use crate::error::{ErrorClass, RetryPolicy};
use crate::models::Service;
use crate::upsert::Upserter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStrategy {
    TokenPaginated,
    ChangeFeed,
    ModifiedWindow,
}

pub fn strategy_for(service: Service) -> PageStrategy {
    match service {
        Service::Mail => PageStrategy::ChangeFeed,
        Service::Calendar => PageStrategy::ModifiedWindow,
        Service::Chat | Service::FileIndex => PageStrategy::TokenPaginated,
        // The docs stage iterates persisted rows, not pages, but shares
        // the token shape when a client needs one.
        Service::DerivedDocument => PageStrategy::TokenPaginated,
    }
}

/// Terminal signal of one page loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// No more pages; safe to advance the cursor.
    Exhausted,
    /// Loop stopped before exhaustion: budget, or a bounded error class.
    Partial {
        reason: String,
        class: Option<ErrorClass>,
    },
    /// Unclassified failure; the target resolves to `ERR:<class>`.
    Failed { class: ErrorClass, detail: String },
}

#[derive(Debug)]
pub struct PageLoopResult {
    pub outcome: LoopOutcome,
    pub pages: u64,
    pub records: u64,
    /// Per-key cursor candidates, max-merged across pages. Handed to the
    /// cursor gate only when the outcome is `Exhausted`.
    pub cursors: BTreeMap<String, String>,
}

/// Drive one `(subject, service)` against its upstream client.
pub async fn run_page_loop(
    client: &dyn SourceClient,
    upserter: &Upserter,
    subject: &str,
    start_cursors: BTreeMap<String, String>,
    page_budget: Option<u64>,
    retry: &RetryPolicy,
) -> Result<PageLoopResult> {
    let service = client.service();
    let strategy = strategy_for(service);

    let mut pages = 0u64;
    let mut records = 0u64;
    let mut cursors: BTreeMap<String, String> = BTreeMap::new();
    let mut page_token: Option<String> = None;

    let outcome = loop {
        if let Some(budget) = page_budget {
            if pages >= budget {
                break LoopOutcome::Partial {
                    reason: "page-budget".to_string(),
                    class: None,
                };
            }
        }

        let req = PageRequest {
            cursors: start_cursors.clone(),
            page_token: page_token.clone(),
        };

        let mut attempt = 0u32;
        let resp = loop {
            match client.fetch_page(subject, req.clone()).await {
                Ok(resp) => break resp,
                Err(err) => match retry.delay_for(&err, attempt) {
                    Some(delay) => {
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        let class = err.class();
                        let outcome = match class {
                            ErrorClass::OtherErr => LoopOutcome::Failed {
                                class,
                                detail: err.to_string(),
                            },
                            // 404 and exhausted retries truncate the loop
                            // without aborting the target's siblings.
                            _ => LoopOutcome::Partial {
                                reason: class.as_str().to_string(),
                                class: Some(class),
                            },
                        };
                        return Ok(PageLoopResult {
                            outcome,
                            pages,
                            records,
                            cursors,
                        });
                    }
                },
            }
        };

        // Persist before requesting the next page.
        upserter.upsert_page(service, &resp.records).await?;
        pages += 1;
        records += resp.records.len() as u64;

        for (key, value) in resp.cursors {
            match cursors.get(&key) {
                Some(existing) if cursor_cmp(&value, existing) != Ordering::Greater => {}
                _ => {
                    cursors.insert(key, value);
                }
            }
        }

        let done = match strategy {
            PageStrategy::TokenPaginated => resp.next_page_token.is_none(),
            PageStrategy::ChangeFeed | PageStrategy::ModifiedWindow => {
                resp.exhausted || resp.next_page_token.is_none()
            }
        };
        if done {
            break LoopOutcome::Exhausted;
        }
        page_token = resp.next_page_token;
    };

    Ok(PageLoopResult {
        outcome,
        pages,
        records,
        cursors,
    })
}
