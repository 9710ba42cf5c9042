//! The derived-document sub-pipeline.
//!
//! A second-order collector: its work queue is the set of document
//! identifiers already committed by the file-index paginator for a
//! subject (filtered to the configured document MIME type) — it performs
//! no independent discovery. Each document costs two upstream calls
//! (metadata + content export), so the stage runs last, sequentially,
//! and reports one aggregated `DOCS` line per subject instead of
//! per-page logging.
//!
//! The `docs:complete` cursor is written only when every discovered
//! document is covered (exported now, exported fresh enough earlier, or
//! vanished upstream). The discovered count is read live from the files
//! table, never snapshotted, so documents indexed after a completed docs
//! run are picked up by the next sweep.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::client::DocClient;
use crate::config::Config;
use crate::cursor::CursorGate;
use crate::error::{ErrorClass, RetryPolicy};
use crate::events::DocsSummary;
use crate::models::Service;
use crate::upsert::Upserter;

/// Document ids for a subject, in the fixed deterministic queue order.
pub async fn discovered_docs(
    pool: &SqlitePool,
    config: &Config,
    subject: &str,
) -> Result<Vec<String>> {
    let ids: Vec<String> =
        sqlx::query_scalar(
            "SELECT id FROM files WHERE subject = ? AND mime_type = ? ORDER BY seq, id",
        )
            .bind(subject)
            .bind(&config.docs.mime_type)
            .fetch_all(pool)
            .await?;
    Ok(ids)
}

/// Run the docs stage for one subject. Failures are per-document and
/// never abort the subject's queue; they only withhold `docs:complete`.
pub async fn run_docs(
    pool: &SqlitePool,
    gate: &CursorGate,
    client: &dyn DocClient,
    upserter: &Upserter,
    config: &Config,
    subject: &str,
    doc_budget: Option<u64>,
    retry: &RetryPolicy,
) -> Result<DocsSummary> {
    let discovered = discovered_docs(pool, config, subject).await?;
    let discovered_count = discovered.len() as u64;

    let mut summary = DocsSummary {
        subject: subject.to_string(),
        ..Default::default()
    };

    let max_age = config.docs.max_export_age_secs;
    let fresh_floor = chrono::Utc::now().timestamp() - max_age;
    let mut truncated = false;

    for doc_id in &discovered {
        let fetched_at: Option<i64> = sqlx::query_scalar(
            "SELECT fetched_at FROM doc_exports WHERE subject = ? AND doc_id = ?",
        )
        .bind(subject)
        .bind(doc_id)
        .fetch_optional(pool)
        .await?;

        if let Some(ts) = fetched_at {
            if max_age == 0 || ts >= fresh_floor {
                summary.skipped_already_done += 1;
                continue;
            }
        }

        if let Some(budget) = doc_budget {
            if summary.attempted >= budget {
                truncated = true;
                break;
            }
        }
        summary.attempted += 1;

        let mut attempt = 0u32;
        let export = loop {
            match client.fetch_doc(subject, doc_id).await {
                Ok(export) => break Some(export),
                Err(err) => match retry.delay_for(&err, attempt) {
                    Some(delay) => {
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        match err.class() {
                            ErrorClass::Missing404 => summary.missing_404 += 1,
                            ErrorClass::Transient5xx => summary.transient_5xx += 1,
                            ErrorClass::RateLimit => summary.rate_limit += 1,
                            ErrorClass::OtherErr => summary.other_err += 1,
                        }
                        break None;
                    }
                },
            }
        };

        if let Some(export) = export {
            upserter.upsert_doc(subject, &export).await?;
            summary.ok += 1;
        }
    }

    // A vanished document counts as covered: it cannot block completion.
    let processed = summary.ok + summary.missing_404 + summary.skipped_already_done;
    summary.partial = truncated || processed != discovered_count;

    if !summary.partial {
        summary.cursor_written = gate
            .maybe_advance(
                Service::DerivedDocument,
                subject,
                "docs:complete",
                &discovered_count.to_string(),
                true,
            )
            .await?;
    }

    Ok(summary)
}
