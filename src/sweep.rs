//! Sweep orchestration.
//!
//! Iterates the enumerated targets in order, resume-skips targets that
//! already reached COMPLETE, drives the page loop for primary services
//! and the docs stage for derived documents, and emits one structured
//! event per state transition. A single target's failure never aborts
//! the sweep; the aggregate verdict decides the exit status.
//!
//! Per-target lifecycle: `NOT_STARTED → IN_PROGRESS → {COMPLETE |
//! PARTIAL | ERR:<class>}`. `IN_PROGRESS` exists only while this process
//! holds the target; after a kill it is reinterpreted from the cursor
//! store and the run-status feed at the next start.

use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::client::ClientSet;
use crate::config::Config;
use crate::cursor::{CursorGate, CursorStore};
use crate::db;
use crate::docs;
use crate::enumerate::enumerate_targets;
use crate::error::{ErrorClass, RetryPolicy};
use crate::events::{self, Phase, SweepEvent};
use crate::models::{Service, SweepReport, Target, TargetState};
use crate::paginate::{run_page_loop, LoopOutcome};
use crate::upsert::Upserter;

#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub services: Vec<Service>,
    /// Skip targets that already reached COMPLETE (default). Off, every
    /// target re-runs incrementally from its stored cursor.
    pub resume: bool,
    /// Unlimited pagination instead of the configured budgets.
    pub exhaust: bool,
    pub page_budget: Option<u64>,
    pub doc_budget: Option<u64>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            services: Service::PRIMARY.to_vec(),
            resume: true,
            exhaust: false,
            page_budget: None,
            doc_budget: None,
        }
    }
}

/// Reconstruct a target's state from the cursor store and the run-status
/// feed. There is no in-memory global: this is everything resume needs.
pub async fn target_state(
    pool: &SqlitePool,
    store: &CursorStore,
    config: &Config,
    subject: &str,
    service: Service,
) -> Result<TargetState> {
    let end = events::last_end(pool, service, subject).await?;

    if service == Service::DerivedDocument {
        let cursor = store.get(service, subject, "docs:complete").await?;
        let discovered = docs::discovered_docs(pool, config, subject).await?.len() as i64;
        return Ok(match (&end, &cursor) {
            (Some(e), Some(v))
                if e.ok && !e.partial && v.parse::<i64>().unwrap_or(-1) >= discovered =>
            {
                TargetState::Complete
            }
            (None, None) => TargetState::NotStarted,
            (Some(e), _) if !e.ok && !e.partial && e.err != "none" => {
                TargetState::Err(e.err.clone())
            }
            _ => TargetState::Partial,
        });
    }

    let has_cursor = store.has_any(service, subject).await?;
    Ok(match end {
        // COMPLETE needs both the terminal-success record and a cursor.
        Some(e) if e.ok && !e.partial && has_cursor => TargetState::Complete,
        Some(e) if !e.ok && !e.partial && e.err != "none" => TargetState::Err(e.err),
        Some(_) => TargetState::Partial,
        None if has_cursor => TargetState::Partial,
        None => TargetState::NotStarted,
    })
}

/// Run one sweep over the requested services.
pub async fn run_sweep(
    config: &Config,
    clients: &ClientSet,
    opts: &SweepOptions,
) -> Result<SweepReport> {
    let pool = db::connect(config).await?;
    let run_id = Uuid::new_v4().to_string();

    let store = CursorStore::new(pool.clone());
    let gate = CursorGate::new(CursorStore::new(pool.clone()));
    let upserter = Upserter::new(pool.clone());
    let retry = RetryPolicy::from_config(&config.sweep);

    let page_budget = (!opts.exhaust).then(|| opts.page_budget.unwrap_or(config.sweep.page_budget));
    let doc_budget = (!opts.exhaust).then(|| opts.doc_budget.unwrap_or(config.sweep.doc_budget));

    let targets = enumerate_targets(&pool, &config.sweep.subjects, &opts.services).await?;
    let mut report = SweepReport {
        total: targets.len() as u64,
        ..Default::default()
    };

    for target in &targets {
        if opts.resume {
            let state =
                target_state(&pool, &store, config, &target.subject, target.service).await?;
            if state == TargetState::Complete {
                report.attempted += 1;
                report.complete += 1;
                report.skipped += 1;
                continue;
            }
        }

        match target.service {
            Service::DerivedDocument => {
                run_docs_target(
                    &pool, &gate, clients, &upserter, config, &run_id, target, doc_budget, &retry,
                    &mut report,
                )
                .await?;
            }
            service => {
                run_primary_target(
                    &pool, &store, &gate, clients, &upserter, &run_id, target, service,
                    page_budget, &retry, &mut report,
                )
                .await?;
            }
        }
    }

    println!("sweep {}", run_id);
    println!("  targets: {}", report.total);
    println!(
        "  complete: {} (skipped as already complete: {})",
        report.complete, report.skipped
    );
    println!("  partial: {}", report.partial);
    println!("  errors: {}", report.errors);
    println!("{}", if report.done() { "ok" } else { "incomplete" });

    pool.close().await;
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn run_primary_target(
    pool: &SqlitePool,
    store: &CursorStore,
    gate: &CursorGate,
    clients: &ClientSet,
    upserter: &Upserter,
    run_id: &str,
    target: &Target,
    service: Service,
    page_budget: Option<u64>,
    retry: &RetryPolicy,
    report: &mut SweepReport,
) -> Result<()> {
    let subject = target.subject.as_str();
    events::emit(pool, &SweepEvent::new(run_id, service, subject, Phase::Start)).await?;

    let start_cursors = store.get_all(service, subject).await?;
    let client = clients.source(service)?;
    let result = run_page_loop(
        client.as_ref(),
        upserter,
        subject,
        start_cursors,
        page_budget,
        retry,
    )
    .await?;

    report.attempted += 1;
    match result.outcome {
        LoopOutcome::Exhausted => {
            if result.cursors.is_empty() {
                if store.has_any(service, subject).await? {
                    let mut skip = SweepEvent::new(run_id, service, subject, Phase::CursorSkip);
                    skip.count = result.records;
                    skip.detail = "no-candidate".to_string();
                    events::emit(pool, &skip).await?;
                } else {
                    // Empty feed, first completion: record value "0" so
                    // COMPLETE is durable across restarts.
                    let key = service.default_cursor_key();
                    gate.maybe_advance(service, subject, key, "0", true).await?;
                    let mut write = SweepEvent::new(run_id, service, subject, Phase::CursorWrite);
                    write.count = result.records;
                    write.detail = format!("{}=0", key);
                    events::emit(pool, &write).await?;
                }
            } else {
                for (key, value) in &result.cursors {
                    let written = gate.maybe_advance(service, subject, key, value, true).await?;
                    let mut event = SweepEvent::new(
                        run_id,
                        service,
                        subject,
                        if written {
                            Phase::CursorWrite
                        } else {
                            Phase::CursorSkip
                        },
                    );
                    event.count = result.records;
                    event.detail = if written {
                        format!("{}={}", key, value)
                    } else {
                        "monotonic".to_string()
                    };
                    events::emit(pool, &event).await?;
                }
            }

            let mut end = SweepEvent::new(run_id, service, subject, Phase::End);
            end.count = result.records;
            events::emit(pool, &end).await?;
            report.complete += 1;
        }
        LoopOutcome::Partial { reason, class } => {
            let mut skip = SweepEvent::new(run_id, service, subject, Phase::CursorSkip);
            skip.ok = false;
            skip.partial = true;
            skip.err = class;
            skip.count = result.records;
            skip.detail = "partial".to_string();
            events::emit(pool, &skip).await?;

            let mut end = SweepEvent::new(run_id, service, subject, Phase::End);
            end.ok = false;
            end.partial = true;
            end.err = class;
            end.count = result.records;
            end.detail = events::detail_token(&reason);
            events::emit(pool, &end).await?;
            report.partial += 1;
        }
        LoopOutcome::Failed { class, detail } => {
            let mut skip = SweepEvent::new(run_id, service, subject, Phase::CursorSkip);
            skip.ok = false;
            skip.err = Some(class);
            skip.count = result.records;
            skip.detail = "error".to_string();
            events::emit(pool, &skip).await?;

            let mut end = SweepEvent::new(run_id, service, subject, Phase::End);
            end.ok = false;
            end.err = Some(class);
            end.count = result.records;
            end.detail = events::detail_token(&detail);
            events::emit(pool, &end).await?;
            report.errors += 1;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_docs_target(
    pool: &SqlitePool,
    gate: &CursorGate,
    clients: &ClientSet,
    upserter: &Upserter,
    config: &Config,
    run_id: &str,
    target: &Target,
    doc_budget: Option<u64>,
    retry: &RetryPolicy,
    report: &mut SweepReport,
) -> Result<()> {
    let subject = target.subject.as_str();
    report.attempted += 1;

    // Never start before file-index reached a terminal state for this
    // subject, in this run or a prior one.
    if !events::has_terminal(pool, Service::FileIndex, subject).await? {
        let mut summary = events::DocsSummary {
            subject: subject.to_string(),
            ..Default::default()
        };
        summary.partial = true;
        println!("{}", summary.line());

        let mut end = SweepEvent::new(run_id, Service::DerivedDocument, subject, Phase::End);
        end.ok = false;
        end.partial = true;
        end.detail = "file-index-pending".to_string();
        events::insert(pool, &end).await?;
        report.partial += 1;
        return Ok(());
    }

    let client = clients.docs()?;
    let summary = docs::run_docs(
        pool,
        gate,
        client.as_ref(),
        upserter,
        config,
        subject,
        doc_budget,
        retry,
    )
    .await?;
    println!("{}", summary.line());

    let mut end = SweepEvent::new(run_id, Service::DerivedDocument, subject, Phase::End);
    end.ok = !summary.partial;
    end.count = summary.attempted;
    end.partial = summary.partial;
    end.err = if summary.other_err > 0 {
        Some(ErrorClass::OtherErr)
    } else if summary.transient_5xx > 0 {
        Some(ErrorClass::Transient5xx)
    } else if summary.rate_limit > 0 {
        Some(ErrorClass::RateLimit)
    } else {
        None
    };
    events::insert(pool, &end).await?;

    if summary.partial {
        report.partial += 1;
    } else {
        report.complete += 1;
    }
    Ok(())
}
