//! Structured log lines and the run-status feed.
//!
//! Every target state transition produces exactly one `SWEEP` line on
//! stdout, and the derived-document stage produces exactly one `DOCS`
//! line per subject. The formats are consumed by external verification
//! tooling and must remain exact. Each line is mirrored into the
//! `sweep_events` table, which external layers read as the run-status
//! feed and which the resume logic inspects at sweep start.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::error::ErrorClass;
use crate::models::Service;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    End,
    CursorWrite,
    CursorSkip,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Start => "START",
            Phase::End => "END",
            Phase::CursorWrite => "CURSOR_WRITE",
            Phase::CursorSkip => "CURSOR_SKIP",
        }
    }
}

/// One target state transition.
#[derive(Debug, Clone)]
pub struct SweepEvent {
    pub run_id: String,
    pub service: Service,
    pub subject: String,
    pub phase: Phase,
    pub ok: bool,
    pub count: u64,
    pub partial: bool,
    pub err: Option<ErrorClass>,
    pub detail: String,
}

impl SweepEvent {
    pub fn new(run_id: &str, service: Service, subject: &str, phase: Phase) -> Self {
        Self {
            run_id: run_id.to_string(),
            service,
            subject: subject.to_string(),
            phase,
            ok: true,
            count: 0,
            partial: false,
            err: None,
            detail: "-".to_string(),
        }
    }

    /// The exact parseable line format.
    pub fn line(&self) -> String {
        format!(
            "SWEEP service={} subject={} phase={} ok={} count={} partial={} err={} detail={}",
            self.service,
            self.subject,
            self.phase.as_str(),
            self.ok as u8,
            self.count,
            self.partial as u8,
            self.err.map(|c| c.as_str()).unwrap_or("none"),
            self.detail,
        )
    }
}

/// Free-form text folded into the single-token `detail` field. The line
/// format is whitespace-delimited, so embedded whitespace is rewritten.
pub fn detail_token(text: &str) -> String {
    let token: String = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    if token.is_empty() {
        "-".to_string()
    } else {
        token
    }
}

/// Print one event and append it to the run-status feed.
pub async fn emit(pool: &SqlitePool, event: &SweepEvent) -> Result<()> {
    println!("{}", event.line());
    insert(pool, event).await
}

/// Append to the feed without printing (used for the derived-document
/// terminal record, whose printed form is the aggregated `DOCS` line).
pub async fn insert(pool: &SqlitePool, event: &SweepEvent) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO sweep_events (run_id, service, subject, phase, ok, count, partial, err, detail, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.run_id)
    .bind(event.service.as_str())
    .bind(&event.subject)
    .bind(event.phase.as_str())
    .bind(event.ok as i64)
    .bind(event.count as i64)
    .bind(event.partial as i64)
    .bind(event.err.map(|c| c.as_str()).unwrap_or("none"))
    .bind(&event.detail)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// The most recent terminal (`END`) record for a target, if any.
#[derive(Debug, Clone)]
pub struct EndInfo {
    pub ok: bool,
    pub partial: bool,
    pub err: String,
}

pub async fn last_end(
    pool: &SqlitePool,
    service: Service,
    subject: &str,
) -> Result<Option<EndInfo>> {
    let row: Option<(i64, i64, String)> = sqlx::query_as(
        r#"
        SELECT ok, partial, err FROM sweep_events
        WHERE service = ? AND subject = ? AND phase = 'END'
        ORDER BY id DESC LIMIT 1
        "#,
    )
    .bind(service.as_str())
    .bind(subject)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(ok, partial, err)| EndInfo {
        ok: ok != 0,
        partial: partial != 0,
        err,
    }))
}

/// Whether the target ever reached a terminal state, in any run. Even a
/// PARTIAL or ERR terminal counts: the rows it committed are valid.
pub async fn has_terminal(pool: &SqlitePool, service: Service, subject: &str) -> Result<bool> {
    Ok(last_end(pool, service, subject).await?.is_some())
}

/// Aggregated counters for one subject's derived-document run.
#[derive(Debug, Clone, Default)]
pub struct DocsSummary {
    pub subject: String,
    pub attempted: u64,
    pub ok: u64,
    pub missing_404: u64,
    pub transient_5xx: u64,
    pub rate_limit: u64,
    pub other_err: u64,
    pub skipped_already_done: u64,
    pub partial: bool,
    pub cursor_written: bool,
}

impl DocsSummary {
    /// The exact aggregated line — one per subject, never per document.
    pub fn line(&self) -> String {
        format!(
            "DOCS subject={} attempted={} ok={} missing_404={} transient_5xx={} rate_limit={} other_err={} skipped_already_done={} partial={} cursor_written={}",
            self.subject,
            self.attempted,
            self.ok,
            self.missing_404,
            self.transient_5xx,
            self.rate_limit,
            self.other_err,
            self.skipped_already_done,
            self.partial as u8,
            self.cursor_written as u8,
        )
    }
}
