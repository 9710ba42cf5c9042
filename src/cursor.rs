//! The cursor store and the cursor gate.
//!
//! A cursor is a durable progress marker per `(service, subject, key)`.
//! Values are monotonically non-decreasing; the only sanctioned rewind is
//! `inlet cursors reset`. Cursors are written exclusively through
//! [`CursorGate::maybe_advance`], which refuses to write unless the
//! caller proved page exhaustion — the single rule that makes every
//! visible cursor correspond to fully captured upstream data.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::Service;

/// Compare two cursor values: numeric when both parse as integers
/// (history ids, sequence counters), lexicographic otherwise.
pub fn cursor_cmp(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

#[derive(Debug, Clone)]
pub struct CursorRow {
    pub service: String,
    pub subject: String,
    pub key: String,
    pub value: String,
    pub updated_at: i64,
}

#[derive(Clone)]
pub struct CursorStore {
    pool: SqlitePool,
}

impl CursorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, service: Service, subject: &str, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT value FROM sync_cursors WHERE service = ? AND subject = ? AND key = ?",
        )
        .bind(service.as_str())
        .bind(subject)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    /// All cursors for one `(service, subject)`, keyed for the page loop.
    pub async fn get_all(&self, service: Service, subject: &str) -> Result<BTreeMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM sync_cursors WHERE service = ? AND subject = ? ORDER BY key",
        )
        .bind(service.as_str())
        .bind(subject)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    pub async fn has_any(&self, service: Service, subject: &str) -> Result<bool> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_cursors WHERE service = ? AND subject = ?",
        )
        .bind(service.as_str())
        .bind(subject)
        .fetch_one(&self.pool)
        .await?;
        Ok(n > 0)
    }

    pub async fn list(
        &self,
        service: Option<Service>,
        subject: Option<&str>,
    ) -> Result<Vec<CursorRow>> {
        let rows: Vec<(String, String, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT service, subject, key, value, updated_at FROM sync_cursors
            WHERE (? IS NULL OR service = ?) AND (? IS NULL OR subject = ?)
            ORDER BY service, subject, key
            "#,
        )
        .bind(service.map(|s| s.as_str()))
        .bind(service.map(|s| s.as_str()))
        .bind(subject)
        .bind(subject)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(service, subject, key, value, updated_at)| CursorRow {
                service,
                subject,
                key,
                value,
                updated_at,
            })
            .collect())
    }

    /// Administrative reset: delete cursors so the next sweep re-fetches
    /// from scratch. Returns the number of rows removed.
    pub async fn reset(
        &self,
        service: Service,
        subject: &str,
        key: Option<&str>,
    ) -> Result<u64> {
        let result = match key {
            Some(k) => {
                sqlx::query(
                    "DELETE FROM sync_cursors WHERE service = ? AND subject = ? AND key = ?",
                )
                .bind(service.as_str())
                .bind(subject)
                .bind(k)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query("DELETE FROM sync_cursors WHERE service = ? AND subject = ?")
                    .bind(service.as_str())
                    .bind(subject)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }

    /// Upsert with the monotonic guard: a candidate smaller than the
    /// stored value is a silent no-op. Returns whether a write happened.
    async fn put_if_advanced(
        &self,
        service: Service,
        subject: &str,
        key: &str,
        value: &str,
    ) -> Result<bool> {
        if let Some(existing) = self.get(service, subject, key).await? {
            if cursor_cmp(value, &existing) == Ordering::Less {
                return Ok(false);
            }
        }
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (service, subject, key, value, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(service, subject, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(service.as_str())
        .bind(subject)
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }
}

/// Decides, after a page loop ends, whether progress may be recorded.
pub struct CursorGate {
    store: CursorStore,
}

impl CursorGate {
    pub fn new(store: CursorStore) -> Self {
        Self { store }
    }

    /// Advance the cursor iff the loop proved exhaustion. The caller must
    /// have committed the page's records before calling; on
    /// `exhausted == false` the skip must be logged with reason `partial`.
    pub async fn maybe_advance(
        &self,
        service: Service,
        subject: &str,
        key: &str,
        candidate: &str,
        exhausted: bool,
    ) -> Result<bool> {
        if !exhausted {
            return Ok(false);
        }
        self.store
            .put_if_advanced(service, subject, key, candidate)
            .await
    }
}
