//! Idempotent record persistence.
//!
//! One call persists one fetched page into the service's table, keyed by
//! the natural key. The whole page commits in a single transaction so a
//! kill mid-write never leaves a partially visible page. Cursors are
//! never touched here.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::models::{DocExport, DomainRecord, PersistResult, Service};

pub struct Upserter {
    pool: SqlitePool,
}

impl Upserter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert-or-update every record of one page atomically.
    /// Last-write-wins on payload columns; row identity never changes.
    pub async fn upsert_page(
        &self,
        service: Service,
        records: &[DomainRecord],
    ) -> Result<PersistResult> {
        let mut result = PersistResult::default();
        if records.is_empty() {
            return Ok(result);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for record in records {
            let payload_json = serde_json::to_string(&record.payload)?;
            let hash = payload_hash(&payload_json);

            let exists: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM {} WHERE id = ?",
                service.table()
            ))
            .bind(&record.natural_key)
            .fetch_one(&mut *tx)
            .await?;

            match service {
                Service::Mail | Service::Calendar => {
                    sqlx::query(&format!(
                        r#"
                        INSERT INTO {} (id, subject, seq, payload_json, payload_hash, fetched_at)
                        VALUES (?, ?, ?, ?, ?, ?)
                        ON CONFLICT(id) DO UPDATE SET
                            subject = excluded.subject,
                            seq = excluded.seq,
                            payload_json = excluded.payload_json,
                            payload_hash = excluded.payload_hash,
                            fetched_at = excluded.fetched_at
                        "#,
                        service.table()
                    ))
                    .bind(&record.natural_key)
                    .bind(&record.subject)
                    .bind(record.seq)
                    .bind(&payload_json)
                    .bind(&hash)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
                Service::Chat => {
                    sqlx::query(
                        r#"
                        INSERT INTO chat_messages (id, subject, space_id, seq, payload_json, payload_hash, fetched_at)
                        VALUES (?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT(id) DO UPDATE SET
                            subject = excluded.subject,
                            space_id = excluded.space_id,
                            seq = excluded.seq,
                            payload_json = excluded.payload_json,
                            payload_hash = excluded.payload_hash,
                            fetched_at = excluded.fetched_at
                        "#,
                    )
                    .bind(&record.natural_key)
                    .bind(&record.subject)
                    .bind(record.space_id.as_deref().unwrap_or(""))
                    .bind(record.seq)
                    .bind(&payload_json)
                    .bind(&hash)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
                Service::FileIndex => {
                    sqlx::query(
                        r#"
                        INSERT INTO files (id, subject, name, mime_type, seq, payload_json, payload_hash, fetched_at)
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT(id) DO UPDATE SET
                            subject = excluded.subject,
                            name = excluded.name,
                            mime_type = excluded.mime_type,
                            seq = excluded.seq,
                            payload_json = excluded.payload_json,
                            payload_hash = excluded.payload_hash,
                            fetched_at = excluded.fetched_at
                        "#,
                    )
                    .bind(&record.natural_key)
                    .bind(&record.subject)
                    .bind(&record.name)
                    .bind(record.mime_type.as_deref().unwrap_or(""))
                    .bind(record.seq)
                    .bind(&payload_json)
                    .bind(&hash)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
                Service::DerivedDocument => {
                    anyhow::bail!("derived documents are persisted via upsert_doc");
                }
            }

            if exists > 0 {
                result.updated += 1;
            } else {
                result.inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(result)
    }

    /// Insert-or-update one derived document export, keyed `(subject, doc_id)`.
    pub async fn upsert_doc(&self, subject: &str, export: &DocExport) -> Result<PersistResult> {
        let payload_json = serde_json::to_string(&export.payload)?;
        let hash = payload_hash(&payload_json);
        let now = chrono::Utc::now().timestamp();

        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM doc_exports WHERE subject = ? AND doc_id = ?",
        )
        .bind(subject)
        .bind(&export.doc_id)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO doc_exports (subject, doc_id, title, content, payload_json, payload_hash, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(subject, doc_id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                payload_json = excluded.payload_json,
                payload_hash = excluded.payload_hash,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(subject)
        .bind(&export.doc_id)
        .bind(&export.title)
        .bind(&export.content)
        .bind(&payload_json)
        .bind(&hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(if exists > 0 {
            PersistResult {
                inserted: 0,
                updated: 1,
            }
        } else {
            PersistResult {
                inserted: 1,
                updated: 0,
            }
        })
    }
}

fn payload_hash(payload_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload_json.as_bytes());
    format!("{:x}", hasher.finalize())
}
