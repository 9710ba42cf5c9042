use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Every statement is idempotent.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Per-service record tables. The natural key is the provider-native id
    // and is the primary key; `seq` is the provider-issued monotonic
    // counter normalized out of the payload.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mail_messages (
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            seq INTEGER NOT NULL DEFAULT 0,
            payload_json TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            fetched_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS calendar_events (
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            seq INTEGER NOT NULL DEFAULT 0,
            payload_json TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            fetched_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_messages (
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            space_id TEXT NOT NULL DEFAULT '',
            seq INTEGER NOT NULL DEFAULT 0,
            payload_json TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            fetched_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            name TEXT,
            mime_type TEXT NOT NULL DEFAULT '',
            seq INTEGER NOT NULL DEFAULT 0,
            payload_json TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            fetched_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Derived document exports, keyed by (subject, doc_id).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS doc_exports (
            subject TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            title TEXT,
            content TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            fetched_at INTEGER NOT NULL,
            PRIMARY KEY (subject, doc_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Durable sync progress, written only by the cursor gate.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_cursors (
            service TEXT NOT NULL,
            subject TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (service, subject, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Run-status feed: one row per state transition, mirrored to stdout.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sweep_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            service TEXT NOT NULL,
            subject TEXT NOT NULL,
            phase TEXT NOT NULL,
            ok INTEGER NOT NULL,
            count INTEGER NOT NULL,
            partial INTEGER NOT NULL,
            err TEXT NOT NULL,
            detail TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_subject_mime ON files(subject, mime_type)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_subject_space ON chat_messages(subject, space_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_events_target ON sweep_events(service, subject, phase)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
