//! The `status` command: a read-only view of local state.
//!
//! Prints row counts per table and the derived state of every
//! `(subject, service)` target. States are reconstructed on demand from
//! the cursor store and the run-status feed; nothing here writes.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::cursor::CursorStore;
use crate::db;
use crate::models::Service;
use crate::sweep::target_state;

const TABLES: [&str; 7] = [
    "mail_messages",
    "calendar_events",
    "chat_messages",
    "files",
    "doc_exports",
    "sync_cursors",
    "sweep_events",
];

async fn table_rows(pool: &SqlitePool, table: &str) -> Result<i64> {
    let n = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await?;
    Ok(n)
}

pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = CursorStore::new(pool.clone());

    for table in TABLES {
        let rows = table_rows(&pool, table).await?;
        println!("TABLE {} rows={}", table, rows);
    }

    let mut subjects = config.sweep.subjects.clone();
    subjects.sort();
    subjects.dedup();

    for subject in &subjects {
        for service in Service::ALL {
            let state = target_state(&pool, &store, config, subject, service).await?;
            println!("STATE service={} subject={} state={}", service, subject, state);
        }
    }

    pool.close().await;
    Ok(())
}
