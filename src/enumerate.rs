//! Deterministic target enumeration.
//!
//! Produces the fully ordered list of `(subject, service)` pairs a sweep
//! processes: subjects ascending by identifier, services in the fixed
//! order mail, calendar, chat, file-index, derived-document. Two
//! enumerations over the same inputs produce byte-identical ordering on
//! any machine — this is what makes resume meaningful without external
//! coordination.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::events;
use crate::models::{Service, Target};

/// Enumerate sweep targets for the requested subjects and services.
///
/// `derived-document` is emitted for a subject only when it was requested
/// AND file-index is either also requested or already reached a terminal
/// state in a prior run (even a PARTIAL file-index run yields a valid,
/// if incomplete, document queue).
pub async fn enumerate_targets(
    pool: &SqlitePool,
    subjects: &[String],
    services: &[Service],
) -> Result<Vec<Target>> {
    let mut subjects: Vec<String> = subjects.to_vec();
    subjects.sort();
    subjects.dedup();

    let mut targets = Vec::new();
    for subject in &subjects {
        for service in Service::ALL {
            if !services.contains(&service) {
                continue;
            }
            if service == Service::DerivedDocument
                && !services.contains(&Service::FileIndex)
                && !events::has_terminal(pool, Service::FileIndex, subject).await?
            {
                continue;
            }
            targets.push(Target {
                subject: subject.clone(),
                service,
            });
        }
    }
    Ok(targets)
}
