//! # Inlet
//!
//! A resumable, gap-free sync engine that ingests workspace sources
//! (mail, calendar, chat, file index, and derived document exports) into
//! a local SQLite store.
//!
//! Inlet paginates each upstream service page by page, persists every
//! fetched page before requesting the next one, and advances a durable
//! sync cursor only when a source is provably exhausted. Killing the
//! process at any instant leaves the store in a state where every cursor
//! reflects fully captured data, so a restarted sweep converges without
//! gaps, duplicates, or manual cleanup.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌───────────┐   ┌────────────┐
//! │ Enumerator │──▶│   Sweep   │──▶│ Paginator │──▶│  Upserter  │
//! │ (targets)  │   │ (resume)  │   │  (pages)  │   │  (SQLite)  │
//! └────────────┘   └───────────┘   └─────┬─────┘   └─────┬──────┘
//!                                        │               │
//!                                        ▼               ▼
//!                                  ┌───────────┐   ┌────────────┐
//!                                  │CursorGate │──▶│sync_cursors│
//!                                  │(exhausted)│   │ (durable)  │
//!                                  └───────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! inlet init                          # create database
//! inlet sweep                         # sync the four primary services
//! inlet sweep --services all --exhaust
//! inlet status                        # derived per-target states
//! inlet cursors list                  # inspect sync progress
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`client`] | Upstream client traits and provider registry |
//! | [`replay`] | Fixture-backed deterministic provider |
//! | [`error`] | Failure classification and retry policy |
//! | [`cursor`] | Cursor store and cursor gate |
//! | [`upsert`] | Idempotent per-page record persistence |
//! | [`enumerate`] | Deterministic target enumeration |
//! | [`paginate`] | The shared page loop |
//! | [`sweep`] | Sweep orchestration and resume |
//! | [`docs`] | Derived-document sub-pipeline |
//! | [`events`] | Structured log lines and the run-status feed |
//! | [`status`] | Derived target state reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod client;
pub mod config;
pub mod cursor;
pub mod db;
pub mod docs;
pub mod enumerate;
pub mod error;
pub mod events;
pub mod migrate;
pub mod models;
pub mod paginate;
pub mod replay;
pub mod status;
pub mod sweep;
pub mod upsert;
