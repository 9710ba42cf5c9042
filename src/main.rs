//! # Inlet CLI (`inlet`)
//!
//! The `inlet` binary drives incremental collection sweeps across a
//! subject's upstream services (mail, calendar, chat, file index, and
//! derived document exports) into a local SQLite database.
//!
//! ## Usage
//!
//! ```bash
//! inlet --config ./config/inlet.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `inlet init` | Create the SQLite database and run schema migrations |
//! | `inlet sweep` | Run one sweep over the configured subjects |
//! | `inlet status` | Show table row counts and derived per-target states |
//! | `inlet cursors list` | List stored sync cursors |
//! | `inlet cursors reset` | Delete cursors so the next sweep re-fetches |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! inlet init --config ./config/inlet.toml
//!
//! # Sweep every service for every configured subject
//! inlet sweep
//!
//! # Sweep only mail and chat, ignoring completion markers
//! inlet sweep --services mail,chat --no-resume
//!
//! # Run without pagination budgets until every source is exhausted
//! inlet sweep --exhaust
//!
//! # Rewind one subject's mail cursor
//! inlet cursors reset --service mail --subject alice@example.com
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use inlet::client::ClientSet;
use inlet::config;
use inlet::cursor::CursorStore;
use inlet::db;
use inlet::migrate;
use inlet::models::Service;
use inlet::status;
use inlet::sweep::{run_sweep, SweepOptions};

/// Inlet CLI — incremental collection of a subject's upstream services
/// into a local SQLite database, with durable resume.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/inlet.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "inlet",
    about = "Inlet — incremental multi-service collection with durable resume",
    version,
    long_about = "Inlet sweeps a set of subjects across paginated upstream services (mail, \
    calendar, chat, file index) plus a derived-document export stage, persisting every page \
    before fetching the next and advancing sync cursors only on proven exhaustion. A killed \
    or failed run never loses committed progress: the next sweep resumes from stored cursors."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/inlet.toml`. Subjects, budgets, retry policy,
    /// and the sources provider are read from this file.
    #[arg(long, global = true, default_value = "./config/inlet.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (per-service record tables, doc_exports, sync_cursors,
    /// sweep_events). This command is idempotent.
    Init,

    /// Run one sweep over the configured subjects.
    ///
    /// Targets are enumerated deterministically (subjects sorted, services
    /// in fixed order) and processed sequentially. Exits non-zero when any
    /// target ends PARTIAL or ERR, so schedulers re-run until convergence.
    Sweep {
        /// Comma-separated services to sweep: `all` or any of `mail`,
        /// `calendar`, `chat`, `file-index`, `derived-document`. Defaults
        /// to the four primary services; `derived-document` runs only
        /// when named explicitly or via `all`.
        #[arg(long)]
        services: Option<String>,

        /// Ignore completion markers — re-run every target incrementally
        /// from its stored cursor instead of skipping COMPLETE targets.
        #[arg(long)]
        no_resume: bool,

        /// Ignore pagination budgets and run every source to exhaustion.
        #[arg(long)]
        exhaust: bool,

        /// Override the configured per-target page budget.
        #[arg(long)]
        page_budget: Option<u64>,

        /// Override the configured per-subject document budget.
        #[arg(long)]
        doc_budget: Option<u64>,
    },

    /// Show table row counts and derived per-target states.
    Status,

    /// Inspect or rewind stored sync cursors.
    Cursors {
        #[command(subcommand)]
        action: CursorAction,
    },
}

/// Cursor management subcommands.
#[derive(Subcommand)]
enum CursorAction {
    /// List stored cursors, optionally filtered.
    List {
        /// Filter by service.
        #[arg(long)]
        service: Option<String>,

        /// Filter by subject.
        #[arg(long)]
        subject: Option<String>,
    },
    /// Delete cursors for one target so the next sweep re-fetches from
    /// scratch. The only sanctioned way to move a cursor backwards.
    Reset {
        /// Service whose cursors to delete.
        #[arg(long)]
        service: String,

        /// Subject whose cursors to delete.
        #[arg(long)]
        subject: String,

        /// Delete only this cursor key instead of all keys for the target.
        #[arg(long)]
        key: Option<String>,
    },
}

fn parse_services(spec: &str) -> anyhow::Result<Vec<Service>> {
    if spec == "all" {
        return Ok(Service::ALL.to_vec());
    }
    let mut services = Vec::new();
    for name in spec.split(',') {
        let name = name.trim();
        let service = Service::parse(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown service: '{}'", name))?;
        if !services.contains(&service) {
            services.push(service);
        }
    }
    if services.is_empty() {
        anyhow::bail!("--services must name at least one service");
    }
    Ok(services)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sweep {
            services,
            no_resume,
            exhaust,
            page_budget,
            doc_budget,
        } => {
            migrate::run_migrations(&cfg).await?;
            let services = match services {
                Some(spec) => parse_services(&spec)?,
                None => Service::PRIMARY.to_vec(),
            };
            let opts = SweepOptions {
                services,
                resume: !no_resume,
                exhaust,
                page_budget,
                doc_budget,
            };
            let clients = ClientSet::from_config(&cfg)?;
            let report = run_sweep(&cfg, &clients, &opts).await?;
            if !report.done() {
                std::process::exit(1);
            }
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Cursors { action } => match action {
            CursorAction::List { service, subject } => {
                let service = match service {
                    Some(name) => Some(
                        Service::parse(&name)
                            .ok_or_else(|| anyhow::anyhow!("Unknown service: '{}'", name))?,
                    ),
                    None => None,
                };
                let pool = db::connect(&cfg).await?;
                let store = CursorStore::new(pool.clone());
                let rows = store.list(service, subject.as_deref()).await?;
                for row in rows {
                    println!(
                        "CURSOR service={} subject={} key={} value={} updated_at={}",
                        row.service, row.subject, row.key, row.value, row.updated_at
                    );
                }
                pool.close().await;
            }
            CursorAction::Reset {
                service,
                subject,
                key,
            } => {
                let service = Service::parse(&service)
                    .ok_or_else(|| anyhow::anyhow!("Unknown service: '{}'", service))?;
                let pool = db::connect(&cfg).await?;
                let store = CursorStore::new(pool.clone());
                let removed = store.reset(service, &subject, key.as_deref()).await?;
                println!("Removed {} cursor(s).", removed);
                pool.close().await;
            }
        },
    }

    Ok(())
}
