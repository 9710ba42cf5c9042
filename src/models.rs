//! Core data models used throughout Inlet.
//!
//! These types represent the services, fetched records, and per-target
//! outcomes that flow through the sweep pipeline.

use std::fmt;

use serde_json::Value;

/// One upstream source. `DerivedDocument` is ordered last and depends on
/// `FileIndex` having produced rows for the same subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Service {
    Mail,
    Calendar,
    Chat,
    FileIndex,
    DerivedDocument,
}

impl Service {
    /// The four services that perform independent discovery.
    pub const PRIMARY: [Service; 4] = [
        Service::Mail,
        Service::Calendar,
        Service::Chat,
        Service::FileIndex,
    ];

    /// All services, in fixed sweep order.
    pub const ALL: [Service; 5] = [
        Service::Mail,
        Service::Calendar,
        Service::Chat,
        Service::FileIndex,
        Service::DerivedDocument,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Mail => "mail",
            Service::Calendar => "calendar",
            Service::Chat => "chat",
            Service::FileIndex => "file-index",
            Service::DerivedDocument => "derived-document",
        }
    }

    pub fn parse(s: &str) -> Option<Service> {
        match s {
            "mail" => Some(Service::Mail),
            "calendar" => Some(Service::Calendar),
            "chat" => Some(Service::Chat),
            "file-index" => Some(Service::FileIndex),
            "derived-document" => Some(Service::DerivedDocument),
            _ => None,
        }
    }

    /// Table holding this service's records.
    pub fn table(&self) -> &'static str {
        match self {
            Service::Mail => "mail_messages",
            Service::Calendar => "calendar_events",
            Service::Chat => "chat_messages",
            Service::FileIndex => "files",
            Service::DerivedDocument => "doc_exports",
        }
    }

    /// Cursor key written when a source exhausts without yielding any
    /// per-record candidate (empty feed).
    pub fn default_cursor_key(&self) -> &'static str {
        match self {
            Service::Mail => "history-id",
            Service::Calendar => "last-modified-time",
            Service::Chat => "last-time",
            Service::FileIndex => "last-modified-time",
            Service::DerivedDocument => "docs:complete",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fetched item, normalized out of the provider payload.
///
/// `natural_key` is the upstream-stable identifier; re-fetching the same
/// key updates the existing row in place. `seq` is the provider-issued
/// monotonic counter (history id, modification counter, message time) —
/// never client-observed wall-clock time.
#[derive(Debug, Clone)]
pub struct DomainRecord {
    pub natural_key: String,
    pub subject: String,
    pub seq: i64,
    /// Chat only: the space the message belongs to.
    pub space_id: Option<String>,
    /// File index only.
    pub name: Option<String>,
    /// File index only.
    pub mime_type: Option<String>,
    pub payload: Value,
}

/// One document export produced by the derived-document stage.
#[derive(Debug, Clone)]
pub struct DocExport {
    pub doc_id: String,
    pub title: Option<String>,
    pub content: String,
    pub payload: Value,
}

/// Outcome of persisting one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistResult {
    pub inserted: u64,
    pub updated: u64,
}

/// One unit of sweep work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub subject: String,
    pub service: Service,
}

/// Derived classification of a target, reconstructed from the cursor store
/// and the run-status feed. Never stored as its own table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetState {
    NotStarted,
    Complete,
    Partial,
    Err(String),
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::NotStarted => f.write_str("NOT_STARTED"),
            TargetState::Complete => f.write_str("COMPLETE"),
            TargetState::Partial => f.write_str("PARTIAL"),
            TargetState::Err(class) => write!(f, "ERR:{}", class),
        }
    }
}

/// Aggregate verdict for one sweep invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub total: u64,
    pub attempted: u64,
    pub complete: u64,
    pub skipped: u64,
    pub partial: u64,
    pub errors: u64,
}

impl SweepReport {
    /// The run is DONE iff nothing is partial, nothing errored, and every
    /// enumerated target was attempted (resume skips count as attempted:
    /// their completeness was proven before skipping).
    pub fn done(&self) -> bool {
        self.partial == 0 && self.errors == 0 && self.attempted == self.total
    }
}
