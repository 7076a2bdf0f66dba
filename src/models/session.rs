//! Client-persisted run checkpoint.
//!
//! A session records how far a run got so it can survive crashes and
//! restarts. The driver owns sessions exclusively; the coordinator never
//! reads or writes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::filter::{BatchFilter, Scope};

/// Current checkpoint schema version. Sessions persisted by other versions
/// are discarded rather than trusted.
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// Counters accumulated across a logical run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub attempted: u64,
    pub succeeded: u64,
    pub skipped: u64,
}

impl RunCounters {
    pub fn absorb(&mut self, attempted: u64, succeeded: u64, skipped: u64) {
        self.attempted += attempted;
        self.succeeded += succeeded;
        self.skipped += skipped;
    }
}

/// Why a persisted session cannot be resumed against the active filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionConflict {
    /// Persisted checkpoint was written by an unknown schema version.
    SchemaVersion { found: u32 },
    /// Session belongs to a different explicit-selection run; carries the
    /// token so the caller can offer a link back into the matching context.
    SelectionMismatch { token: String },
    /// Any other filter mismatch; the session must be discarded.
    FilterChanged,
}

/// Durable checkpoint for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub schema_version: u32,
    /// Actor id the run registered with the coordinator; a resumed run
    /// reuses it so server-side skip tallies keep accumulating.
    #[serde(default)]
    pub actor: String,
    /// Last successfully attempted item ID.
    pub cursor: u64,
    /// Filter captured when the run started.
    pub filter: BatchFilter,
    pub counters: RunCounters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(filter: BatchFilter) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            actor: String::new(),
            cursor: 0,
            filter,
            counters: RunCounters::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record progress after a successful batch result.
    pub fn checkpoint(&mut self, cursor: u64, attempted: u64, succeeded: u64, skipped: u64) {
        self.cursor = cursor;
        self.counters.absorb(attempted, succeeded, skipped);
        self.updated_at = Utc::now();
    }

    /// Compare against the filter currently implied by the caller's state.
    ///
    /// Resuming a stale cursor against a semantically different query would
    /// silently process the wrong items, so any mismatch is a conflict.
    pub fn conflict_with(&self, active: &BatchFilter) -> Option<SessionConflict> {
        if self.schema_version != SESSION_SCHEMA_VERSION {
            return Some(SessionConflict::SchemaVersion {
                found: self.schema_version,
            });
        }
        if self.filter == *active {
            return None;
        }
        match &self.filter.scope {
            Scope::Selection { token } if self.filter.scope != active.scope => {
                Some(SessionConflict::SelectionMismatch {
                    token: token.clone(),
                })
            }
            _ => Some(SessionConflict::FilterChanged),
        }
    }
}
