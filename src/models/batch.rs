//! Batch request/result types and skip-reason accounting.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::filter::BatchFilter;

/// Terminal condition that halts slice processing mid-batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Run may continue.
    #[default]
    None,
    /// The metered account has no remaining usage.
    QuotaExhausted,
    /// The external API could not retrieve an image by URL.
    FetchBlocked,
}

impl StopReason {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StopReason::None)
    }
}

/// Why an item was not successfully processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Caller-supplied veto.
    Vetoed,
    /// Parent entity belongs to an excluded category.
    ExcludedCategory,
    /// Declared or probed size over the hard cap.
    TooLarge,
    /// Pixel dimensions below the minimum.
    TooSmall,
    /// Extension outside the supported set or user whitelist.
    UnsupportedType,
    /// Byte size could not be determined.
    MissingSize,
    /// Item vanished from the datastore or has no retrievable source.
    Missing,
    /// Already charged earlier in this call chain (fan-out duplicate).
    AlreadyProcessed,
    /// Hard or exhausted-retry error from the external API.
    ApiError,
    /// Account ran out of usage on this item.
    QuotaExhausted,
    /// URL fetch blocked by network policy on this item.
    FetchBlocked,
}

impl SkipReason {
    /// Human label used in run summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Vetoed => "vetoed",
            Self::ExcludedCategory => "excluded category",
            Self::TooLarge => "too large",
            Self::TooSmall => "below minimum dimensions",
            Self::UnsupportedType => "unsupported type",
            Self::MissingSize => "size unknown",
            Self::Missing => "missing or unreadable",
            Self::AlreadyProcessed => "already processed",
            Self::ApiError => "API error",
            Self::QuotaExhausted => "out of credits",
            Self::FetchBlocked => "image fetch blocked",
        }
    }
}

/// Accumulated counts of why items were skipped during a logical run.
///
/// Lives server-side keyed by requesting actor so the final summary does not
/// require re-scanning the library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkipReasonTally {
    counts: HashMap<SkipReason, u64>,
}

impl SkipReasonTally {
    pub fn record(&mut self, reason: SkipReason) {
        *self.counts.entry(reason).or_insert(0) += 1;
    }

    pub fn count(&self, reason: SkipReason) -> u64 {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn merge(&mut self, other: &SkipReasonTally) {
        for (reason, n) in &other.counts {
            *self.counts.entry(*reason).or_insert(0) += n;
        }
    }

    /// Render a stable, sorted summary line ("2 too large, 1 API error").
    pub fn summary(&self) -> String {
        let mut entries: Vec<_> = self.counts.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(a.1).then(a.0.label().cmp(b.0.label())));
        entries
            .iter()
            .map(|(reason, n)| format!("{} {}", n, reason.label()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// One coordinator invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Requesting actor (driver instance id); keys the server-side tally.
    pub actor: String,
    /// Exclusive lower bound for the next slice.
    #[serde(default)]
    pub cursor: u64,
    /// Filter fixed for the duration of the run.
    pub filter: BatchFilter,
    /// IDs already charged in the current call chain, threaded explicitly
    /// so fan-out state never lives in globals.
    #[serde(default)]
    pub fanout: Vec<u64>,
}

/// Result of one coordinator invocation. Consumed immediately by the driver;
/// only its effect on the session checkpoint is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub attempted: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub new_cursor: u64,
    pub has_more: bool,
    #[serde(default)]
    pub stop_reason: StopReason,
    /// Fan-out set after this call, echoed back for the next request.
    #[serde(default)]
    pub fanout: Vec<u64>,
    /// ID of the item that triggered a terminal stop, if any.
    #[serde(default)]
    pub stopped_at: Option<u64>,
    /// Accumulated skip-reason summary for the run so far; may be empty.
    #[serde(default)]
    pub subtitle: String,
}

/// Wire envelope returned by the batch endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEnvelope {
    pub status: String,
    pub message: String,
    /// Skip-reason summary, may be empty.
    #[serde(default)]
    pub subtitle: String,
    pub process_count: u64,
    pub success_count: u64,
    pub skipped_count: u64,
    pub last_item_id: u64,
    /// True when the caller should issue another batch call.
    pub recursive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Remediation code the caller should surface (e.g. switch to uploads).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_required: Option<String>,
    #[serde(default)]
    pub fanout: Vec<u64>,
    #[serde(default)]
    pub stop_reason: StopReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_records_and_merges() {
        let mut a = SkipReasonTally::default();
        a.record(SkipReason::TooLarge);
        a.record(SkipReason::TooLarge);
        a.record(SkipReason::ApiError);

        let mut b = SkipReasonTally::default();
        b.record(SkipReason::TooLarge);
        a.merge(&b);

        assert_eq!(a.count(SkipReason::TooLarge), 3);
        assert_eq!(a.total(), 4);
    }

    #[test]
    fn summary_is_sorted_by_count() {
        let mut t = SkipReasonTally::default();
        t.record(SkipReason::ApiError);
        t.record(SkipReason::TooLarge);
        t.record(SkipReason::TooLarge);
        assert_eq!(t.summary(), "2 too large, 1 API error");
    }

    #[test]
    fn empty_tally_renders_empty_summary() {
        assert_eq!(SkipReasonTally::default().summary(), "");
        assert!(SkipReasonTally::default().is_empty());
    }

    #[test]
    fn default_stop_reason_is_not_terminal() {
        assert!(!StopReason::default().is_terminal());
        assert!(StopReason::QuotaExhausted.is_terminal());
        assert!(StopReason::FetchBlocked.is_terminal());
    }
}
