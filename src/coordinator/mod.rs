//! Batch coordinator.
//!
//! One invocation selects the next slice of work after the caller's cursor,
//! filters it for eligibility, submits each item to the annotation backend,
//! fans out to linked translations, and returns a checkpoint. Skip reasons
//! accumulate per requesting actor so the final summary needs no re-scan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::api::{Annotation, AnnotationBackend, ApiError, ImageSource, SubmitOptions};
use crate::eligibility::{EligibilityContext, EligibilityPolicy};
use crate::enrichment::CompletionHook;
use crate::keywords::KeywordChain;
use crate::models::{
    BatchEnvelope, BatchFilter, BatchOutcome, BatchRequest, FanoutSet, Scope, SkipReason,
    SkipReasonTally, StopReason, WorkItem,
};
use crate::repository::{FieldPropagation, MediaRepository, RepositoryError, SliceQuery};

/// Coordinator-side generation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Use the e-commerce model variant.
    #[serde(default)]
    pub ecomm: bool,
    /// Language sent when an item declares none.
    #[serde(default)]
    pub default_lang: Option<String>,
    /// Custom prompt override forwarded to the service.
    #[serde(default)]
    pub gpt_prompt: Option<String>,
    /// Model override forwarded to the service.
    #[serde(default)]
    pub model_name: Option<String>,
    /// Display fields the generated text propagates into.
    #[serde(default)]
    pub propagation: FieldPropagation,
    /// Operator keyword list used when no other source yields keywords.
    #[serde(default)]
    pub fixed_keywords: Vec<String>,
}

/// Tallies for actors that stop calling back (cancelled or crashed drivers)
/// are swept after this much idle time.
const TALLY_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

/// One actor's accumulated skip counts plus last-touch time for sweeping.
struct TallyEntry {
    tally: SkipReasonTally,
    touched: Instant,
}

impl Default for TallyEntry {
    fn default() -> Self {
        Self {
            tally: SkipReasonTally::default(),
            touched: Instant::now(),
        }
    }
}

/// Running stats for one slice.
#[derive(Default)]
struct SliceStats {
    attempted: u64,
    succeeded: u64,
    skipped: u64,
    last_attempted: Option<u64>,
    /// IDs fully processed (for selection-set removal).
    processed: Vec<u64>,
    stop: StopReason,
    stopped_at: Option<u64>,
}

/// Server-side batch coordinator. Stateless across calls except for the
/// per-actor skip tallies; all traversal state arrives in the request.
pub struct BatchCoordinator {
    repo: Arc<dyn MediaRepository>,
    backend: Arc<dyn AnnotationBackend>,
    eligibility: EligibilityPolicy,
    keywords: KeywordChain,
    hooks: Vec<Box<dyn CompletionHook>>,
    config: CoordinatorConfig,
    tallies: RwLock<HashMap<String, TallyEntry>>,
}

impl BatchCoordinator {
    pub fn new(
        repo: Arc<dyn MediaRepository>,
        backend: Arc<dyn AnnotationBackend>,
        eligibility: EligibilityPolicy,
        config: CoordinatorConfig,
    ) -> Self {
        let keywords = KeywordChain::standard(config.fixed_keywords.clone());
        Self {
            repo,
            backend,
            eligibility,
            keywords,
            hooks: vec![Box::new(crate::enrichment::LoggingHook)],
            config,
            tallies: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a completion hook.
    pub fn with_hook(mut self, hook: Box<dyn CompletionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Process one batch request and return the result envelope payload.
    pub async fn process_batch(
        &self,
        req: BatchRequest,
    ) -> Result<BatchOutcome, RepositoryError> {
        self.sweep_tallies().await;

        let mut filter = req.filter.clone();
        filter.normalize_keywords();
        let batch_size = filter.clamped_batch_size();
        let mut fanout: FanoutSet = req.fanout.clone().into();

        let outcome = match filter.scope.clone() {
            Scope::Library { .. } => {
                self.process_library(&req, &filter, batch_size, &mut fanout)
                    .await?
            }
            Scope::Selection { token } => {
                self.process_selection(&req, &filter, &token, batch_size, &mut fanout)
                    .await?
            }
        };

        debug!(
            actor = %req.actor,
            attempted = outcome.attempted,
            succeeded = outcome.succeeded,
            skipped = outcome.skipped,
            cursor = outcome.new_cursor,
            has_more = outcome.has_more,
            "batch processed"
        );
        Ok(outcome)
    }

    async fn process_library(
        &self,
        req: &BatchRequest,
        filter: &BatchFilter,
        batch_size: u32,
        fanout: &mut FanoutSet,
    ) -> Result<BatchOutcome, RepositoryError> {
        let query = SliceQuery::from_filter(filter);
        let slice = self.repo.next_slice(req.cursor, &query, batch_size).await?;

        if slice.is_empty() {
            let subtitle = self.finish_tally(&req.actor).await;
            info!(actor = %req.actor, "run complete, no items past cursor {}", req.cursor);
            return Ok(BatchOutcome {
                new_cursor: req.cursor,
                has_more: false,
                fanout: fanout.to_vec(),
                subtitle,
                ..BatchOutcome::default()
            });
        }

        let stats = self.process_items(&req.actor, slice, filter, fanout).await?;
        let has_more = !stats.stop.is_terminal() && stats.attempted == batch_size as u64;
        // A terminal stop ends the logical run too; the tally ships with
        // this envelope and a later resume starts a fresh one.
        let subtitle = if stats.stop.is_terminal() {
            self.finish_tally(&req.actor).await
        } else {
            self.tally_summary(&req.actor).await
        };

        Ok(BatchOutcome {
            attempted: stats.attempted,
            succeeded: stats.succeeded,
            skipped: stats.skipped,
            new_cursor: stats.last_attempted.unwrap_or(req.cursor),
            has_more,
            stop_reason: stats.stop,
            fanout: fanout.to_vec(),
            stopped_at: stats.stopped_at,
            subtitle,
        })
    }

    async fn process_selection(
        &self,
        req: &BatchRequest,
        filter: &BatchFilter,
        token: &str,
        batch_size: u32,
        fanout: &mut FanoutSet,
    ) -> Result<BatchOutcome, RepositoryError> {
        let ids = self.repo.selection_peek(token, batch_size).await?;
        if ids.is_empty() {
            let subtitle = self.finish_tally(&req.actor).await;
            return Ok(BatchOutcome {
                new_cursor: req.cursor,
                has_more: false,
                fanout: fanout.to_vec(),
                subtitle,
                ..BatchOutcome::default()
            });
        }

        // Materialize; IDs that vanished since selection are dropped from
        // the working set and counted as missing.
        let mut items = Vec::new();
        let mut gone = Vec::new();
        for id in &ids {
            match self.repo.get(*id).await? {
                Some(item) => items.push(item),
                None => gone.push(*id),
            }
        }
        let mut stats = self.process_items(&req.actor, items, filter, fanout).await?;
        for id in &gone {
            self.record_skip(&req.actor, SkipReason::Missing).await;
            stats.skipped += 1;
            stats.processed.push(*id);
        }

        // Processed IDs leave the persisted working set; a terminal stop
        // keeps the failing item queued for the next run.
        self.repo.selection_remove(token, &stats.processed).await?;
        let remaining = self.repo.selection_len(token).await?;
        let has_more = !stats.stop.is_terminal() && remaining > 0;
        let subtitle = if remaining == 0 || stats.stop.is_terminal() {
            self.finish_tally(&req.actor).await
        } else {
            self.tally_summary(&req.actor).await
        };

        Ok(BatchOutcome {
            attempted: stats.attempted,
            succeeded: stats.succeeded,
            skipped: stats.skipped,
            new_cursor: stats.last_attempted.unwrap_or(req.cursor),
            has_more,
            stop_reason: stats.stop,
            fanout: fanout.to_vec(),
            stopped_at: stats.stopped_at,
            subtitle,
        })
    }

    /// Process one working slice in order, honoring terminal stops.
    async fn process_items(
        &self,
        actor: &str,
        items: Vec<WorkItem>,
        filter: &BatchFilter,
        fanout: &mut FanoutSet,
    ) -> Result<SliceStats, RepositoryError> {
        let mut stats = SliceStats::default();

        for item in items {
            // Claim before the network call, not after; a derivative charged
            // earlier in this chain must never be submitted again.
            if !fanout.claim(item.id) {
                stats.attempted += 1;
                stats.skipped += 1;
                stats.last_attempted = Some(item.id);
                stats.processed.push(item.id);
                self.record_skip(actor, SkipReason::AlreadyProcessed).await;
                continue;
            }

            let veto = self.hook_veto(&item);
            if let Err(rejection) =
                self.eligibility
                    .evaluate(&item, EligibilityContext::Bulk, veto.as_deref())
            {
                stats.attempted += 1;
                stats.skipped += 1;
                stats.last_attempted = Some(item.id);
                stats.processed.push(item.id);
                self.record_skip(actor, rejection.reason).await;
                continue;
            }

            match self.submit_item(&item, filter).await {
                Ok(annotation) => {
                    stats.attempted += 1;
                    stats.succeeded += 1;
                    stats.last_attempted = Some(item.id);
                    stats.processed.push(item.id);
                    self.persist_success(&item, &annotation).await?;
                    self.fan_out(actor, &item, filter, fanout, &mut stats)
                        .await?;
                    if stats.stop.is_terminal() {
                        break;
                    }
                }
                Err(err) => {
                    let stop = err.stop_reason();
                    if stop.is_terminal() {
                        // Do not advance past the failing item; it was never
                        // charged and the next run must retry it.
                        stats.attempted += 1;
                        stats.skipped += 1;
                        stats.stop = stop;
                        stats.stopped_at = Some(item.id);
                        self.record_skip(actor, terminal_skip_reason(stop)).await;
                        break;
                    }
                    stats.attempted += 1;
                    stats.skipped += 1;
                    stats.last_attempted = Some(item.id);
                    stats.processed.push(item.id);
                    self.record_skip(actor, SkipReason::ApiError).await;
                    debug!(item_id = item.id, "submission failed: {}", err);
                }
            }
        }

        Ok(stats)
    }

    /// Charge derivatives of a successful primary, merging their IDs into
    /// the call-chain set so later direct enumeration skips them.
    async fn fan_out(
        &self,
        actor: &str,
        primary: &WorkItem,
        filter: &BatchFilter,
        fanout: &mut FanoutSet,
        stats: &mut SliceStats,
    ) -> Result<(), RepositoryError> {
        for derivative in self.repo.derivatives_of(primary).await? {
            if !fanout.claim(derivative.id) {
                continue;
            }
            let veto = self.hook_veto(&derivative);
            if self
                .eligibility
                .evaluate(&derivative, EligibilityContext::Bulk, veto.as_deref())
                .is_err()
            {
                // Reason already logged by the filter; derivatives do not
                // consume the slice budget.
                continue;
            }
            match self.submit_item(&derivative, filter).await {
                Ok(annotation) => {
                    stats.succeeded += 1;
                    self.persist_success(&derivative, &annotation).await?;
                }
                Err(err) if err.stop_reason().is_terminal() => {
                    // Quota and fetch blocks halt the slice whether the
                    // triggering charge was a primary or a derivative.
                    let stop = err.stop_reason();
                    stats.stop = stop;
                    stats.stopped_at = Some(derivative.id);
                    self.record_skip(actor, terminal_skip_reason(stop)).await;
                    return Ok(());
                }
                Err(err) => {
                    // Non-terminal derivative failures are recoverable: the
                    // item still has empty alt text and will be revisited by
                    // direct enumeration.
                    stats.skipped += 1;
                    self.record_skip(actor, SkipReason::ApiError).await;
                    debug!(item_id = derivative.id, "fan-out failed: {}", err);
                }
            }
        }
        Ok(())
    }

    async fn submit_item(
        &self,
        item: &WorkItem,
        filter: &BatchFilter,
    ) -> Result<Annotation, ApiError> {
        let source = match (&item.url, &item.payload) {
            (Some(url), _) => ImageSource::Url(url.clone()),
            (None, Some(bytes)) => ImageSource::Raw(bytes.clone()),
            (None, None) => {
                return Err(ApiError::Hard {
                    status: 0,
                    message: "item has no retrievable source".to_string(),
                })
            }
        };

        let keywords = if filter.keywords.is_empty() {
            self.keywords.resolve(item)
        } else {
            filter.keywords.clone()
        };

        let options = SubmitOptions {
            overwrite: matches!(filter.mode, crate::models::GenerationMode::All),
            ecomm: self.config.ecomm,
            keywords,
            negative_keywords: filter.negative_keywords.clone(),
            lang: item
                .language
                .clone()
                .or_else(|| self.config.default_lang.clone()),
            gpt_prompt: self.config.gpt_prompt.clone(),
            model_name: self.config.model_name.clone(),
        };

        self.backend.submit(item, source, &options).await
    }

    /// Persist a successful annotation. Mapping first so a crash between the
    /// two writes still leaves the charge traceable.
    async fn persist_success(
        &self,
        item: &WorkItem,
        annotation: &Annotation,
    ) -> Result<(), RepositoryError> {
        self.repo
            .record_asset_mapping(item.id, &annotation.asset_id)
            .await?;
        self.repo
            .update_alt_text(item.id, &annotation.alt_text, &self.config.propagation)
            .await?;
        for hook in &self.hooks {
            hook.on_annotated(item, &annotation.alt_text);
        }
        Ok(())
    }

    /// First veto offered by any hook, if one objects to the item.
    fn hook_veto(&self, item: &WorkItem) -> Option<String> {
        self.hooks.iter().find_map(|hook| hook.veto(item))
    }

    async fn record_skip(&self, actor: &str, reason: SkipReason) {
        let mut tallies = self.tallies.write().await;
        let entry = tallies.entry(actor.to_string()).or_default();
        entry.tally.record(reason);
        entry.touched = Instant::now();
    }

    /// Current accumulated summary for an actor.
    async fn tally_summary(&self, actor: &str) -> String {
        let tallies = self.tallies.read().await;
        tallies
            .get(actor)
            .map(|e| e.tally.summary())
            .unwrap_or_default()
    }

    /// Final summary; drops the actor's tally.
    async fn finish_tally(&self, actor: &str) -> String {
        let mut tallies = self.tallies.write().await;
        tallies
            .remove(actor)
            .map(|e| e.tally.summary())
            .unwrap_or_default()
    }

    /// Drop tallies whose actors went idle without draining a run, so
    /// abandoned drivers do not accumulate entries forever.
    async fn sweep_tallies(&self) {
        let mut tallies = self.tallies.write().await;
        tallies.retain(|_, entry| entry.touched.elapsed() < TALLY_IDLE_TTL);
    }
}

fn terminal_skip_reason(stop: StopReason) -> SkipReason {
    match stop {
        StopReason::QuotaExhausted => SkipReason::QuotaExhausted,
        StopReason::FetchBlocked => SkipReason::FetchBlocked,
        StopReason::None => SkipReason::ApiError,
    }
}

/// Build the wire envelope for an outcome.
pub fn envelope_for(outcome: &BatchOutcome, filter: &BatchFilter) -> BatchEnvelope {
    let (message, action_required) = match outcome.stop_reason {
        StopReason::QuotaExhausted => (
            "Account is out of credits; resume after topping up.".to_string(),
            Some("add_credits".to_string()),
        ),
        StopReason::FetchBlocked => (
            "The service could not fetch an image by URL; switch to direct uploads.".to_string(),
            Some("enable_uploads".to_string()),
        ),
        StopReason::None if outcome.has_more => ("Batch processed.".to_string(), None),
        StopReason::None => ("Generation complete.".to_string(), None),
    };

    let redirect_url = match (&outcome.stop_reason, filter.scope.selection_token()) {
        (StopReason::None, Some(token)) if !outcome.has_more => {
            Some(format!("/selection/{}", token))
        }
        _ => None,
    };

    BatchEnvelope {
        status: "ok".to_string(),
        message,
        subtitle: outcome.subtitle.clone(),
        process_count: outcome.attempted,
        success_count: outcome.succeeded,
        skipped_count: outcome.skipped,
        last_item_id: outcome.stopped_at.unwrap_or(outcome.new_cursor),
        recursive: outcome.has_more,
        redirect_url,
        action_required,
        fanout: outcome.fanout.clone(),
        stop_reason: outcome.stop_reason,
    }
}
