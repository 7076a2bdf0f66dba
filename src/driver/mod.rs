//! Client-side batch driver.
//!
//! Repeatedly invokes the batch coordinator, feeds the returned cursor back
//! in, checkpoints a session after every round, and recovers from transient
//! transport failures. Calls are strictly sequential; there is no
//! concurrency within a single run.

mod session;

pub use session::{SessionError, SessionStore};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::coordinator::{envelope_for, BatchCoordinator};
use crate::models::{
    BatchEnvelope, BatchFilter, BatchRequest, RunCounters, Session, SessionConflict, StopReason,
};

/// Transport-level failure reaching the coordinator.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Server error, timeout, or generic transport failure; the same call
    /// may be replayed (the cursor was never advanced).
    #[error("retryable transport failure: {0}")]
    Retryable(String),

    /// Anything else; replaying will not help.
    #[error("transport failure: {0}")]
    Fatal(String),
}

/// Seam between the driver and the coordinator, so tests can script
/// envelopes and failures.
#[async_trait]
pub trait CoordinatorTransport: Send + Sync {
    async fn process_batch(&self, req: &BatchRequest) -> Result<BatchEnvelope, TransportError>;
}

#[async_trait]
impl CoordinatorTransport for Box<dyn CoordinatorTransport> {
    async fn process_batch(&self, req: &BatchRequest) -> Result<BatchEnvelope, TransportError> {
        (**self).process_batch(req).await
    }
}

/// In-process transport wrapping a coordinator directly.
pub struct LocalTransport {
    coordinator: Arc<BatchCoordinator>,
}

impl LocalTransport {
    pub fn new(coordinator: Arc<BatchCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl CoordinatorTransport for LocalTransport {
    async fn process_batch(&self, req: &BatchRequest) -> Result<BatchEnvelope, TransportError> {
        let outcome = self
            .coordinator
            .process_batch(req.clone())
            .await
            .map_err(|e| TransportError::Fatal(e.to_string()))?;
        Ok(envelope_for(&outcome, &req.filter))
    }
}

/// HTTP transport against a remote coordinator endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CoordinatorTransport for HttpTransport {
    async fn process_batch(&self, req: &BatchRequest) -> Result<BatchEnvelope, TransportError> {
        let url = format!("{}/api/batch", self.base_url);
        let resp = match self.client.post(&url).json(req).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_connect() || e.is_timeout() => {
                return Err(TransportError::Retryable(e.to_string()))
            }
            Err(e) => return Err(TransportError::Fatal(e.to_string())),
        };

        let status = resp.status();
        if status.is_server_error() {
            return Err(TransportError::Retryable(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Fatal(format!("HTTP {}: {}", status, body)));
        }
        resp.json()
            .await
            .map_err(|e| TransportError::Fatal(format!("bad envelope: {}", e)))
    }
}

/// Driver loop tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Pause between batch calls, keeping the server responsive.
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
    /// In-run cap on whole-call transport retries.
    #[serde(default = "default_transport_retry_cap")]
    pub transport_retry_cap: u32,
    /// Fixed delay before replaying a failed call.
    #[serde(default = "default_transport_retry_delay_ms")]
    pub transport_retry_delay_ms: u64,
}

fn default_inter_batch_delay_ms() -> u64 {
    500
}
fn default_transport_retry_cap() -> u32 {
    2
}
fn default_transport_retry_delay_ms() -> u64 {
    2_000
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            transport_retry_cap: default_transport_retry_cap(),
            transport_retry_delay_ms: default_transport_retry_delay_ms(),
        }
    }
}

/// Run lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
    Completed,
    Cancelled,
    /// Stopped on a terminal condition or repeated transport errors with
    /// the session left intact for resuming.
    Blocked,
}

/// Events emitted while a run progresses.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    Started {
        resumed: bool,
        cursor: u64,
    },
    BatchCompleted {
        attempted: u64,
        succeeded: u64,
        skipped: u64,
        cursor: u64,
        subtitle: String,
    },
    TransportRetry {
        attempt: u32,
        cause: String,
    },
    Completed {
        counters: RunCounters,
        summary: String,
    },
    /// Terminal business stop; the run is resumable after remediation.
    ActionRequired {
        code: String,
        message: String,
        item_id: u64,
    },
    Blocked {
        message: String,
    },
    Cancelled,
    /// Resumed session belongs to a different selection run; link back.
    SelectionConflict {
        token: String,
        resume_url: String,
    },
}

/// Final report for one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub phase: RunPhase,
    pub counters: RunCounters,
    pub cursor: u64,
    pub stop_reason: StopReason,
    pub message: String,
}

/// Sequential batch driver with crash-recoverable checkpoints.
pub struct BatchDriver<T: CoordinatorTransport> {
    transport: T,
    store: SessionStore,
    config: DriverConfig,
    cancel: watch::Receiver<bool>,
    actor: String,
}

impl<T: CoordinatorTransport> BatchDriver<T> {
    pub fn new(
        transport: T,
        store: SessionStore,
        config: DriverConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            store,
            config,
            cancel,
            actor: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Resolve the session to run with: resume a matching checkpoint, or
    /// start fresh, discarding conflicting checkpoints per policy.
    fn resolve_session(
        &self,
        filter: &BatchFilter,
        allow_resume: bool,
    ) -> Result<ResolvedSession, SessionError> {
        let persisted = self.store.load()?;
        let Some(session) = persisted else {
            return Ok(ResolvedSession::Fresh(Session::new(filter.clone())));
        };
        if !allow_resume {
            self.store.clear()?;
            return Ok(ResolvedSession::Fresh(Session::new(filter.clone())));
        }
        match session.conflict_with(filter) {
            None => Ok(ResolvedSession::Resumed(session)),
            Some(SessionConflict::SelectionMismatch { token }) => {
                // Keep the checkpoint; the caller gets a link back into the
                // matching context instead of a silent discard.
                Ok(ResolvedSession::SelectionConflict { token })
            }
            Some(conflict) => {
                info!(?conflict, "discarding conflicting session checkpoint");
                self.store.clear()?;
                Ok(ResolvedSession::Fresh(Session::new(filter.clone())))
            }
        }
    }

    /// Run to completion, cancellation, or a terminal stop.
    pub async fn run(
        &mut self,
        filter: BatchFilter,
        allow_resume: bool,
        events: mpsc::Sender<DriverEvent>,
    ) -> Result<RunReport, SessionError> {
        let mut session = match self.resolve_session(&filter, allow_resume)? {
            ResolvedSession::Fresh(mut session) => {
                session.actor = self.actor.clone();
                let _ = events
                    .send(DriverEvent::Started {
                        resumed: false,
                        cursor: 0,
                    })
                    .await;
                session
            }
            ResolvedSession::Resumed(mut session) => {
                // Reuse the checkpointed actor so the coordinator keeps
                // accumulating into the same skip tally.
                if session.actor.is_empty() {
                    session.actor = self.actor.clone();
                } else {
                    self.actor = session.actor.clone();
                }
                let _ = events
                    .send(DriverEvent::Started {
                        resumed: true,
                        cursor: session.cursor,
                    })
                    .await;
                session
            }
            ResolvedSession::SelectionConflict { token } => {
                let resume_url = format!("/selection/{}", token);
                let _ = events
                    .send(DriverEvent::SelectionConflict {
                        token: token.clone(),
                        resume_url: resume_url.clone(),
                    })
                    .await;
                return Ok(RunReport {
                    phase: RunPhase::Idle,
                    counters: RunCounters::default(),
                    cursor: 0,
                    stop_reason: StopReason::None,
                    message: format!(
                        "A selection run is pending; resume it at {}",
                        resume_url
                    ),
                });
            }
        };

        let mut fanout: Vec<u64> = Vec::new();
        let mut transport_retries = 0u32;

        loop {
            if *self.cancel.borrow() {
                return self.cancelled(&events).await;
            }

            let req = BatchRequest {
                actor: self.actor.clone(),
                cursor: session.cursor,
                filter: filter.clone(),
                fanout: fanout.clone(),
            };

            // The in-flight call is the only suspension point; cancellation
            // aborts it, but a slice already accepted server-side runs to
            // completion there.
            let result = tokio::select! {
                _ = self.cancel.changed() => {
                    return self.cancelled(&events).await;
                }
                result = self.transport.process_batch(&req) => result,
            };

            let envelope = match result {
                Ok(envelope) => envelope,
                Err(TransportError::Retryable(cause))
                    if transport_retries < self.config.transport_retry_cap =>
                {
                    transport_retries += 1;
                    warn!(
                        attempt = transport_retries,
                        "transport failure, replaying batch call: {}", cause
                    );
                    let _ = events
                        .send(DriverEvent::TransportRetry {
                            attempt: transport_retries,
                            cause,
                        })
                        .await;
                    tokio::time::sleep(Duration::from_millis(
                        self.config.transport_retry_delay_ms,
                    ))
                    .await;
                    // Same cursor: the coordinator never returned, so
                    // nothing was advanced.
                    continue;
                }
                Err(err) => {
                    // Session stays intact so the user can resume later.
                    let message = if transport_retries > 0 {
                        format!("stopped after repeated errors: {}", err)
                    } else {
                        format!("stopped: {}", err)
                    };
                    let _ = events
                        .send(DriverEvent::Blocked {
                            message: message.clone(),
                        })
                        .await;
                    return Ok(RunReport {
                        phase: RunPhase::Blocked,
                        counters: session.counters,
                        cursor: session.cursor,
                        stop_reason: StopReason::None,
                        message,
                    });
                }
            };

            transport_retries = 0;

            match envelope.stop_reason {
                StopReason::None => {
                    session.checkpoint(
                        envelope.last_item_id,
                        envelope.process_count,
                        envelope.success_count,
                        envelope.skipped_count,
                    );
                    if envelope.recursive {
                        self.store.save(&session)?;
                        fanout = envelope.fanout.clone();
                        let _ = events
                            .send(DriverEvent::BatchCompleted {
                                attempted: envelope.process_count,
                                succeeded: envelope.success_count,
                                skipped: envelope.skipped_count,
                                cursor: session.cursor,
                                subtitle: envelope.subtitle.clone(),
                            })
                            .await;
                        tokio::time::sleep(Duration::from_millis(
                            self.config.inter_batch_delay_ms,
                        ))
                        .await;
                        continue;
                    }
                    // Run complete: the checkpoint has served its purpose.
                    self.store.clear()?;
                    let _ = events
                        .send(DriverEvent::Completed {
                            counters: session.counters,
                            summary: envelope.subtitle.clone(),
                        })
                        .await;
                    return Ok(RunReport {
                        phase: RunPhase::Completed,
                        counters: session.counters,
                        cursor: session.cursor,
                        stop_reason: StopReason::None,
                        message: envelope.message,
                    });
                }
                StopReason::QuotaExhausted | StopReason::FetchBlocked => {
                    // Terminal business stop. Keep the cursor where it was;
                    // the triggering item was never charged and must be
                    // retried on the next run.
                    session.counters.absorb(
                        envelope.process_count,
                        envelope.success_count,
                        envelope.skipped_count,
                    );
                    self.store.save(&session)?;
                    let code = envelope
                        .action_required
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string());
                    let _ = events
                        .send(DriverEvent::ActionRequired {
                            code,
                            message: envelope.message.clone(),
                            item_id: envelope.last_item_id,
                        })
                        .await;
                    return Ok(RunReport {
                        phase: RunPhase::Blocked,
                        counters: session.counters,
                        cursor: session.cursor,
                        stop_reason: envelope.stop_reason,
                        message: envelope.message,
                    });
                }
            }
        }
    }

    async fn cancelled(
        &self,
        events: &mpsc::Sender<DriverEvent>,
    ) -> Result<RunReport, SessionError> {
        self.store.clear()?;
        let _ = events.send(DriverEvent::Cancelled).await;
        info!("run cancelled by user");
        Ok(RunReport {
            phase: RunPhase::Cancelled,
            counters: RunCounters::default(),
            cursor: 0,
            stop_reason: StopReason::None,
            message: "cancelled".to_string(),
        })
    }
}

enum ResolvedSession {
    Fresh(Session),
    Resumed(Session),
    SelectionConflict { token: String },
}
