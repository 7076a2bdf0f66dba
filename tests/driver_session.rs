//! Driver loop tests against a scripted transport: checkpointing, crash
//! resume, transport retries, and terminal stops.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use altgen::driver::{
    BatchDriver, CoordinatorTransport, DriverConfig, DriverEvent, RunPhase, SessionStore,
    TransportError,
};
use altgen::models::{
    BatchEnvelope, BatchFilter, BatchRequest, Scope, Session, StopReason,
};

/// Transport returning scripted envelopes in order and recording requests.
struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<BatchEnvelope, TransportError>>>,
    requests: Mutex<Vec<BatchRequest>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<Result<BatchEnvelope, TransportError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<BatchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CoordinatorTransport for &ScriptedTransport {
    async fn process_batch(&self, req: &BatchRequest) -> Result<BatchEnvelope, TransportError> {
        self.requests.lock().unwrap().push(req.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("transport called more times than scripted")
    }
}

fn envelope(attempted: u64, succeeded: u64, cursor: u64, recursive: bool) -> BatchEnvelope {
    BatchEnvelope {
        status: "ok".to_string(),
        message: if recursive {
            "Batch processed.".to_string()
        } else {
            "Generation complete.".to_string()
        },
        subtitle: String::new(),
        process_count: attempted,
        success_count: succeeded,
        skipped_count: attempted - succeeded,
        last_item_id: cursor,
        recursive,
        redirect_url: None,
        action_required: None,
        fanout: Vec::new(),
        stop_reason: StopReason::None,
    }
}

fn quota_envelope(attempted: u64, succeeded: u64, stopped_at: u64) -> BatchEnvelope {
    BatchEnvelope {
        message: "Account is out of credits; resume after topping up.".to_string(),
        action_required: Some("add_credits".to_string()),
        last_item_id: stopped_at,
        recursive: false,
        stop_reason: StopReason::QuotaExhausted,
        ..envelope(attempted, succeeded, stopped_at, false)
    }
}

fn fast_config() -> DriverConfig {
    DriverConfig {
        inter_batch_delay_ms: 0,
        transport_retry_cap: 2,
        transport_retry_delay_ms: 0,
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store_path: std::path::PathBuf,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("session.json");
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            _dir: dir,
            store_path,
            cancel_tx,
            cancel_rx,
        }
    }

    fn store(&self) -> SessionStore {
        SessionStore::new(self.store_path.clone())
    }

    fn driver<'a>(&self, transport: &'a ScriptedTransport) -> BatchDriver<&'a ScriptedTransport> {
        BatchDriver::new(
            transport,
            self.store(),
            fast_config(),
            self.cancel_rx.clone(),
        )
    }
}

fn events() -> (mpsc::Sender<DriverEvent>, mpsc::Receiver<DriverEvent>) {
    mpsc::channel(100)
}

async fn drain(mut rx: mpsc::Receiver<DriverEvent>) -> Vec<DriverEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn runs_to_completion_and_clears_the_checkpoint() {
    let transport = ScriptedTransport::new(vec![
        Ok(envelope(2, 2, 2, true)),
        Ok(envelope(2, 1, 4, true)),
        Ok(envelope(1, 1, 5, false)),
    ]);
    let harness = Harness::new();
    let (tx, rx) = events();

    let mut driver = harness.driver(&transport);
    let report = driver
        .run(BatchFilter::missing_only(2), false, tx)
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.counters.attempted, 5);
    assert_eq!(report.counters.succeeded, 4);
    assert_eq!(report.cursor, 5);

    // Cursors fed back from each envelope, starting at zero.
    let cursors: Vec<u64> = transport.requests().iter().map(|r| r.cursor).collect();
    assert_eq!(cursors, vec![0, 2, 4]);

    // Nothing left to resume.
    assert!(harness.store().load().unwrap().is_none());
    assert!(drain(rx)
        .await
        .iter()
        .any(|e| matches!(e, DriverEvent::Completed { .. })));
}

#[tokio::test]
async fn threads_the_fanout_set_between_calls() {
    let mut first = envelope(2, 2, 2, true);
    first.fanout = vec![1, 2, 9];
    let transport = ScriptedTransport::new(vec![Ok(first), Ok(envelope(0, 0, 2, false))]);
    let harness = Harness::new();
    let (tx, _rx) = events();

    let mut driver = harness.driver(&transport);
    driver
        .run(BatchFilter::missing_only(2), false, tx)
        .await
        .unwrap();

    let requests = transport.requests();
    assert!(requests[0].fanout.is_empty());
    assert_eq!(requests[1].fanout, vec![1, 2, 9]);
}

#[tokio::test]
async fn replays_the_same_cursor_after_a_transport_failure() {
    let transport = ScriptedTransport::new(vec![
        Ok(envelope(2, 2, 2, true)),
        Err(TransportError::Retryable("connection reset".into())),
        Ok(envelope(1, 1, 3, false)),
    ]);
    let harness = Harness::new();
    let (tx, rx) = events();

    let mut driver = harness.driver(&transport);
    let report = driver
        .run(BatchFilter::missing_only(2), false, tx)
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    let cursors: Vec<u64> = transport.requests().iter().map(|r| r.cursor).collect();
    // The failed call is replayed verbatim.
    assert_eq!(cursors, vec![0, 2, 2]);
    assert!(drain(rx)
        .await
        .iter()
        .any(|e| matches!(e, DriverEvent::TransportRetry { attempt: 1, .. })));
}

#[tokio::test]
async fn repeated_transport_failures_block_and_keep_the_checkpoint() {
    let transport = ScriptedTransport::new(vec![
        Ok(envelope(2, 2, 2, true)),
        Err(TransportError::Retryable("timeout".into())),
        Err(TransportError::Retryable("timeout".into())),
        Err(TransportError::Retryable("timeout".into())),
    ]);
    let harness = Harness::new();
    let (tx, _rx) = events();

    let mut driver = harness.driver(&transport);
    let report = driver
        .run(BatchFilter::missing_only(2), false, tx)
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Blocked);
    assert_eq!(transport.requests().len(), 4);

    // The checkpoint survives so `resume` can pick up at cursor 2.
    let session = harness.store().load().unwrap().unwrap();
    assert_eq!(session.cursor, 2);
    assert_eq!(session.counters.succeeded, 2);
}

#[tokio::test]
async fn fatal_transport_errors_block_without_retrying() {
    let transport = ScriptedTransport::new(vec![Err(TransportError::Fatal(
        "HTTP 401: bad key".into(),
    ))]);
    let harness = Harness::new();
    let (tx, _rx) = events();

    let mut driver = harness.driver(&transport);
    let report = driver
        .run(BatchFilter::missing_only(2), false, tx)
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Blocked);
    assert_eq!(transport.requests().len(), 1);
    // Nothing was replayed, so the report must not claim repeated errors.
    assert!(!report.message.contains("repeated"));
    assert!(report.message.contains("HTTP 401"));
}

#[tokio::test]
async fn quota_stop_saves_an_unadvanced_cursor() {
    let transport = ScriptedTransport::new(vec![
        Ok(envelope(2, 2, 2, true)),
        Ok(quota_envelope(1, 0, 3)),
    ]);
    let harness = Harness::new();
    let (tx, rx) = events();

    let mut driver = harness.driver(&transport);
    let report = driver
        .run(BatchFilter::missing_only(2), false, tx)
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Blocked);
    assert_eq!(report.stop_reason, StopReason::QuotaExhausted);

    // The cursor stays at the last safe checkpoint; the failing item was
    // never charged and will be retried after topping up.
    let session = harness.store().load().unwrap().unwrap();
    assert_eq!(session.cursor, 2);
    assert_eq!(session.counters.attempted, 3);

    assert!(drain(rx).await.iter().any(|e| matches!(
        e,
        DriverEvent::ActionRequired { item_id: 3, .. }
    )));
}

#[tokio::test]
async fn resumes_from_a_matching_checkpoint() {
    let harness = Harness::new();
    let filter = BatchFilter::missing_only(2);
    let mut session = Session::new(filter.clone());
    session.checkpoint(42, 10, 8, 2);
    harness.store().save(&session).unwrap();

    let transport = ScriptedTransport::new(vec![Ok(envelope(1, 1, 43, false))]);
    let (tx, rx) = events();

    let mut driver = harness.driver(&transport);
    let report = driver.run(filter, true, tx).await.unwrap();

    assert_eq!(transport.requests()[0].cursor, 42);
    assert_eq!(report.phase, RunPhase::Completed);
    // Counters continue from the checkpoint.
    assert_eq!(report.counters.attempted, 11);
    assert_eq!(report.counters.succeeded, 9);
    assert!(drain(rx)
        .await
        .iter()
        .any(|e| matches!(e, DriverEvent::Started { resumed: true, cursor: 42 })));
}

#[tokio::test]
async fn resume_reuses_the_checkpointed_actor() {
    let harness = Harness::new();
    let filter = BatchFilter::missing_only(2);

    let transport = ScriptedTransport::new(vec![
        Ok(envelope(2, 2, 2, true)),
        Ok(quota_envelope(1, 0, 3)),
    ]);
    let (tx, _rx) = events();
    let mut driver = harness.driver(&transport);
    driver.run(filter.clone(), false, tx).await.unwrap();
    let original_actor = transport.requests()[0].actor.clone();

    // A fresh driver instance resuming the checkpoint presents the same
    // actor id, so server-side skip tallies line up across the restart.
    let transport = ScriptedTransport::new(vec![Ok(envelope(1, 1, 3, false))]);
    let (tx, _rx) = events();
    let mut driver = harness.driver(&transport);
    driver.run(filter, true, tx).await.unwrap();
    assert_eq!(transport.requests()[0].actor, original_actor);
}

#[tokio::test]
async fn changed_filter_discards_the_checkpoint() {
    let harness = Harness::new();
    let mut session = Session::new(BatchFilter::missing_only(2));
    session.checkpoint(42, 10, 8, 2);
    harness.store().save(&session).unwrap();

    let transport = ScriptedTransport::new(vec![Ok(envelope(0, 0, 0, false))]);
    let (tx, _rx) = events();

    let mut driver = harness.driver(&transport);
    // Different batch size means a different filter.
    let report = driver
        .run(BatchFilter::missing_only(5), true, tx)
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(transport.requests()[0].cursor, 0);
    assert_eq!(report.counters.attempted, 0);
}

#[tokio::test]
async fn selection_mismatch_is_surfaced_not_discarded() {
    let harness = Harness::new();
    let pending = BatchFilter {
        scope: Scope::Selection {
            token: "sel-old".to_string(),
        },
        ..BatchFilter::missing_only(2)
    };
    harness.store().save(&Session::new(pending)).unwrap();

    let transport = ScriptedTransport::new(vec![]);
    let (tx, rx) = events();

    let mut driver = harness.driver(&transport);
    let report = driver
        .run(BatchFilter::missing_only(2), true, tx)
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Idle);
    assert!(transport.requests().is_empty());
    // The pending selection run stays resumable.
    assert!(harness.store().load().unwrap().is_some());
    assert!(drain(rx).await.iter().any(|e| matches!(
        e,
        DriverEvent::SelectionConflict { token, .. } if token == "sel-old"
    )));
}

#[tokio::test]
async fn cancellation_clears_the_checkpoint() {
    let transport = ScriptedTransport::new(vec![]);
    let harness = Harness::new();
    harness.cancel_tx.send(true).unwrap();
    let (tx, rx) = events();

    let mut driver = harness.driver(&transport);
    let report = driver
        .run(BatchFilter::missing_only(2), false, tx)
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Cancelled);
    assert!(transport.requests().is_empty());
    assert!(harness.store().load().unwrap().is_none());
    assert!(drain(rx)
        .await
        .iter()
        .any(|e| matches!(e, DriverEvent::Cancelled)));
}
