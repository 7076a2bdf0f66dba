//! Run and resume commands.

use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, watch};

use crate::api::AltTextClient;
use crate::config::Settings;
use crate::coordinator::BatchCoordinator;
use crate::driver::{
    BatchDriver, CoordinatorTransport, DriverEvent, HttpTransport, LocalTransport, SessionStore,
};
use crate::models::{BatchFilter, GenerationMode, Scope};
use crate::repository::SqliteMediaRepository;

pub struct RunArgs {
    pub mode: GenerationMode,
    pub batch_size: u32,
    pub attached_only: bool,
    pub unprocessed_only: bool,
    pub category: Option<String>,
    pub selection: Option<String>,
    pub keywords: Vec<String>,
    pub negative_keywords: Vec<String>,
    pub remote: Option<String>,
}

impl RunArgs {
    fn filter(&self) -> BatchFilter {
        let scope = match &self.selection {
            Some(token) => Scope::Selection {
                token: token.clone(),
            },
            None => Scope::Library {
                attached_only: self.attached_only,
                unprocessed_only: self.unprocessed_only,
                category: self.category.clone(),
            },
        };
        BatchFilter {
            mode: self.mode,
            scope,
            keywords: self.keywords.clone(),
            negative_keywords: self.negative_keywords.clone(),
            batch_size: self.batch_size,
        }
    }
}

/// Start a new run, discarding any previous checkpoint.
pub async fn cmd_run(settings: &Settings, args: RunArgs) -> anyhow::Result<()> {
    let filter = args.filter();
    drive(settings, filter, args.remote, false).await
}

/// Continue the checkpointed run.
pub async fn cmd_resume(settings: &Settings, remote: Option<String>) -> anyhow::Result<()> {
    let store = SessionStore::new(settings.session_path());
    let Some(session) = store.load()? else {
        println!("{} No checkpointed run to resume", style("!").yellow());
        return Ok(());
    };
    println!(
        "{} Resuming from cursor {} ({} attempted so far)",
        style("→").cyan(),
        session.cursor,
        session.counters.attempted
    );
    drive(settings, session.filter, remote, true).await
}

async fn drive(
    settings: &Settings,
    filter: BatchFilter,
    remote: Option<String>,
    allow_resume: bool,
) -> anyhow::Result<()> {
    let transport: Box<dyn CoordinatorTransport> = match remote {
        Some(base_url) => Box::new(HttpTransport::new(
            base_url,
            Duration::from_secs(settings.api.timeout_secs),
        )),
        None => {
            let repo = Arc::new(SqliteMediaRepository::open(&settings.database_path())?);
            let backend = Arc::new(AltTextClient::new(settings.api.clone()));
            let coordinator = Arc::new(BatchCoordinator::new(
                repo,
                backend,
                settings.eligibility.to_policy(),
                settings.generation.clone(),
            ));
            Box::new(LocalTransport::new(coordinator))
        }
    };

    let store = SessionStore::new(settings.session_path());
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let (event_tx, event_rx) = mpsc::channel::<DriverEvent>(100);
    let ui = tokio::spawn(handle_events(event_rx));

    let mut driver = BatchDriver::new(transport, store, settings.driver.clone(), cancel_rx);
    let report = driver.run(filter, allow_resume, event_tx).await?;
    let _ = ui.await;

    tracing::debug!(cursor = report.cursor, phase = ?report.phase, "run finished");
    Ok(())
}

async fn handle_events(mut event_rx: mpsc::Receiver<DriverEvent>) {
    let mut pb: Option<ProgressBar> = None;

    while let Some(event) = event_rx.recv().await {
        match event {
            DriverEvent::Started { resumed, cursor } => {
                if resumed {
                    println!(
                        "{} Continuing past item {}",
                        style("→").cyan(),
                        cursor
                    );
                }
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} {msg}")
                        .unwrap(),
                );
                bar.set_message("processing...");
                bar.enable_steady_tick(Duration::from_millis(120));
                pb = Some(bar);
            }
            DriverEvent::BatchCompleted {
                attempted,
                succeeded,
                skipped,
                cursor,
                subtitle,
            } => {
                if let Some(bar) = &pb {
                    let detail = if subtitle.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", subtitle)
                    };
                    bar.set_message(format!(
                        "batch done: {} attempted, {} generated, {} skipped, at item {}{}",
                        attempted, succeeded, skipped, cursor, detail
                    ));
                }
            }
            DriverEvent::TransportRetry { attempt, cause } => {
                if let Some(bar) = &pb {
                    bar.set_message(format!("retrying call ({}): {}", attempt, cause));
                }
            }
            DriverEvent::Completed { counters, summary } => {
                if let Some(bar) = pb.take() {
                    bar.finish_and_clear();
                }
                println!(
                    "{} Generated alt text for {} of {} items ({} skipped)",
                    style("✓").green(),
                    counters.succeeded,
                    counters.attempted,
                    counters.skipped
                );
                if !summary.is_empty() {
                    println!("  Skipped: {}", summary);
                }
            }
            DriverEvent::ActionRequired {
                code,
                message,
                item_id,
            } => {
                if let Some(bar) = pb.take() {
                    bar.finish_and_clear();
                }
                println!("{} {}", style("✗").red(), message);
                println!(
                    "  Stopped at item {}. Fix the account ({}) and run `altgen resume`.",
                    item_id, code
                );
            }
            DriverEvent::Blocked { message } => {
                if let Some(bar) = pb.take() {
                    bar.finish_and_clear();
                }
                println!("{} {}", style("✗").red(), message);
                println!("  The checkpoint is kept; run `altgen resume` to retry.");
            }
            DriverEvent::Cancelled => {
                if let Some(bar) = pb.take() {
                    bar.finish_and_clear();
                }
                println!("{} Run cancelled", style("!").yellow());
            }
            DriverEvent::SelectionConflict { token, resume_url } => {
                if let Some(bar) = pb.take() {
                    bar.finish_and_clear();
                }
                println!(
                    "{} A run for selection '{}' is still pending",
                    style("!").yellow(),
                    token
                );
                println!("  Resume it at {} or `altgen cancel` to discard it.", resume_url);
            }
        }
    }
}
