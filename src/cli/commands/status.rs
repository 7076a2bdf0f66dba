//! Status command.

use console::style;

use crate::api::AltTextClient;
use crate::config::Settings;
use crate::driver::SessionStore;
use crate::repository::{MediaRepository, SliceQuery, SqliteMediaRepository};

/// Show library counts, account usage, and any checkpointed run.
pub async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    if settings.database_path().exists() {
        let repo = SqliteMediaRepository::open(&settings.database_path())?;
        let total = repo.count_matching(&SliceQuery::default()).await?;
        let missing = repo
            .count_matching(&SliceQuery {
                missing_only: true,
                ..SliceQuery::default()
            })
            .await?;
        println!("{} Library:", style("→").cyan());
        println!("  items:     {}", total);
        println!("  missing:   {}", missing);
    }

    let store = SessionStore::new(settings.session_path());
    match store.load()? {
        Some(session) => {
            println!("{} Checkpointed run:", style("→").cyan());
            println!("  cursor:    {}", session.cursor);
            println!(
                "  progress:  {} attempted, {} generated, {} skipped",
                session.counters.attempted,
                session.counters.succeeded,
                session.counters.skipped
            );
            println!("  updated:   {}", session.updated_at.to_rfc3339());
        }
        None => println!("{} No checkpointed run", style("→").dim()),
    }

    if settings.api.resolve_api_key().is_none() {
        println!(
            "{} No API key configured; cannot query account usage",
            style("!").yellow()
        );
        return Ok(());
    }

    let client = AltTextClient::new(settings.api.clone());
    match client.account().await {
        Ok(account) => {
            println!("{} Account:", style("→").cyan());
            println!(
                "  plan:      {}",
                account.subscription.as_deref().unwrap_or("none")
            );
            println!(
                "  usage:     {} of {} ({} remaining)",
                account.usage,
                account.usage_limit,
                account.remaining()
            );
        }
        Err(e) => {
            println!("{} Could not fetch account info: {}", style("✗").red(), e);
        }
    }
    Ok(())
}
