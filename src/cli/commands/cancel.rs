//! Cancel command.

use console::style;

use crate::config::Settings;
use crate::driver::SessionStore;

/// Discard the checkpointed run.
pub async fn cmd_cancel(settings: &Settings) -> anyhow::Result<()> {
    let store = SessionStore::new(settings.session_path());
    match store.load()? {
        Some(session) => {
            store.clear()?;
            println!(
                "{} Discarded checkpoint at cursor {} ({} attempted)",
                style("✓").green(),
                session.cursor,
                session.counters.attempted
            );
        }
        None => println!("{} No checkpointed run to cancel", style("!").yellow()),
    }
    Ok(())
}
