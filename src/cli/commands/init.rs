//! Initialize command.

use std::path::Path;

use console::style;

use crate::config::Settings;
use crate::repository::SqliteMediaRepository;

/// Initialize the data directory, database schema, and config file.
pub async fn cmd_init(settings: &Settings, config_path: Option<&Path>) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.data_dir)?;

    // Opening creates the schema.
    let _repo = SqliteMediaRepository::open(&settings.database_path())?;
    println!(
        "  {} Database ready at {}",
        style("✓").green(),
        settings.database_path().display()
    );

    let config_path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(Settings::default_config_path);
    if config_path.exists() {
        println!(
            "  {} Config already exists at {}",
            style("!").yellow(),
            config_path.display()
        );
    } else {
        settings.save(&config_path)?;
        println!(
            "  {} Wrote default config to {}",
            style("✓").green(),
            config_path.display()
        );
    }

    if settings.api.resolve_api_key().is_none() {
        println!(
            "  {} No API key found; set ALTGEN_API_KEY or api.api_key in the config",
            style("!").yellow()
        );
    }

    println!(
        "{} Initialized altgen in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    Ok(())
}
