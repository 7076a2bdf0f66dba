//! CLI parser and command dispatch.

mod cancel;
mod init;
mod run;
mod serve;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::Settings;
use crate::models::GenerationMode;

#[derive(Parser)]
#[command(name = "altgen")]
#[command(about = "Batch alt-text generation for media libraries")]
#[command(version)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Generate for every eligible item, overwriting existing text.
    All,
    /// Only items without alt text.
    #[default]
    Missing,
}

impl From<ModeArg> for GenerationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::All => GenerationMode::All,
            ModeArg::Missing => GenerationMode::MissingOnly,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory, database, and config file
    Init,

    /// Start a batch generation run
    Run {
        /// Which items to process
        #[arg(short, long, value_enum, default_value = "missing")]
        mode: ModeArg,
        /// Items per batch call (1-5)
        #[arg(short, long, default_value = "2")]
        batch_size: u32,
        /// Only items attached to a parent entity
        #[arg(long)]
        attached_only: bool,
        /// Only items never sent to the service before
        #[arg(long)]
        unprocessed_only: bool,
        /// Restrict to parents in this category
        #[arg(long)]
        category: Option<String>,
        /// Process a saved selection set instead of the whole library
        #[arg(long)]
        selection: Option<String>,
        /// Comma-separated keywords to steer generation
        #[arg(short, long)]
        keywords: Option<String>,
        /// Comma-separated keywords to avoid
        #[arg(long)]
        negative_keywords: Option<String>,
        /// Drive a remote coordinator instead of running in process
        #[arg(long)]
        remote: Option<String>,
    },

    /// Resume the checkpointed run, if any
    Resume {
        /// Drive a remote coordinator instead of running in process
        #[arg(long)]
        remote: Option<String>,
    },

    /// Show account usage and any pending session
    Status,

    /// Discard the checkpointed run
    Cancel,

    /// Start the batch coordinator server
    Serve {
        /// Address to bind to: PORT, HOST, or HOST:PORT
        #[arg(default_value = "127.0.0.1:7231")]
        bind: String,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings, cli.config.as_deref()).await,
        Commands::Run {
            mode,
            batch_size,
            attached_only,
            unprocessed_only,
            category,
            selection,
            keywords,
            negative_keywords,
            remote,
        } => {
            let args = run::RunArgs {
                mode: mode.into(),
                batch_size,
                attached_only,
                unprocessed_only,
                category,
                selection,
                keywords: split_keywords(keywords),
                negative_keywords: split_keywords(negative_keywords),
                remote,
            };
            run::cmd_run(&settings, args).await
        }
        Commands::Resume { remote } => run::cmd_resume(&settings, remote).await,
        Commands::Status => status::cmd_status(&settings).await,
        Commands::Cancel => cancel::cmd_cancel(&settings).await,
        Commands::Serve { bind } => serve::cmd_serve(&settings, &bind).await,
    }
}

fn split_keywords(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect()
    })
    .unwrap_or_default()
}
