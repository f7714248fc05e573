//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod analyze;
mod config_cmd;
mod gc;
mod init;
mod invalidate;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "reno")]
#[command(about = "Renovation risk analysis pipeline")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
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

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Start the HTTP API server
    Serve {
        /// Bind address: a port ("8080"), a host ("0.0.0.0"), or host:port
        #[arg(default_value = "127.0.0.1:8080")]
        bind: String,
    },

    /// Run one analysis in-process and print the report
    Analyze {
        #[command(subcommand)]
        command: AnalyzeCommands,
    },

    /// Drop cached reports so the next submission rebuilds them
    Invalidate {
        /// Exact fingerprint to drop
        #[arg(long)]
        fingerprint: Option<String>,

        /// Analysis kind to match (company, quote, contract, acceptance, designer)
        #[arg(long, requires = "pattern", conflicts_with = "fingerprint")]
        kind: Option<String>,

        /// Substring matched against stored fingerprints
        #[arg(long, requires = "kind", conflicts_with = "fingerprint")]
        pattern: Option<String>,
    },

    /// Clear old raw vendor payloads and prune expired reports
    Gc {
        /// Keep raw payloads on completed reports newer than this many days
        #[arg(long, default_value = "30")]
        keep_days: u32,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum AnalyzeCommands {
    /// Vet a renovation company by name
    Company {
        /// Company name as it appears on the business licence
        name: String,

        /// Region hint to disambiguate companies sharing a name
        #[arg(long)]
        region: Option<String>,
    },

    /// Audit a quote document
    Quote {
        /// Path to the quote image or PDF
        file: PathBuf,

        /// Declared total price, cross-checked against line items
        #[arg(long)]
        total_price: Option<f64>,
    },

    /// Review a contract document
    Contract {
        /// Path to the contract image or PDF
        file: PathBuf,
    },

    /// Check acceptance photos for one construction stage
    Acceptance {
        /// Path to the site photo
        file: PathBuf,

        /// Construction stage (s00..s05 or an alias like "plumbing")
        #[arg(long)]
        stage: String,
    },

    /// Ask the AI designer a question
    Designer {
        /// The question, in any language the model speaks
        question: String,

        /// Reference image file, repeatable
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Serve { bind } => serve::cmd_serve(&settings, &bind).await,
        Commands::Analyze { command } => match command {
            AnalyzeCommands::Company { name, region } => {
                analyze::cmd_analyze_company(&settings, &name, region.as_deref()).await
            }
            AnalyzeCommands::Quote { file, total_price } => {
                analyze::cmd_analyze_quote(&settings, &file, total_price).await
            }
            AnalyzeCommands::Contract { file } => {
                analyze::cmd_analyze_contract(&settings, &file).await
            }
            AnalyzeCommands::Acceptance { file, stage } => {
                analyze::cmd_analyze_acceptance(&settings, &file, &stage).await
            }
            AnalyzeCommands::Designer { question, images } => {
                analyze::cmd_analyze_designer(&settings, &question, &images).await
            }
        },
        Commands::Invalidate {
            fingerprint,
            kind,
            pattern,
        } => {
            invalidate::cmd_invalidate(
                &settings,
                fingerprint.as_deref(),
                kind.as_deref(),
                pattern.as_deref(),
            )
            .await
        }
        Commands::Gc { keep_days } => gc::cmd_gc(&settings, keep_days).await,
        Commands::Config => config_cmd::cmd_config_show(&settings).await,
    }
}
