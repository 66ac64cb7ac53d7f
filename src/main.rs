//! # Revision Timeline CLI (`rtl`)
//!
//! Runs timeline jobs against the configured cloud provider and inspects
//! their results.
//!
//! ## Usage
//!
//! ```bash
//! rtl --config ./config/rtl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rtl init` | Initialize the job state store (creates the SQLite table for `local`) |
//! | `rtl build <document_id> --revisions <file>` | Build a timeline from a revisions file |
//! | `rtl status <job_id>` | Print a job record as JSON |
//! | `rtl validate <request.json>` | Check an `llmRequest` envelope and list every violation |
//!
//! ## Examples
//!
//! ```bash
//! # Build a timeline for doc-42 on behalf of a user
//! rtl build doc-42 --revisions ./revisions.json --user u-17
//!
//! # JSON logs at debug level
//! RUST_LOG=debug rtl --json-logs status 6f1c2a9e-…
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use revision_timeline::config;
use revision_timeline::llm;
use revision_timeline::logging;
use revision_timeline::models::JobStatus;
use revision_timeline::provider::ProviderContext;
use revision_timeline::revisions::{JsonFileRevisionSource, RevisionSource};
use revision_timeline::timeline::TimelineBuilder;

/// Revision Timeline CLI: LLM reverse-outline timelines of document
/// revisions, run as jobs on AWS, Azure, or a local backend.
#[derive(Parser)]
#[command(
    name = "rtl",
    about = "Revision Timeline: build LLM reverse-outline timelines of document revisions",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rtl.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the job state store for the configured provider.
    ///
    /// For `local` this creates the SQLite database and `jobs` table.
    /// Idempotent.
    Init,

    /// Build a timeline for a document.
    ///
    /// Prints the finished job as JSON. Exits non-zero when the job FAILED.
    Build {
        /// Document identifier.
        document_id: String,

        /// JSON file holding the document's revisions.
        #[arg(long)]
        revisions: PathBuf,

        /// User on whose behalf the job runs.
        #[arg(long)]
        user: Option<String>,
    },

    /// Print a job record.
    Status {
        /// Job UUID.
        job_id: String,
    },

    /// Validate an LLM request envelope against the configured model catalog.
    Validate {
        /// File containing `{"llmRequest": {…}}`.
        request: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.json_logs);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let ctx = ProviderContext::new(&cfg)?;
            let store = ctx.job_store().await?;
            println!(
                "Job store initialized ({} on {}).",
                store.backend(),
                ctx.provider()
            );
        }
        Commands::Build {
            document_id,
            revisions,
            user,
        } => {
            let source = JsonFileRevisionSource::new(revisions);
            let revisions = source.list_revisions(&document_id).await?;

            let ctx = ProviderContext::new(&cfg)?;
            let builder = TimelineBuilder::from_context(&ctx).await?;
            let job = builder
                .build(&document_id, user.as_deref(), revisions)
                .await?;

            println!("{}", serde_json::to_string_pretty(&job)?);
            if job.status == JobStatus::Failed {
                bail!(
                    "job {} failed: {}",
                    job.job_id,
                    job.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Commands::Status { job_id } => {
            let ctx = ProviderContext::new(&cfg)?;
            let store = ctx.job_store().await?;
            match store.get_job(&job_id).await? {
                Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
                None => bail!("job {} not found", job_id),
            }
        }
        Commands::Validate { request } => {
            let content = std::fs::read_to_string(&request)
                .with_context(|| format!("Failed to read request file: {}", request.display()))?;
            match llm::parse_request(&content, &cfg.llm.models) {
                Ok(req) => println!(
                    "Request is valid ({} prompt(s), model {}).",
                    req.prompts().len(),
                    req.model()
                ),
                Err(e) => {
                    for violation in &e.violations {
                        eprintln!("  - {}", violation);
                    }
                    bail!("{} violation(s) found", e.violations.len());
                }
            }
        }
    }

    Ok(())
}
