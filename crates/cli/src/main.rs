//! Continuous Verification CLI
//!
//! A command-line tool for registering and inspecting verification jobs,
//! rendering execution metadata trees, and checking service health.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{health, jobs, metadata};
use std::path::PathBuf;

/// Fallback when neither the flag, the env var nor the config file set a URL
const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Continuous Verification CLI
#[derive(Parser)]
#[command(name = "cvctl")]
#[command(author, version, about = "CLI for Continuous Verification", long_about = None)]
pub struct Cli {
    /// Verifier API URL (can also be set via CVCTL_API_URL env var)
    #[arg(long, env = "CVCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage verification jobs
    #[command(subcommand)]
    Jobs(JobsCommands),

    /// Execution metadata trees
    #[command(subcommand)]
    Metadata(MetadataCommands),

    /// Show verifier health and readiness
    Health,
}

#[derive(Subcommand)]
pub enum JobsCommands {
    /// List active and finished jobs
    List {
        /// Filter by status (queued, running, success, failed, error)
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one job and its last tick
    Get {
        /// State execution ID
        id: String,
    },

    /// Register a job from an execution context JSON file
    Register {
        /// Path to the execution context JSON
        file: PathBuf,
    },

    /// Run one tick of a job now
    Tick {
        /// State execution ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum MetadataCommands {
    /// Render a pipeline or workflow execution record as a tree
    Render {
        /// Path to the execution record JSON
        file: PathBuf,

        /// Build the tree on the verifier instead of locally
        #[arg(long)]
        remote: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    let api_url = cli
        .api_url
        .or(config.api_url)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let format = cli
        .format
        .or(config.default_format)
        .unwrap_or_default();

    if cli.verbose {
        output::print_info(&format!("Using verifier at {}", api_url));
    }

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match cli.command {
        Commands::Jobs(jobs_cmd) => match jobs_cmd {
            JobsCommands::List { status } => {
                jobs::list_jobs(&client, status, format).await?;
            }
            JobsCommands::Get { id } => {
                jobs::get_job(&client, &id, format).await?;
            }
            JobsCommands::Register { file } => {
                jobs::register_job(&client, &file, format).await?;
            }
            JobsCommands::Tick { id } => {
                jobs::tick_job(&client, &id, format).await?;
            }
        },
        Commands::Metadata(MetadataCommands::Render { file, remote }) => {
            metadata::render(&client, &file, remote, format).await?;
        }
        Commands::Health => {
            health::show_health(&client, format).await?;
        }
    }

    Ok(())
}
