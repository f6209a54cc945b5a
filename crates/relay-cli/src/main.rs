//! relay: a converser and a coder handing work to each other
//!
//! The converser gathers requirements from the user, hands them to the coder,
//! which writes and runs Python in a sandbox until it can report back.

mod agent;
mod commands;
mod config;
mod console;
mod graph;
mod learn;
mod orchestrator;
mod progress;
mod storage;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use agent::AgentRole;
use commands::{RunOptions, Settings};
use tools::sandbox::SandboxStrategy;

#[derive(Debug, Parser)]
#[command(name = "relay")]
#[command(about = "Converser and coder agents on a local LLM", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable debug logging (stderr)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.config/relay/config.toml)
    #[arg(long, global = true, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// History database (overrides [storage] db_path)
    #[arg(long, global = true, env = "RELAY_DB")]
    db: Option<PathBuf>,

    /// Model to use (overrides [llm] model)
    #[arg(short, long, global = true, env = "RELAY_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start a conversation (default)
    Run {
        /// Opening request; the converser asks for one if empty
        request: Vec<String>,

        /// Sandbox strategy (overrides [sandbox] strategy)
        #[arg(long, value_enum)]
        strategy: Option<SandboxStrategy>,

        /// Continue an earlier converser session
        #[arg(long, value_name = "ID")]
        resume_converser: Option<String>,

        /// Continue an earlier coder session
        #[arg(long, value_name = "ID")]
        resume_coder: Option<String>,

        /// Don't show spinners while waiting
        #[arg(long)]
        no_progress: bool,
    },

    /// Extract lessons from stored conversations
    Learn {
        /// Only this role
        #[arg(long, value_enum)]
        role: Option<AgentRole>,
    },

    /// Inspect stored sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// List lessons learned
    Lessons {
        /// Only this role
        #[arg(long, value_enum)]
        role: Option<AgentRole>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum SessionAction {
    /// List sessions, most recent first
    List {
        /// Only this role
        #[arg(long, value_enum)]
        role: Option<AgentRole>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a session transcript
    Show {
        /// Session ID
        id: String,

        /// Don't truncate messages
        #[arg(long)]
        full: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Create a default config file
    Init,
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so the conversation on stdout stays readable
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::resolve(cli.config, cli.db, cli.model)?;

    match cli.command {
        None => commands::run(&settings, RunOptions {
            show_progress: true,
            ..Default::default()
        })
        .await,
        Some(Commands::Run {
            request,
            strategy,
            resume_converser,
            resume_coder,
            no_progress,
        }) => {
            commands::run(&settings, RunOptions {
                request,
                strategy,
                resume_converser,
                resume_coder,
                show_progress: !no_progress,
            })
            .await
        }
        Some(Commands::Learn { role }) => commands::learn(&settings, role).await,
        Some(Commands::Sessions { action }) => match action {
            SessionAction::List { role, json } => commands::sessions_list(&settings, role, json).await,
            SessionAction::Show { id, full } => commands::sessions_show(&settings, &id, full).await,
        },
        Some(Commands::Lessons { role }) => commands::lessons(&settings, role).await,
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init => commands::config_init(&settings).await,
            ConfigAction::Show => commands::config_show(&settings).await,
        },
    }
}
