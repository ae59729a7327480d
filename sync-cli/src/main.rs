//! # taskflow-sync
//!
//! CLI tool for exercising TaskFlow peer-to-peer sync.
//!
//! ## Commands
//!
//! - `merge`: Merge two snapshot files offline
//! - `simulate`: Sync two replicas over an in-memory network
//! - `peer-id`: Generate a peer id
//! - `config`: Show the effective engine configuration
//!
//! ## Example
//!
//! ```bash
//! # Reconcile two exported replicas
//! taskflow-sync merge laptop.json phone.json --out merged.json
//!
//! # Watch two engines pull and push over the mock network
//! taskflow-sync simulate --local laptop.json --remote phone.json
//!
//! # Show what the engine would run with
//! taskflow-sync --config taskflow-sync.toml config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use taskflow_sync_core::MergePolicy;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{merge, peer_id, show_config, simulate};

/// CLI tool for exercising TaskFlow peer-to-peer sync.
#[derive(Parser, Debug)]
#[command(name = "taskflow-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge two snapshot files and print the result
    Merge {
        /// Local snapshot (its version and category colors win)
        local: PathBuf,

        /// Remote snapshot
        remote: PathBuf,

        /// Task collision rule (defaults to the configured policy)
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// Write the merged snapshot here instead of stdout
        #[arg(long, short)]
        out: Option<PathBuf>,
    },

    /// Sync two replicas through two engines on an in-memory network
    Simulate {
        /// Snapshot for the connecting engine
        #[arg(long)]
        local: PathBuf,

        /// Snapshot for the accepting engine (becomes host)
        #[arg(long)]
        remote: PathBuf,
    },

    /// Print a freshly generated peer id
    PeerId {
        /// Id prefix (defaults to the configured prefix)
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyArg {
    /// Later `createdAt` wins
    CreatedAt,
    /// Later `updatedAt` wins, falling back to `createdAt`
    LastModified,
}

impl From<PolicyArg> for MergePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::CreatedAt => MergePolicy::CreatedAt,
            PolicyArg::LastModified => MergePolicy::LastModified,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let engine_config = config::load_engine_config(cli.config.as_deref())
        .await
        .context("Failed to load engine configuration")?;

    match cli.command {
        Commands::Merge {
            local,
            remote,
            policy,
            out,
        } => {
            let policy = policy.map(MergePolicy::from).unwrap_or(engine_config.merge.policy);
            merge::run(&local, &remote, policy, out.as_deref()).await?;
        }
        Commands::Simulate { local, remote } => {
            simulate::run(engine_config, &local, &remote).await?;
        }
        Commands::PeerId { prefix } => {
            let prefix = prefix.unwrap_or(engine_config.peer_id_prefix);
            peer_id::run(&prefix);
        }
        Commands::Config => {
            show_config::run(&engine_config)?;
        }
    }

    Ok(())
}
