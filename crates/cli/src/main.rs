//! Chunkline CLI - chl command

use anyhow::Result;
use chunkline_cli::cmd;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Chunkline - content-addressed chunk lineage for your project
#[derive(Parser)]
#[command(name = "chl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .chunkline/ in the current directory
    Init,
    /// Scan the working tree and record it as a snapshot
    Record {
        /// Human-readable label
        #[arg(short, long)]
        label: Option<String>,
        /// Task or agent step that produced this state
        #[arg(short, long)]
        task: Option<String>,
        /// Explicit parent snapshots (default: HEAD)
        #[arg(long = "parent")]
        parents: Vec<String>,
    },
    /// Show snapshot history from HEAD
    Log {
        /// Number of snapshots to show (default: 20)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one snapshot and its files
    Show {
        /// Snapshot reference (ULID, prefix, HEAD, HEAD~N)
        snapshot: String,
    },
    /// Classify every chunk between two snapshots
    Diff {
        /// Old snapshot
        from: String,
        /// New snapshot (default: working tree)
        to: Option<String>,
        /// Include unchanged chunks
        #[arg(long)]
        all: bool,
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow one chunk between two snapshots
    Trace {
        from: String,
        to: String,
        /// File path, relative to the project root
        path: String,
        /// Byte offset inside the file
        #[arg(long, default_value = "0")]
        offset: u64,
    },
    /// Check the revision graph and every stored tree
    Verify,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init => cmd::init::run(),
        Commands::Record { label, task, parents } => cmd::record::run(label, task, parents),
        Commands::Log { limit } => cmd::log::run(limit),
        Commands::Show { snapshot } => cmd::show::run(&snapshot),
        Commands::Diff { from, to, all, json } => cmd::diff::run(&from, to.as_deref(), all, json),
        Commands::Trace { from, to, path, offset } => cmd::trace::run(&from, &to, &path, offset),
        Commands::Verify => cmd::verify::run(),
    }
}
