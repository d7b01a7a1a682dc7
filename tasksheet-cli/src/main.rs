//! tasksheet: mirror task-change events into a spreadsheet.
//!
//! # Usage
//!
//! ```text
//! tasksheet init [--spreadsheet-id <id>] [--worksheet <title>]
//! tasksheet enqueue <key> [--payload <json> | --file <path>] [--local]
//! tasksheet queue [--json]
//! tasksheet sync [--local]
//! tasksheet daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, enqueue::EnqueueArgs, init::InitArgs, queue::QueueArgs,
    sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "tasksheet",
    version,
    about = "Queue task changes and reconcile them into a spreadsheet",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default ~/.tasksheet/config.yaml.
    Init(InitArgs),

    /// Stage a task change for the next sync.
    Enqueue(EnqueueArgs),

    /// List task changes waiting in the staging queue.
    Queue(QueueArgs),

    /// Reconcile everything in the staging queue now.
    Sync(SyncArgs),

    /// Manage the background worker.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Enqueue(args) => args.run(),
        Commands::Queue(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
