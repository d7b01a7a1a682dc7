//! `tasksheet sync` — reconcile the staging queue now.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use tasksheet_core::config;
use tasksheet_daemon::{request_sync, DaemonError};
use tasksheet_sync::{StagingQueue, SyncEngine, TickReport};

/// Arguments for `tasksheet sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Run the tick in this process even if the daemon is running.
    #[arg(long)]
    pub local: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;

        if !self.local {
            match request_sync(&home) {
                Ok(data) => {
                    let report: TickReport = serde_json::from_value(data).unwrap_or_default();
                    print_report(&report, "daemon");
                    return Ok(());
                }
                Err(DaemonError::DaemonNotRunning { .. }) => {}
                Err(err) => return Err(err).context("daemon sync failed"),
            }
        }

        let config = config::load_at(&home).context("failed to load config")?;
        let queue = Arc::new(StagingQueue::at(&home));
        let mut engine = SyncEngine::from_config(&home, &config, queue)
            .context("cannot reach the spreadsheet with the current config")?;
        let report = engine.tick().context("sync failed")?;
        print_report(&report, "local");
        Ok(())
    }
}

fn print_report(report: &TickReport, source: &str) {
    if report.drained == 0 {
        println!("✓ [{source}] queue empty, nothing to do");
        return;
    }

    println!(
        "✓ [{source}] {} drained ({} updated, {} created, {} skipped)",
        report.drained,
        report.reconciled.updated.len(),
        report.reconciled.created.len(),
        report.skipped,
    );
    for (key, row) in &report.reconciled.updated {
        println!("  {}  {key} → row {row}", "✎".yellow());
    }
    for (key, row) in &report.reconciled.created {
        println!("  {}  {key} → row {row}", "+".green());
    }
}
