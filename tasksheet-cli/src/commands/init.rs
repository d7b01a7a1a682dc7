//! `tasksheet init [--spreadsheet-id <id>] [--worksheet <title>]`

use anyhow::{Context, Result};
use clap::Args;

use tasksheet_core::config;

/// Create the configuration file if it does not exist yet.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Spreadsheet document id (the long token in the sheet URL).
    #[arg(long)]
    pub spreadsheet_id: Option<String>,

    /// Worksheet (tab) title to reconcile into.
    #[arg(long, short = 'w')]
    pub worksheet: Option<String>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let path = config::config_path_at(&home);
        let existed = path.exists();

        let config = config::init_at(&home, self.spreadsheet_id, self.worksheet)
            .with_context(|| format!("failed to initialize {}", path.display()))?;

        if existed {
            println!("✓ Config already present: {}", path.display());
        } else {
            println!("✓ Wrote default config: {}", path.display());
        }
        println!("  worksheet: {}", config.worksheet);
        if config.spreadsheet_id.is_empty() {
            println!("  spreadsheet_id is empty; set it in the file or via TASKSHEET_SPREADSHEET_ID");
        }
        if config.access_token.is_none() {
            println!("  access token: export TASKSHEET_ACCESS_TOKEN before syncing");
        }
        Ok(())
    }
}
