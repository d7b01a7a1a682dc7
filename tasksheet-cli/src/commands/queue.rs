//! `tasksheet queue` — inspect the staging queue.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use tasksheet_sync::{QueueEntry, StagingQueue};

#[derive(Args, Debug)]
pub struct QueueArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct QueueTableRow {
    #[tabled(rename = "key")]
    key: String,
    #[tabled(rename = "summary")]
    summary: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "waiting")]
    waiting: String,
}

impl QueueArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let queue = StagingQueue::at(&home);
        let entries = queue
            .pending()
            .with_context(|| format!("failed to read {}", queue.path().display()))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&entries).context("failed to render queue JSON")?
            );
            return Ok(());
        }

        if entries.is_empty() {
            println!("Queue is empty.");
            return Ok(());
        }

        let now = Utc::now();
        let rows: Vec<QueueTableRow> = entries.iter().map(|e| table_row(e, now)).collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
        println!(
            "{} {}",
            entries.len().to_string().bold(),
            if entries.len() == 1 { "entry waiting" } else { "entries waiting" }
        );
        Ok(())
    }
}

fn table_row(entry: &QueueEntry, now: DateTime<Utc>) -> QueueTableRow {
    QueueTableRow {
        key: entry.key.clone(),
        summary: truncate(&field(&entry.payload, "summary"), 48),
        status: field(&entry.payload, "status"),
        waiting: format_age(now - entry.enqueued_at),
    }
}

fn field(payload: &Value, name: &str) -> String {
    match payload.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{cut}…")
}

fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}
