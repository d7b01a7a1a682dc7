//! `tasksheet enqueue <key>` — stage a task change.
//!
//! Goes through the daemon socket when the daemon is running so the worker's
//! queue handle sees the change; otherwise writes the queue file directly.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::Value;

use tasksheet_daemon::{request_enqueue, DaemonError};
use tasksheet_sync::StagingQueue;

#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Task key, e.g. PROJ-123.
    pub key: String,

    /// Task payload as a JSON object.
    #[arg(long, conflicts_with = "file")]
    pub payload: Option<String>,

    /// Read the JSON payload from a file (`-` for stdin).
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Write to the queue file even if the daemon is running.
    #[arg(long)]
    pub local: bool,
}

impl EnqueueArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let payload = self.read_payload()?;

        if !self.local {
            match request_enqueue(&home, &self.key, payload.clone()) {
                Ok(data) => {
                    let depth = data.get("queue_depth").and_then(Value::as_u64).unwrap_or(0);
                    println!("✓ '{}' handed to daemon (queue depth {depth})", self.key);
                    return Ok(());
                }
                Err(DaemonError::DaemonNotRunning { .. }) => {}
                Err(err) => return Err(err).context("daemon rejected enqueue"),
            }
        }

        enqueue_local(&home, &self.key, payload)
    }

    fn read_payload(&self) -> Result<Value> {
        let raw = match (&self.payload, &self.file) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) if path.as_os_str() == "-" => {
                std::io::read_to_string(std::io::stdin()).context("failed to read stdin")?
            }
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            (None, None) => "{}".to_string(),
        };
        let value: Value = serde_json::from_str(&raw).context("payload is not valid JSON")?;
        if !value.is_object() {
            bail!("payload must be a JSON object");
        }
        Ok(value)
    }
}

fn enqueue_local(home: &Path, key: &str, payload: Value) -> Result<()> {
    let queue = StagingQueue::at(home);
    queue
        .enqueue(key, payload)
        .with_context(|| format!("failed to enqueue '{key}'"))?;
    let depth = queue.len().context("failed to read queue")?;
    println!("✓ '{}' queued locally (queue depth {depth})", key.trim());
    Ok(())
}
