//! Shared sync pipeline entrypoint used by CLI and daemon.
//!
//! A tick drains the staging queue, turns every entry into a
//! [`TaskRecord`], and hands the whole batch to [`reconcile`]. Entries that
//! fail to decode are skipped; a batch that fails with a retryable error is
//! requeued, one that fails permanently is dropped.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tasksheet_core::{AliasTable, Config, TaskRecord, TaskRecordFactory};

use crate::client::{ClientSettings, SheetClient};
use crate::error::SyncError;
use crate::http::HttpSheetsBackend;
use crate::queue::{QueueEntry, StagingQueue};
use crate::reconcile::{reconcile, ReconcileReport};

/// Outcome of one worker tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Entries taken off the queue.
    pub drained: usize,
    /// Entries dropped because their payload was malformed.
    pub skipped: usize,
    pub reconciled: ReconcileReport,
}

/// Everything a tick needs, owned by whoever drives the worker loop.
pub struct SyncEngine {
    pub client: SheetClient,
    pub factory: TaskRecordFactory,
    pub queue: Arc<StagingQueue>,
}

impl SyncEngine {
    pub fn new(client: SheetClient, factory: TaskRecordFactory, queue: Arc<StagingQueue>) -> Self {
        Self {
            client,
            factory,
            queue,
        }
    }

    /// Wire the HTTP backend, alias table and queue for `home`.
    ///
    /// Fails only on missing settings; the alias table degrades to empty.
    pub fn from_config(home: &Path, config: &Config, queue: Arc<StagingQueue>) -> Result<Self, SyncError> {
        let backend = HttpSheetsBackend::from_config(config)?;
        let client = SheetClient::new(Box::new(backend), ClientSettings::from_config(config));
        let aliases = AliasTable::load_or_empty(&config.aliases_path_at(home));
        let factory = TaskRecordFactory::new(aliases, config.tracker_base_url.clone());
        Ok(Self::new(client, factory, queue))
    }

    pub fn tick(&mut self) -> Result<TickReport, SyncError> {
        run_tick(&mut self.client, &self.factory, &self.queue)
    }
}

/// Drain the queue and reconcile everything in it as one batch.
pub fn run_tick(
    client: &mut SheetClient,
    factory: &TaskRecordFactory,
    queue: &StagingQueue,
) -> Result<TickReport, SyncError> {
    let entries = queue.drain()?;
    if entries.is_empty() {
        return Ok(TickReport::default());
    }

    let mut report = TickReport {
        drained: entries.len(),
        ..TickReport::default()
    };
    let mut kept: Vec<QueueEntry> = Vec::with_capacity(entries.len());
    let mut records: Vec<TaskRecord> = Vec::with_capacity(entries.len());
    for entry in entries {
        match factory.from_json(&entry.payload) {
            Ok(record) => {
                records.push(record);
                kept.push(entry);
            }
            Err(err) => {
                tracing::warn!(key = %entry.key, error = %err, "skipping malformed queue entry");
                report.skipped += 1;
            }
        }
    }
    if records.is_empty() {
        return Ok(report);
    }

    match reconcile(client, records) {
        Ok(reconciled) => {
            tracing::info!(
                drained = report.drained,
                updated = reconciled.updated.len(),
                created = reconciled.created.len(),
                skipped = report.skipped,
                "tick complete"
            );
            report.reconciled = reconciled;
            Ok(report)
        }
        Err(err) if err.is_retryable() => {
            let restored = queue.requeue(kept)?;
            tracing::warn!(code = err.code(), error = %err, restored, "tick failed; entries requeued");
            Err(err.into())
        }
        Err(err) => {
            tracing::error!(
                code = err.code(),
                error = %err,
                dropped = kept.len(),
                keys = ?kept.iter().map(|e| e.key.as_str()).collect::<Vec<_>>(),
                "tick failed permanently; entries dropped"
            );
            Err(err.into())
        }
    }
}

/// Delays between worker ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub poll: Duration,
    pub quota: Duration,
    pub error: Duration,
}

impl Backoff {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll: config.poll_interval(),
            quota: config.quota_backoff(),
            error: config.error_backoff(),
        }
    }

    /// How long to wait after a tick finished with `result`.
    pub fn after<T>(&self, result: &Result<T, SyncError>) -> Duration {
        match result {
            Ok(_) => self.poll,
            Err(err) if err.is_quota() => self.quota,
            Err(_) => self.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SheetError;
    use crate::memory::MemorySheet;
    use crate::retry::RetryPolicy;
    use serde_json::json;
    use tempfile::TempDir;

    fn engine(sheet: &MemorySheet, home: &Path) -> SyncEngine {
        let settings = ClientSettings {
            min_request_interval: Duration::ZERO,
            connect_policy: RetryPolicy::immediate(2),
            operation_policy: RetryPolicy::immediate(2),
            ..ClientSettings::default()
        };
        SyncEngine::new(
            SheetClient::new(Box::new(sheet.clone()), settings),
            TaskRecordFactory::new(AliasTable::default(), "https://t"),
            Arc::new(StagingQueue::at(home)),
        )
    }

    fn sheet() -> MemorySheet {
        MemorySheet::new(
            "Tasks",
            vec![vec![json!("Наименование"), json!("Статус"), json!("Комментарии")]],
        )
    }

    #[test]
    fn empty_queue_makes_no_calls() {
        let home = TempDir::new().unwrap();
        let sheet = sheet();
        let report = engine(&sheet, home.path()).tick().unwrap();
        assert_eq!(report, TickReport::default());
        assert!(sheet.calls().is_empty());
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let home = TempDir::new().unwrap();
        let sheet = sheet();
        let mut engine = engine(&sheet, home.path());
        engine.queue.enqueue("P-1", json!({"status": "Open"})).unwrap();
        engine.queue.enqueue("P-2", json!("not an object")).unwrap();

        let report = engine.tick().unwrap();
        assert_eq!(report.drained, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.reconciled.created, vec![("P-1".to_string(), 3)]);
    }

    #[test]
    fn retryable_failure_requeues_batch() {
        let home = TempDir::new().unwrap();
        let sheet = sheet();
        let mut engine = engine(&sheet, home.path());
        engine.queue.enqueue("P-1", json!({})).unwrap();
        for _ in 0..2 {
            sheet.push_fault(SheetError::Connection("down".to_string()));
        }

        let err = engine.tick().unwrap_err();
        assert!(matches!(err, SyncError::Sheet(SheetError::Connection(_))));
        assert_eq!(engine.queue.len().unwrap(), 1);
    }

    #[test]
    fn permanent_failure_drops_batch() {
        let home = TempDir::new().unwrap();
        let sheet = MemorySheet::new("Other", vec![vec![json!("Наименование")]]);
        let mut engine = engine(&sheet, home.path());
        engine.queue.enqueue("P-1", json!({})).unwrap();

        let err = engine.tick().unwrap_err();
        assert!(matches!(err, SyncError::Sheet(SheetError::WorksheetNotFound(_))));
        assert!(engine.queue.is_empty().unwrap());
    }

    #[test]
    fn backoff_prefers_quota_cooldown() {
        let backoff = Backoff::from_config(&Config::default());
        let ok: Result<(), SyncError> = Ok(());
        let quota: Result<(), SyncError> = Err(SheetError::Quota {
            status: 429,
            message: String::new(),
        }
        .into());
        let other: Result<(), SyncError> = Err(SyncError::EmptyKey);
        assert_eq!(backoff.after(&ok), Duration::from_secs(30));
        assert_eq!(backoff.after(&quota), Duration::from_secs(60));
        assert_eq!(backoff.after(&other), Duration::from_secs(30));
    }
}
