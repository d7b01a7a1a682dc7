//! # tasksheet-sync
//!
//! Staging queue, spreadsheet client and batch reconciliation.
//!
//! Call [`run_tick`] (or [`SyncEngine::tick`]) to drain the queue and write
//! every pending task change to the worksheet in one batch.

pub mod backend;
pub mod client;
pub mod error;
pub mod http;
pub mod limiter;
pub mod memory;
pub mod pipeline;
pub mod queue;
pub mod reconcile;
pub mod retry;

pub use backend::{Dimension, RangeWrite, SheetBackend, ValueRender};
pub use client::{ClientSettings, KeyLayout, SheetClient};
pub use error::{SheetError, SyncError};
pub use http::HttpSheetsBackend;
pub use memory::{CallKind, MemorySheet};
pub use pipeline::{run_tick, Backoff, SyncEngine, TickReport};
pub use queue::{queue_path_at, QueueEntry, StagingQueue};
pub use reconcile::{build_row, reconcile, store_task, ReconcileReport};
pub use retry::RetryPolicy;
