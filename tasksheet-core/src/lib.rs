//! tasksheet core library: domain types, column mapping, task records,
//! configuration and errors.
//!
//! - [`columns`]: header row → [`ColumnMapping`]
//! - [`task`]: payload schema and [`TaskRecord`] normalization
//! - [`aliases`]: assignee alias table
//! - [`config`]: `~/.tasksheet/config.yaml` load / save / init
//! - [`error`]: [`CoreError`]

pub mod aliases;
pub mod columns;
pub mod config;
pub mod error;
pub mod task;
pub mod types;

pub use aliases::AliasTable;
pub use columns::{column_index, column_letter, Column, ColumnMapping, SPRINT_HEADER_PREFIX};
pub use config::Config;
pub use error::CoreError;
pub use task::{TaskPayload, TaskRecord, TaskRecordFactory};
pub use types::{Row, TaskKey, ROW_WIDTH};
