//! Rate-limited, retrying client for one worksheet.
//!
//! [`SheetClient`] owns a [`SheetBackend`] and layers on top of it:
//!
//! - a session holding the [`ColumnMapping`] read from the header row,
//!   dropped whenever the backend reports an API-classified failure so the
//!   next call reconnects first;
//! - a [`RateLimiter`] spacing every backend call;
//! - [`RetryPolicy`]s for connecting and for individual operations;
//! - a short-lived cache of the first column (the key listing), invalidated
//!   after every successful write.
//!
//! Row numbers are 1-based and row 1 is the header.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use regex::RegexBuilder;

use tasksheet_core::types::{cell_text, normalize_row, Row, ROW_WIDTH};
use tasksheet_core::{ColumnMapping, Config, TaskKey};

use crate::backend::{
    first_column_range, rows_range, Dimension, RangeWrite, SheetBackend, ValueRender,
};
use crate::error::SheetError;
use crate::limiter::RateLimiter;
use crate::retry::{self, RetryPolicy};

/// Tunables for a [`SheetClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub worksheet: String,
    /// Rows directly below the header that never receive data.
    pub reserved_rows: usize,
    pub min_request_interval: Duration,
    pub key_cache_ttl: Duration,
    pub connect_policy: RetryPolicy,
    pub operation_policy: RetryPolicy,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worksheet: config.worksheet.clone(),
            reserved_rows: config.reserved_rows,
            min_request_interval: config.min_request_interval(),
            key_cache_ttl: config.key_cache_ttl(),
            connect_policy: RetryPolicy::connect(),
            operation_policy: RetryPolicy::operation(),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug)]
struct Session {
    mapping: ColumnMapping,
}

#[derive(Debug)]
struct KeyCache {
    fetched_at: Instant,
    cells: Vec<String>,
}

/// Where existing keys live and where new rows go, from one key listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyLayout {
    pub index: HashMap<String, usize>,
    pub append_row: usize,
}

pub struct SheetClient {
    backend: Box<dyn SheetBackend>,
    settings: ClientSettings,
    limiter: RateLimiter,
    session: Option<Session>,
    key_cache: Option<KeyCache>,
}

impl SheetClient {
    /// Wrap `backend`; no call is made until the first operation.
    pub fn new(backend: Box<dyn SheetBackend>, settings: ClientSettings) -> Self {
        Self {
            backend,
            limiter: RateLimiter::new(settings.min_request_interval),
            settings,
            session: None,
            key_cache: None,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// First row that may hold task data.
    pub fn first_data_row(&self) -> usize {
        self.settings.reserved_rows + 2
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    /// Verify the worksheet exists, read the header and build the mapping.
    ///
    /// Retried under the connect policy.
    pub fn connect(&mut self) -> Result<(), SheetError> {
        let policy = self.settings.connect_policy;
        retry::run(&policy, "connect", |_| self.connect_once())
    }

    /// Drop the current session and connect again.
    pub fn reconnect(&mut self) -> Result<(), SheetError> {
        self.session = None;
        self.key_cache = None;
        self.connect()
    }

    /// Column mapping of the current session, connecting first if needed.
    pub fn mapping(&mut self) -> Result<&ColumnMapping, SheetError> {
        self.ensure_connected()?;
        self.session
            .as_ref()
            .map(|session| &session.mapping)
            .ok_or_else(|| SheetError::Header("no active session".to_string()))
    }

    fn ensure_connected(&mut self) -> Result<(), SheetError> {
        if self.session.is_none() {
            self.connect()?;
        }
        Ok(())
    }

    fn connect_once(&mut self) -> Result<(), SheetError> {
        let worksheet = self.settings.worksheet.clone();
        let titles = self.call(|backend| backend.worksheet_titles())?;
        if !titles.iter().any(|title| *title == worksheet) {
            return Err(SheetError::WorksheetNotFound(worksheet));
        }

        let range = rows_range(&worksheet, 1, 1, ROW_WIDTH);
        let blocks = self.call(|backend| {
            backend.batch_get(
                std::slice::from_ref(&range),
                Dimension::Rows,
                ValueRender::FormattedValue,
            )
        })?;
        let header: Vec<String> = first_line(first_block(blocks)).iter().map(cell_text).collect();
        let mapping = ColumnMapping::from_header(&header)?;

        tracing::info!(
            worksheet = %worksheet,
            columns = mapping.header_width(),
            "connected to worksheet"
        );
        self.session = Some(Session { mapping });
        self.key_cache = None;
        Ok(())
    }

    /// One rate-limited backend call.
    fn call<T>(
        &mut self,
        f: impl FnOnce(&dyn SheetBackend) -> Result<T, SheetError>,
    ) -> Result<T, SheetError> {
        self.limiter.acquire();
        f(self.backend.as_ref())
    }

    /// Run `f` under the operation retry policy, reconnecting between
    /// attempts when a failure dropped the session.
    fn operation<T, F>(&mut self, op: &'static str, mut f: F) -> Result<T, SheetError>
    where
        F: FnMut(&mut Self) -> Result<T, SheetError>,
    {
        self.ensure_connected()?;
        let policy = self.settings.operation_policy;
        retry::run(&policy, op, |_| {
            if self.session.is_none() {
                self.connect_once()?;
            }
            let result = f(self);
            if let Err(err) = &result {
                if err.invalidates_session() && self.session.take().is_some() {
                    tracing::warn!(op, code = err.code(), "dropping sheet session");
                    self.key_cache = None;
                }
            }
            result
        })
    }

    // -----------------------------------------------------------------------
    // Key listing
    // -----------------------------------------------------------------------

    /// Display text of every first-column cell, row 1 first.
    ///
    /// Served from cache while younger than the configured TTL.
    pub fn key_listing(&mut self) -> Result<Vec<String>, SheetError> {
        if let Some(cache) = &self.key_cache {
            if cache.fetched_at.elapsed() < self.settings.key_cache_ttl {
                return Ok(cache.cells.clone());
            }
        }

        let range = first_column_range(&self.settings.worksheet);
        let cells = self.operation("key_listing", |client| {
            let blocks = client.call(|backend| {
                backend.batch_get(
                    std::slice::from_ref(&range),
                    Dimension::Columns,
                    ValueRender::FormattedValue,
                )
            })?;
            Ok(first_line(first_block(blocks)).iter().map(cell_text).collect::<Vec<_>>())
        })?;

        tracing::debug!(rows = cells.len(), "refreshed key listing");
        self.key_cache = Some(KeyCache {
            fetched_at: Instant::now(),
            cells: cells.clone(),
        });
        Ok(cells)
    }

    /// Forget the cached key listing.
    pub fn invalidate_cache(&mut self) {
        self.key_cache = None;
    }

    /// Folded task key → row number for every data row carrying a
    /// `KEY: summary` label. The first occurrence of a key wins.
    pub fn key_index(&mut self) -> Result<HashMap<String, usize>, SheetError> {
        let listing = self.key_listing()?;
        Ok(index_listing(&listing))
    }

    /// Key index and append row taken from a single listing, so a batch can
    /// place its creates without re-reading after its updates land.
    pub fn key_layout(&mut self) -> Result<KeyLayout, SheetError> {
        let listing = self.key_listing()?;
        Ok(KeyLayout {
            index: index_listing(&listing),
            append_row: append_row_after(&listing, self.first_data_row()),
        })
    }

    /// First row at or after the first data row whose key cell is empty;
    /// one past the end when there is none.
    pub fn find_first_empty_row(&mut self) -> Result<usize, SheetError> {
        let listing = self.key_listing()?;
        let first = self.first_data_row();
        let free = (first..=listing.len()).find(|row| listing[row - 1].trim().is_empty());
        Ok(free.unwrap_or_else(|| (listing.len() + 1).max(first)))
    }

    /// Row whose key cell reads `KEY: …` (case-insensitive).
    pub fn find_row_by_key_prefix(&mut self, key: &TaskKey) -> Result<Option<usize>, SheetError> {
        let pattern = RegexBuilder::new(&format!("^{}: .+", regex::escape(key.as_str())))
            .case_insensitive(true)
            .build()
            .map_err(|e| SheetError::Decode(e.to_string()))?;
        let listing = self.key_listing()?;
        Ok(listing
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, cell)| pattern.is_match(cell))
            .map(|(offset, _)| offset + 1))
    }

    /// Row where a contiguous block of new rows starts: one past the last
    /// non-empty key cell, never before the first data row.
    pub fn next_append_row(&mut self) -> Result<usize, SheetError> {
        let listing = self.key_listing()?;
        Ok(append_row_after(&listing, self.first_data_row()))
    }

    // -----------------------------------------------------------------------
    // Rows
    // -----------------------------------------------------------------------

    /// Snapshot of one row, padded to the fixed row width.
    pub fn read_row(&mut self, row: usize) -> Result<Row, SheetError> {
        let mut rows = self.read_rows(&[row])?;
        Ok(rows.pop().unwrap_or_else(|| normalize_row(Vec::new(), ROW_WIDTH)))
    }

    /// Snapshots of several rows in one request, in the order asked.
    ///
    /// Formulas are returned raw so carried-over cells survive a rewrite.
    pub fn read_rows(&mut self, rows: &[usize]) -> Result<Vec<Row>, SheetError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let worksheet = self.settings.worksheet.clone();
        let ranges: Vec<String> = rows
            .iter()
            .map(|row| rows_range(&worksheet, *row, *row, ROW_WIDTH))
            .collect();
        let blocks = self.operation("read_rows", |client| {
            client.call(|backend| backend.batch_get(&ranges, Dimension::Rows, ValueRender::Formula))
        })?;

        let mut blocks = blocks.into_iter();
        Ok(rows
            .iter()
            .map(|_| {
                let block = blocks.next().unwrap_or_default();
                normalize_row(first_line(block), ROW_WIDTH)
            })
            .collect())
    }

    /// Overwrite one row.
    pub fn write_row(&mut self, row: usize, values: Row) -> Result<(), SheetError> {
        self.batch_write(&[(row, values)])
    }

    /// Overwrite several discrete rows in one request.
    pub fn batch_write(&mut self, rows: &[(usize, Row)]) -> Result<(), SheetError> {
        if rows.is_empty() {
            return Ok(());
        }
        let worksheet = self.settings.worksheet.clone();
        let writes: Vec<RangeWrite> = rows
            .iter()
            .map(|(row, values)| RangeWrite {
                range: rows_range(&worksheet, *row, *row, ROW_WIDTH),
                values: vec![normalize_row(values.clone(), ROW_WIDTH)],
            })
            .collect();
        self.apply_writes("batch_write", writes)
    }

    /// Write `rows` as one contiguous block starting at `start`.
    pub fn write_block(&mut self, start: usize, rows: &[Row]) -> Result<(), SheetError> {
        if rows.is_empty() {
            return Ok(());
        }
        let end = start + rows.len() - 1;
        let write = RangeWrite {
            range: rows_range(&self.settings.worksheet, start, end, ROW_WIDTH),
            values: rows
                .iter()
                .map(|row| normalize_row(row.clone(), ROW_WIDTH))
                .collect(),
        };
        self.apply_writes("write_block", vec![write])
    }

    fn apply_writes(&mut self, op: &'static str, writes: Vec<RangeWrite>) -> Result<(), SheetError> {
        self.operation(op, |client| client.call(|backend| backend.batch_update(&writes)))?;
        tracing::debug!(op, ranges = writes.len(), "rows written");
        self.invalidate_cache();
        Ok(())
    }
}

/// First row (or column) of a returned block, empty if the block is.
fn index_listing(listing: &[String]) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (offset, cell) in listing.iter().enumerate().skip(1) {
        if let Some(key) = key_from_label(cell) {
            index.entry(key).or_insert(offset + 1);
        }
    }
    index
}

fn append_row_after(listing: &[String], first_data_row: usize) -> usize {
    let last_used = listing
        .iter()
        .rposition(|cell| !cell.trim().is_empty())
        .map(|offset| offset + 1)
        .unwrap_or(0);
    (last_used + 1).max(first_data_row)
}

/// Block of the first requested range.
fn first_block(blocks: Vec<Vec<Row>>) -> Vec<Row> {
    blocks.into_iter().next().unwrap_or_default()
}

fn first_line(block: Vec<Row>) -> Row {
    block.into_iter().next().unwrap_or_default()
}

/// Folded key of a `KEY: summary` label; `None` for anything else.
pub fn key_from_label(cell: &str) -> Option<String> {
    let (key, rest) = cell.split_once(": ")?;
    let key = key.trim();
    if key.is_empty() || rest.trim().is_empty() {
        return None;
    }
    Some(key.to_uppercase())
}
