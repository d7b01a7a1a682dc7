//! In-process spreadsheet backend.
//!
//! Behaves like the hosted API for the calls the client makes: trailing
//! empty cells and rows are omitted on read, `=HYPERLINK(url; "label")`
//! cells render as their label in formatted mode, and queued faults are
//! returned before touching the data. Clones share state, so a test can keep
//! a handle while the client owns another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde_json::Value;

use tasksheet_core::column_index;
use tasksheet_core::types::{cell_text, Row};

use crate::backend::{sheet_prefix, Dimension, RangeWrite, SheetBackend, ValueRender};
use crate::error::SheetError;

/// Which backend call was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Titles,
    Get,
    Update,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub kind: CallKind,
    pub at: Instant,
    pub ranges: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    title: String,
    cells: Vec<Row>,
    faults: VecDeque<SheetError>,
    calls: Vec<Call>,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySheet {
    state: Arc<Mutex<State>>,
}

impl MemorySheet {
    /// A worksheet titled `title` holding `rows` (row 1 first).
    pub fn new(title: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                title: title.into(),
                cells: rows,
                ..State::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next backend call fail with `err` (FIFO across calls).
    pub fn push_fault(&self, err: SheetError) {
        self.lock().faults.push_back(err);
    }

    /// Every call made so far, including failed ones.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, kind: CallKind) -> usize {
        self.lock().calls.iter().filter(|c| c.kind == kind).count()
    }

    /// Raw stored row (1-based), padded to nothing; empty if absent.
    pub fn row(&self, row: usize) -> Row {
        self.lock()
            .cells
            .get(row.saturating_sub(1))
            .cloned()
            .unwrap_or_default()
    }

    /// Stored cell as display text.
    pub fn cell_text(&self, row: usize, col: usize) -> String {
        self.row(row).get(col).map(cell_text).unwrap_or_default()
    }

    /// Number of stored rows, including trailing empty ones.
    pub fn row_count(&self) -> usize {
        self.lock().cells.len()
    }

    /// Overwrite a single cell directly, bypassing call accounting.
    pub fn set_cell(&self, row: usize, col: usize, value: Value) {
        let mut state = self.lock();
        write_cell(&mut state.cells, row - 1, col, value);
    }

    fn record(&self, kind: CallKind, ranges: Vec<String>) -> Result<MutexGuard<'_, State>, SheetError> {
        let mut state = self.lock();
        state.calls.push(Call {
            kind,
            at: Instant::now(),
            ranges,
        });
        match state.faults.pop_front() {
            Some(fault) => Err(fault),
            None => Ok(state),
        }
    }
}

impl SheetBackend for MemorySheet {
    fn worksheet_titles(&self) -> Result<Vec<String>, SheetError> {
        let state = self.record(CallKind::Titles, Vec::new())?;
        Ok(vec![state.title.clone()])
    }

    fn batch_get(
        &self,
        ranges: &[String],
        dimension: Dimension,
        render: ValueRender,
    ) -> Result<Vec<Vec<Row>>, SheetError> {
        let state = self.record(CallKind::Get, ranges.to_vec())?;
        ranges
            .iter()
            .map(|range| {
                let bounds = parse_range(&state.title, range)?;
                Ok(read_block(&state.cells, &bounds, dimension, render))
            })
            .collect()
    }

    fn batch_update(&self, writes: &[RangeWrite]) -> Result<(), SheetError> {
        let ranges = writes.iter().map(|w| w.range.clone()).collect();
        let mut state = self.record(CallKind::Update, ranges)?;
        // Validate everything before mutating so a bad range leaves no partial write.
        let mut parsed = Vec::with_capacity(writes.len());
        for write in writes {
            parsed.push(parse_range(&state.title, &write.range)?);
        }
        for (write, bounds) in writes.iter().zip(parsed) {
            for (dr, values) in write.values.iter().enumerate() {
                let row = bounds.first_row.unwrap_or(1) - 1 + dr;
                for (dc, value) in values.iter().enumerate() {
                    write_cell(&mut state.cells, row, bounds.first_col + dc, value.clone());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    first_col: usize,
    last_col: usize,
    first_row: Option<usize>,
    last_row: Option<usize>,
}

fn parse_range(title: &str, range: &str) -> Result<Bounds, SheetError> {
    let bad = || SheetError::Api {
        status: 400,
        message: format!("Unable to parse range: {range}"),
    };
    let body = range.strip_prefix(&sheet_prefix(title)).ok_or_else(bad)?;
    let (start, end) = body.split_once(':').ok_or_else(bad)?;
    let split = |cell: &str| {
        let digits_at = cell.find(|c: char| c.is_ascii_digit()).unwrap_or(cell.len());
        let (letters, digits) = cell.split_at(digits_at);
        let col = column_index(letters)?;
        let row = if digits.is_empty() {
            None
        } else {
            Some(digits.parse::<usize>().ok().filter(|r| *r > 0)?)
        };
        Some((col, row))
    };
    let (first_col, first_row) = split(start).ok_or_else(bad)?;
    let (last_col, last_row) = split(end).ok_or_else(bad)?;
    Ok(Bounds {
        first_col,
        last_col,
        first_row,
        last_row,
    })
}

fn write_cell(cells: &mut Vec<Row>, row: usize, col: usize, value: Value) {
    while cells.len() <= row {
        cells.push(Vec::new());
    }
    let target = &mut cells[row];
    while target.len() <= col {
        target.push(Value::String(String::new()));
    }
    target[col] = value;
}

fn is_blank(value: &Value) -> bool {
    cell_text(value).is_empty()
}

fn render(value: &Value, mode: ValueRender) -> Value {
    match (mode, value) {
        (ValueRender::FormattedValue, Value::String(s)) if s.starts_with("=HYPERLINK(") => {
            Value::String(hyperlink_label(s).unwrap_or_default())
        }
        _ => value.clone(),
    }
}

/// Last double-quoted argument of a `=HYPERLINK(..)` formula.
fn hyperlink_label(formula: &str) -> Option<String> {
    let end = formula.rfind('"')?;
    let start = formula[..end].rfind('"')?;
    Some(formula[start + 1..end].to_string())
}

fn trim_trailing<T>(items: &mut Vec<T>, blank: impl Fn(&T) -> bool) {
    while items.last().map(&blank).unwrap_or(false) {
        items.pop();
    }
}

fn read_block(cells: &[Row], b: &Bounds, dimension: Dimension, mode: ValueRender) -> Vec<Row> {
    let first_row = b.first_row.unwrap_or(1) - 1;
    let last_row = b
        .last_row
        .map(|r| r - 1)
        .unwrap_or_else(|| cells.len().saturating_sub(1));
    let cell = |r: usize, c: usize| {
        cells
            .get(r)
            .and_then(|row| row.get(c))
            .map(|v| render(v, mode))
            .unwrap_or_else(|| Value::String(String::new()))
    };

    let mut out: Vec<Row> = match dimension {
        Dimension::Rows => (first_row..=last_row)
            .map(|r| {
                let mut row: Row = (b.first_col..=b.last_col).map(|c| cell(r, c)).collect();
                trim_trailing(&mut row, is_blank);
                row
            })
            .collect(),
        Dimension::Columns => (b.first_col..=b.last_col)
            .map(|c| {
                let mut col: Row = (first_row..=last_row).map(|r| cell(r, c)).collect();
                trim_trailing(&mut col, is_blank);
                col
            })
            .collect(),
    };
    trim_trailing(&mut out, |row| row.is_empty());
    out
}
