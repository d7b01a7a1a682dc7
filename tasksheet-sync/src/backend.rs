//! Transport seam between [`crate::client::SheetClient`] and a spreadsheet
//! service.
//!
//! The client only ever needs three calls: list worksheet titles, read a set
//! of A1 ranges, and write a set of A1 ranges with formula evaluation. The
//! HTTP implementation lives in [`crate::http`]; [`crate::memory`] provides an
//! in-process sheet for tests and dry runs.

use serde::{Deserialize, Serialize};

use tasksheet_core::types::Row;

use crate::error::SheetError;

/// Orientation of returned values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Dimension {
    Rows,
    Columns,
}

impl Dimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Rows => "ROWS",
            Dimension::Columns => "COLUMNS",
        }
    }
}

/// How cell contents are rendered on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueRender {
    /// Display text, e.g. the label of a `=HYPERLINK(..)` cell.
    FormattedValue,
    /// Raw formulas, so carried-over cells round-trip unchanged.
    Formula,
}

impl ValueRender {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueRender::FormattedValue => "FORMATTED_VALUE",
            ValueRender::Formula => "FORMULA",
        }
    }
}

/// One A1 range and the rows to place there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeWrite {
    pub range: String,
    pub values: Vec<Row>,
}

/// Minimal spreadsheet surface used by the client.
///
/// Writes always use user-entered semantics: strings starting with `=` are
/// evaluated as formulas.
pub trait SheetBackend: Send {
    /// Titles of every worksheet in the spreadsheet.
    fn worksheet_titles(&self) -> Result<Vec<String>, SheetError>;

    /// Read each range; the outer vector matches `ranges` one-to-one.
    ///
    /// Trailing empty cells and rows may be omitted by the backend.
    fn batch_get(
        &self,
        ranges: &[String],
        dimension: Dimension,
        render: ValueRender,
    ) -> Result<Vec<Vec<Row>>, SheetError>;

    /// Apply every write in one request.
    fn batch_update(&self, writes: &[RangeWrite]) -> Result<(), SheetError>;
}

/// `'Title'!` prefix with embedded quotes doubled.
pub fn sheet_prefix(worksheet: &str) -> String {
    format!("'{}'!", worksheet.replace('\'', "''"))
}

/// `'Title'!A{first}:{last_col}{last}` for a block of whole rows.
pub fn rows_range(worksheet: &str, first: usize, last: usize, width: usize) -> String {
    format!(
        "{}A{}:{}{}",
        sheet_prefix(worksheet),
        first,
        tasksheet_core::column_letter(width.saturating_sub(1)),
        last
    )
}

/// `'Title'!A:A`
pub fn first_column_range(worksheet: &str) -> String {
    format!("{}A:A", sheet_prefix(worksheet))
}
