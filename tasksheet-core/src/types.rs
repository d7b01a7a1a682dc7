//! Shared domain types.
//!
//! Rows are positional vectors of JSON cell values so that text, booleans and
//! numbers survive the round trip to the spreadsheet API untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable external identifier of a task, e.g. `PROJ-123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey(pub String);

impl TaskKey {
    /// Case-folded form used for lookups against the sheet's first column.
    pub fn folded(&self) -> String {
        self.0.to_uppercase()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TaskKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One spreadsheet row, column A first.
pub type Row = Vec<Value>;

/// Fixed width of every row the engine reads or writes (columns A..AX).
pub const ROW_WIDTH: usize = 50;

/// An all-empty row of `width` cells.
pub fn blank_row(width: usize) -> Row {
    vec![Value::String(String::new()); width]
}

/// Pad or truncate `row` to exactly `width` cells; missing cells become empty.
pub fn normalize_row(mut row: Row, width: usize) -> Row {
    row.truncate(width);
    while row.len() < width {
        row.push(Value::String(String::new()));
    }
    row
}

/// Render a cell as display text (`""` for null, `TRUE`/`FALSE` for booleans).
pub fn cell_text(cell: &Value) -> String {
    match cell {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn newtype_display() {
        assert_eq!(TaskKey::from("PROJ-1").to_string(), "PROJ-1");
    }

    #[test]
    fn folded_key_is_uppercase() {
        assert_eq!(TaskKey::from("proj-7").folded(), "PROJ-7");
    }

    #[test]
    fn normalize_pads_short_rows() {
        let row = normalize_row(vec![json!("a")], 3);
        assert_eq!(row, vec![json!("a"), json!(""), json!("")]);
    }

    #[test]
    fn normalize_truncates_long_rows() {
        let row = normalize_row(vec![json!(1), json!(2), json!(3)], 2);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn cell_text_renders_scalars() {
        assert_eq!(cell_text(&json!(null)), "");
        assert_eq!(cell_text(&json!(true)), "TRUE");
        assert_eq!(cell_text(&json!(3)), "3");
        assert_eq!(cell_text(&json!("x")), "x");
    }
}
