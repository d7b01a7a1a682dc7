//! Header row → column index mapping.
//!
//! The destination sheet is addressed by header text, never by fixed column
//! positions. [`ColumnMapping::from_header`] scans the header row once per
//! connection and binds every known [`Column`] to its index. The "current
//! sprint" header carries a maintainer-edited suffix (e.g. a
//! `(461/1804)` counter) and is therefore matched by [`SPRINT_HEADER_PREFIX`].

use std::collections::HashMap;

use crate::error::CoreError;

/// Literal prefix of the dynamically-labelled "current sprint" header.
pub const SPRINT_HEADER_PREFIX: &str = "Текущий спринт";

/// Logical columns the engine knows how to fill or preserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Name,
    Assignee,
    Type,
    Sprint,
    Status,
    StageDeadline,
    DueDate,
    DeadlineFact,
    Project,
    Priority,
    OffThePlan,
    OutsideOfTheSprintPlan,
    MovingOnToTheNextSprint,
    Comment,
    StoryPoints,
    IgrDone,
    Dev,
    QaEngineer,
    Analyst,
}

impl Column {
    pub fn all() -> &'static [Column] {
        &[
            Column::Name,
            Column::Assignee,
            Column::Type,
            Column::Sprint,
            Column::Status,
            Column::StageDeadline,
            Column::DueDate,
            Column::DeadlineFact,
            Column::Project,
            Column::Priority,
            Column::OffThePlan,
            Column::OutsideOfTheSprintPlan,
            Column::MovingOnToTheNextSprint,
            Column::Comment,
            Column::StoryPoints,
            Column::IgrDone,
            Column::Dev,
            Column::QaEngineer,
            Column::Analyst,
        ]
    }

    /// Header text as maintained in the sheet.
    pub fn label(self) -> &'static str {
        match self {
            Column::Name => "Наименование",
            Column::Assignee => "Исполнитель",
            Column::Type => "Type",
            Column::Sprint => SPRINT_HEADER_PREFIX,
            Column::Status => "Статус",
            Column::StageDeadline => "Дедлайн этапа",
            Column::DueDate => "Дедлайн",
            Column::DeadlineFact => "Дедлайн факт",
            Column::Project => "Проект",
            Column::Priority => "Приоритет",
            Column::OffThePlan => "Вне плана? (бизнес)",
            Column::OutsideOfTheSprintPlan => "Вне плана Спринта?",
            Column::MovingOnToTheNextSprint => "Переход на след. спринт?",
            Column::Comment => "Комментарии",
            Column::StoryPoints => "Общая оценка SP",
            Column::IgrDone => "IGR & Done\nобщий",
            Column::Dev => "Разработчик",
            Column::QaEngineer => "Тестировщик",
            Column::Analyst => "Аналитик",
        }
    }

    fn matches(self, header: &str) -> bool {
        match self {
            Column::Sprint => header.starts_with(SPRINT_HEADER_PREFIX),
            other => header == other.label(),
        }
    }
}

/// Immutable logical-column → index mapping for one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    columns: HashMap<Column, usize>,
    headers: HashMap<String, usize>,
    width: usize,
}

impl ColumnMapping {
    /// Build the mapping from a raw header row.
    ///
    /// Returns [`CoreError::EmptyHeader`] when every header cell is blank.
    pub fn from_header<S: AsRef<str>>(header: &[S]) -> Result<Self, CoreError> {
        if header.iter().all(|h| h.as_ref().trim().is_empty()) {
            return Err(CoreError::EmptyHeader);
        }

        let mut columns = HashMap::new();
        let mut headers = HashMap::new();
        for (index, raw) in header.iter().enumerate() {
            let text = raw.as_ref().trim();
            if text.is_empty() {
                continue;
            }
            headers.entry(text.to_string()).or_insert(index);
            for column in Column::all() {
                if !columns.contains_key(column) && column.matches(text) {
                    columns.insert(*column, index);
                }
            }
        }

        if !columns.contains_key(&Column::Sprint) {
            tracing::warn!("no current-sprint header found; sprint flag will not be written");
        }

        Ok(Self {
            columns,
            headers,
            width: header.len(),
        })
    }

    /// Index of a logical column, if the sheet has it.
    pub fn index_of(&self, column: Column) -> Option<usize> {
        self.columns.get(&column).copied()
    }

    /// Index of a column by its exact (trimmed) header text.
    pub fn index_of_header(&self, header: &str) -> Option<usize> {
        self.headers.get(header.trim()).copied()
    }

    /// Number of header cells the sheet reported.
    pub fn header_width(&self) -> usize {
        self.width
    }
}

/// A1-notation letters for a zero-based column index (`0` → `A`, `26` → `AA`).
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Inverse of [`column_letter`]; `None` for anything but ASCII letters.
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut n = 0usize;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        n = n.checked_mul(26)?.checked_add(digit)?;
    }
    Some(n - 1)
}
