//! Batch reconciliation of task records into worksheet rows.
//!
//! One pass per batch:
//!
//! 1. read the key listing once, index it by folded task key and note where
//!    new rows start;
//! 2. split the batch into updates (key present) and creates;
//! 3. snapshot every update row in a single read and rebuild each row on top
//!    of its snapshot, so columns the engine does not own survive;
//! 4. place creates in a contiguous block after the last used key row, as
//!    seen by that same listing;
//! 5. send all updates as one write and all creates as another.
//!
//! The comment column is never written; it always carries over.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tasksheet_core::types::{blank_row, normalize_row, Row, ROW_WIDTH};
use tasksheet_core::{Column, ColumnMapping, TaskRecord};

use crate::client::SheetClient;
use crate::error::SheetError;

/// What one reconciliation pass wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// `(key, row)` of every rewritten existing row.
    pub updated: Vec<(String, usize)>,
    /// `(key, row)` of every newly placed row, in row order.
    pub created: Vec<(String, usize)>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.created.is_empty()
    }

    pub fn total(&self) -> usize {
        self.updated.len() + self.created.len()
    }
}

/// Reconcile `batch` into the worksheet.
///
/// Later records for a key replace earlier ones in the same batch.
pub fn reconcile(
    client: &mut SheetClient,
    batch: Vec<TaskRecord>,
) -> Result<ReconcileReport, SheetError> {
    let batch = dedupe_last_wins(batch);
    if batch.is_empty() {
        return Ok(ReconcileReport::default());
    }

    let mapping = client.mapping()?.clone();
    let layout = client.key_layout()?;

    let (updates, creates): (Vec<_>, Vec<_>) = batch
        .into_iter()
        .map(|record| {
            let row = layout.index.get(&record.key.folded()).copied();
            (record, row)
        })
        .partition(|(_, row)| row.is_some());

    let mut report = ReconcileReport::default();

    if !updates.is_empty() {
        let rows: Vec<usize> = updates.iter().filter_map(|(_, row)| *row).collect();
        let snapshots = read_snapshots(client, &rows)?;
        let mut writes = Vec::with_capacity(updates.len());
        for ((record, _), (row, snapshot)) in updates.iter().zip(rows.iter().zip(snapshots)) {
            writes.push((*row, build_row(&mapping, record, snapshot)));
            report.updated.push((record.key.to_string(), *row));
        }
        client.batch_write(&writes)?;
        tracing::info!(rows = writes.len(), "updated existing rows");
    }

    if !creates.is_empty() {
        let start = layout.append_row;
        let mut block = Vec::with_capacity(creates.len());
        for (offset, (record, _)) in creates.iter().enumerate() {
            block.push(build_row(&mapping, record, blank_row(ROW_WIDTH)));
            report.created.push((record.key.to_string(), start + offset));
        }
        client.write_block(start, &block)?;
        tracing::info!(rows = block.len(), start, "appended new rows");
    }

    client.invalidate_cache();
    Ok(report)
}

/// Write a single record: rewrite its row if the key is listed, otherwise
/// fill the first empty row.
pub fn store_task(client: &mut SheetClient, record: &TaskRecord) -> Result<usize, SheetError> {
    let mapping = client.mapping()?.clone();
    let (row, base) = match client.find_row_by_key_prefix(&record.key)? {
        Some(row) => (row, read_snapshots(client, &[row])?.pop().unwrap_or_default()),
        None => (client.find_first_empty_row()?, blank_row(ROW_WIDTH)),
    };
    client.write_row(row, build_row(&mapping, record, base))?;
    tracing::info!(key = %record.key, row, "stored task");
    Ok(row)
}

/// Snapshots for `rows`; a permanent read failure degrades to empty rows.
///
/// Retryable failures that survived the retry policy still propagate so the
/// caller can requeue the batch.
fn read_snapshots(client: &mut SheetClient, rows: &[usize]) -> Result<Vec<Row>, SheetError> {
    match client.read_rows(rows) {
        Ok(snapshots) => Ok(snapshots),
        Err(err) if !err.is_retryable() => {
            tracing::warn!(
                code = err.code(),
                error = %err,
                rows = rows.len(),
                "snapshot read failed; treating rows as empty"
            );
            Ok(rows.iter().map(|_| blank_row(ROW_WIDTH)).collect())
        }
        Err(err) => Err(err),
    }
}

fn dedupe_last_wins(batch: Vec<TaskRecord>) -> Vec<TaskRecord> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<TaskRecord> = Vec::with_capacity(batch.len());
    for record in batch {
        match position.get(&record.key.folded()) {
            Some(&at) => out[at] = record,
            None => {
                position.insert(record.key.folded(), out.len());
                out.push(record);
            }
        }
    }
    out
}

/// Lay `record` over `base`, touching only the columns the engine owns.
pub fn build_row(mapping: &ColumnMapping, record: &TaskRecord, base: Row) -> Row {
    let mut row = normalize_row(base, ROW_WIDTH);
    let mut put = |index: Option<usize>, value: Value| {
        if let Some(slot) = index.and_then(|i| row.get_mut(i)) {
            *slot = value;
        }
    };

    put(mapping.index_of(Column::Name), Value::String(record.hyperlink.clone()));

    let optional = [
        (Column::Assignee, &record.assignee),
        (Column::Dev, &record.dev),
        (Column::QaEngineer, &record.qa_engineer),
        (Column::Analyst, &record.analyst),
        (Column::Type, &record.task_type),
        (Column::Status, &record.status),
        (Column::Priority, &record.priority),
        (Column::Project, &record.project),
        (Column::DueDate, &record.due_date),
        (Column::StageDeadline, &record.stage_deadline),
        (Column::DeadlineFact, &record.deadline_fact),
    ];
    for (column, value) in optional {
        if let Some(text) = value {
            put(mapping.index_of(column), Value::String(text.clone()));
        }
    }

    put(mapping.index_of(Column::Sprint), Value::Bool(record.sprint_is_current));
    put(mapping.index_of(Column::OffThePlan), Value::Bool(record.off_the_plan));
    put(
        mapping.index_of(Column::OutsideOfTheSprintPlan),
        Value::Bool(record.outside_of_the_sprint_plan),
    );
    put(
        mapping.index_of(Column::MovingOnToTheNextSprint),
        Value::Bool(record.moving_on_to_the_next_sprint),
    );

    if let Some(total) = record.story_points_total() {
        put(mapping.index_of(Column::StoryPoints), json!(total));
    }

    // Per-person estimate columns are headed by the person's canonical name.
    for (person, estimate) in [
        (&record.dev, &record.sp_development),
        (&record.qa_engineer, &record.sp_testing),
    ] {
        let (Some(person), Some(estimate)) = (person, estimate) else {
            continue;
        };
        if person.trim().is_empty() || estimate.trim().is_empty() {
            continue;
        }
        put(mapping.index_of_header(person), Value::String(estimate.clone()));
    }

    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tasksheet_core::{AliasTable, TaskRecordFactory};
    use tasksheet_core::types::cell_text;

    fn mapping() -> ColumnMapping {
        ColumnMapping::from_header(&[
            "Наименование",
            "Исполнитель",
            "Статус",
            "Текущий спринт (461/1804)",
            "Комментарии",
            "Общая оценка SP",
            "Разработчик",
            "Иванов",
            "Петрова",
        ])
        .unwrap()
    }

    fn record(raw: Value) -> TaskRecord {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        TaskRecordFactory::new(AliasTable::default(), "https://t")
            .from_json_on(&raw, today)
            .unwrap()
    }

    #[test]
    fn row_is_fixed_width_and_carries_unowned_columns() {
        let mut base = vec![json!("old"), json!("x"), json!("Open"), json!(""), json!("keep me")];
        base.resize(60, json!("extra"));
        let row = build_row(&mapping(), &record(json!({"key": "P-1", "status": "Done"})), base);
        assert_eq!(row.len(), ROW_WIDTH);
        assert!(cell_text(&row[0]).starts_with("=HYPERLINK("));
        assert_eq!(row[1], json!("x"));
        assert_eq!(row[2], json!("Done"));
        assert_eq!(row[4], json!("keep me"));
        assert_eq!(row[20], json!("extra"));
    }

    #[test]
    fn sprint_column_receives_membership_flag() {
        let row = build_row(
            &mapping(),
            &record(json!({"key": "P-1", "sprint": "S (01.03 – 14.03)"})),
            blank_row(ROW_WIDTH),
        );
        assert_eq!(row[3], json!(true));
    }

    #[test]
    fn estimates_go_to_person_columns() {
        let row = build_row(
            &mapping(),
            &record(json!({
                "key": "P-1",
                "dev": "Иванов",
                "spDevelopment": "3",
                "qaEngineer": "Петрова",
                "spTesting": "",
            })),
            blank_row(ROW_WIDTH),
        );
        assert_eq!(row[6], json!("Иванов"));
        assert_eq!(row[7], json!("3"));
        assert_eq!(row[8], json!(""));
        assert_eq!(row[5], json!(3.0));
    }

    #[test]
    fn unknown_person_column_is_skipped() {
        let row = build_row(
            &mapping(),
            &record(json!({"key": "P-1", "dev": "Сидоров", "spDevelopment": "5"})),
            blank_row(ROW_WIDTH),
        );
        assert_eq!(row[7], json!(""));
        assert_eq!(row[8], json!(""));
    }

    #[test]
    fn duplicate_keys_keep_last_record_in_first_position() {
        let batch = vec![
            record(json!({"key": "P-1", "status": "Open"})),
            record(json!({"key": "P-2"})),
            record(json!({"key": "p-1", "status": "Done"})),
        ];
        let out = dedupe_last_wins(batch);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].status.as_deref(), Some("Done"));
        assert_eq!(out[1].key.as_str(), "P-2");
    }
}
