//! Task records: the normalized form of one inbound task-change event.
//!
//! A raw webhook payload is first decoded into [`TaskPayload`], an explicit
//! schema of optional fields. [`TaskRecordFactory`] then validates it and
//! computes every derived field once (hyperlink formula, coerced booleans,
//! alias-resolved people, sprint membership), producing an immutable
//! [`TaskRecord`].

use std::sync::OnceLock;

use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::aliases::AliasTable;
use crate::error::CoreError;
use crate::types::TaskKey;

/// Default base URL for task hyperlinks.
pub const DEFAULT_TRACKER_BASE_URL: &str = "https://tracker.example";

/// Label used when a payload carries no summary text.
const NO_SUMMARY: &str = "(no summary)";

// ---------------------------------------------------------------------------
// Payload schema
// ---------------------------------------------------------------------------

/// Wire schema of a queued task-change payload.
///
/// Every field is optional at this level; unknown fields are ignored because
/// the tracker adds new ones freely. Scalar fields accept strings, numbers or
/// booleans and are stringified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub key: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub assignee: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub dev: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub qa_engineer: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub analyst: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub task_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub project: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub stage_deadline: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub deadline_fact: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sprint: Option<String>,
    #[serde(default, deserialize_with = "truthy")]
    pub off_the_plan: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub outside_of_the_sprint_plan: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub moving_on_to_the_next_sprint: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sp_development: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sp_testing: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub updated_by: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub updated_at: Option<String>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    })
}

fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_bool(&value))
}

/// Two-valued coercion shared by every boolean payload field.
///
/// `null`, `""`, numeric zero, empty collections and the tokens `false` / `0`
/// are false; every other value is true.
pub fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => {
            let token = s.trim();
            !(token.is_empty() || token.eq_ignore_ascii_case("false") || token == "0")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Sprint ranges
// ---------------------------------------------------------------------------

fn sprint_range_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\d{1,2}\.\d{1,2})\s*–\s*(\d{1,2}\.\d{1,2})\)").ok())
        .as_ref()
}

/// Parse the `(dd.mm – dd.mm)` range embedded in a sprint label, in `year`.
pub fn parse_sprint_range(sprint: &str, year: i32) -> Option<(NaiveDate, NaiveDate)> {
    let captures = sprint_range_regex()?.captures(sprint)?;
    let parse = |day_month: &str| {
        NaiveDate::parse_from_str(&format!("{day_month}.{year}"), "%d.%m.%Y").ok()
    };
    let start = parse(captures.get(1)?.as_str())?;
    let end = parse(captures.get(2)?.as_str())?;
    Some((start, end))
}

/// Whether `today` falls inside the sprint's range (inclusive), assuming the
/// range lies in `today`'s calendar year.
pub fn sprint_is_current_on(sprint: &str, today: NaiveDate) -> bool {
    match parse_sprint_range(sprint, today.year()) {
        Some((start, end)) => start <= today && today <= end,
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Task record
// ---------------------------------------------------------------------------

/// Normalized task change destined for one spreadsheet row.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub key: TaskKey,
    pub id: Option<String>,
    pub summary: String,
    /// `=HYPERLINK(url; "KEY: summary")` formula for the name column.
    pub hyperlink: String,
    pub assignee: Option<String>,
    pub dev: Option<String>,
    pub qa_engineer: Option<String>,
    pub analyst: Option<String>,
    pub status: Option<String>,
    pub task_type: Option<String>,
    pub priority: Option<String>,
    pub project: Option<String>,
    pub due_date: Option<String>,
    pub stage_deadline: Option<String>,
    pub deadline_fact: Option<String>,
    pub sprint: Option<String>,
    pub sprint_is_current: bool,
    pub off_the_plan: bool,
    pub outside_of_the_sprint_plan: bool,
    pub moving_on_to_the_next_sprint: bool,
    pub sp_development: Option<String>,
    pub sp_testing: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: Option<String>,
}

impl TaskRecord {
    /// Sum of the development and testing estimates that parse as numbers.
    pub fn story_points_total(&self) -> Option<f64> {
        let parsed: Vec<f64> = [&self.sp_development, &self.sp_testing]
            .into_iter()
            .filter_map(|sp| sp.as_deref().and_then(parse_estimate))
            .collect();
        if parsed.is_empty() {
            None
        } else {
            Some(parsed.iter().sum())
        }
    }
}

/// Parse a numeric-as-string estimate; accepts `,` as decimal separator.
pub fn parse_estimate(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Builds [`TaskRecord`]s with a shared alias table and tracker base URL.
#[derive(Debug, Clone)]
pub struct TaskRecordFactory {
    aliases: AliasTable,
    tracker_base_url: String,
}

impl TaskRecordFactory {
    pub fn new(aliases: AliasTable, tracker_base_url: impl Into<String>) -> Self {
        Self {
            aliases,
            tracker_base_url: tracker_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Decode and normalize a raw queued payload, evaluating sprint
    /// membership against the local calendar date.
    pub fn from_json(&self, raw: &Value) -> Result<TaskRecord, CoreError> {
        self.from_json_on(raw, Local::now().date_naive())
    }

    pub fn from_json_on(&self, raw: &Value, today: NaiveDate) -> Result<TaskRecord, CoreError> {
        if !raw.is_object() {
            return Err(CoreError::InvalidPayload(format!(
                "expected a JSON object, got {raw}"
            )));
        }
        let payload: TaskPayload = serde_json::from_value(raw.clone())
            .map_err(|e| CoreError::InvalidPayload(e.to_string()))?;
        self.build(payload, today)
    }

    pub fn build(&self, payload: TaskPayload, today: NaiveDate) -> Result<TaskRecord, CoreError> {
        let key = payload
            .key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(TaskKey::from)
            .ok_or_else(|| CoreError::InvalidPayload("missing task key".to_string()))?;

        let summary = payload.summary.unwrap_or_default().replace('"', "");
        let label = if summary.trim().is_empty() {
            format!("{key}: {NO_SUMMARY}")
        } else {
            format!("{key}: {summary}")
        };
        let hyperlink = format!(
            "=HYPERLINK(\"{}/{}\"; \"{}\")",
            self.tracker_base_url, key, label
        );

        let person = |raw: Option<String>| raw.map(|name| self.aliases.resolve(&name));
        let sprint_is_current = payload
            .sprint
            .as_deref()
            .map(|s| sprint_is_current_on(s, today))
            .unwrap_or(false);

        Ok(TaskRecord {
            key,
            id: payload.id,
            summary,
            hyperlink,
            assignee: person(payload.assignee),
            dev: person(payload.dev),
            qa_engineer: person(payload.qa_engineer),
            analyst: person(payload.analyst),
            status: payload.status,
            task_type: payload.task_type,
            priority: payload.priority,
            project: payload.project,
            due_date: payload.due_date,
            stage_deadline: payload.stage_deadline,
            deadline_fact: payload.deadline_fact,
            sprint: payload.sprint,
            sprint_is_current,
            off_the_plan: payload.off_the_plan,
            outside_of_the_sprint_plan: payload.outside_of_the_sprint_plan,
            moving_on_to_the_next_sprint: payload.moving_on_to_the_next_sprint,
            sp_development: payload.sp_development,
            sp_testing: payload.sp_testing,
            updated_by: payload.updated_by,
            updated_at: payload.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn factory() -> TaskRecordFactory {
        let aliases = AliasTable::new(HashMap::from([
            ("ivanov.i".to_string(), "Иванов".to_string()),
            ("petrova.a".to_string(), "Петрова".to_string()),
        ]));
        TaskRecordFactory::new(aliases, DEFAULT_TRACKER_BASE_URL)
    }

    fn day(d: u32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(Local::now().year(), m, d).unwrap()
    }

    #[rstest]
    #[case(json!(null), false)]
    #[case(json!(""), false)]
    #[case(json!(0), false)]
    #[case(json!(0.0), false)]
    #[case(json!("false"), false)]
    #[case(json!("FALSE"), false)]
    #[case(json!("0"), false)]
    #[case(json!(false), false)]
    #[case(json!("yes"), true)]
    #[case(json!(1), true)]
    #[case(json!(true), true)]
    #[case(json!("true"), true)]
    #[case(json!("Да"), true)]
    fn boolean_coercion(#[case] input: Value, #[case] expected: bool) {
        assert_eq!(coerce_bool(&input), expected);
    }

    #[test]
    fn absent_boolean_fields_are_false() {
        let record = factory().from_json_on(&json!({"key": "P-1"}), day(1, 1)).unwrap();
        assert!(!record.off_the_plan);
        assert!(!record.outside_of_the_sprint_plan);
        assert!(!record.moving_on_to_the_next_sprint);
    }

    #[test]
    fn hyperlink_strips_quotes_from_summary() {
        let record = factory()
            .from_json_on(
                &json!({"key": "PROJ-123", "summary": "Fix \"login\" page"}),
                day(1, 1),
            )
            .unwrap();
        assert_eq!(record.summary, "Fix login page");
        assert_eq!(
            record.hyperlink,
            "=HYPERLINK(\"https://tracker.example/PROJ-123\"; \"PROJ-123: Fix login page\")"
        );
    }

    #[test]
    fn people_pass_through_alias_table() {
        let record = factory()
            .from_json_on(
                &json!({
                    "key": "P-2",
                    "assignee": "ivanov.i",
                    "dev": "ivanov.i",
                    "qaEngineer": "petrova.a",
                    "analyst": "sidorov.s",
                }),
                day(1, 1),
            )
            .unwrap();
        assert_eq!(record.assignee.as_deref(), Some("Иванов"));
        assert_eq!(record.dev.as_deref(), Some("Иванов"));
        assert_eq!(record.qa_engineer.as_deref(), Some("Петрова"));
        assert_eq!(record.analyst.as_deref(), Some("sidorov.s"));
    }

    #[test]
    fn numeric_estimates_are_stringified() {
        let record = factory()
            .from_json_on(
                &json!({"key": "P-3", "spDevelopment": 5, "spTesting": "2,5"}),
                day(1, 1),
            )
            .unwrap();
        assert_eq!(record.sp_development.as_deref(), Some("5"));
        assert_eq!(record.story_points_total(), Some(7.5));
    }

    #[test]
    fn missing_key_is_rejected() {
        let err = factory()
            .from_json_on(&json!({"summary": "orphan"}), day(1, 1))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayload(_)));
        assert!(factory().from_json_on(&json!({"key": "  "}), day(1, 1)).is_err());
        assert!(factory().from_json_on(&json!("P-1"), day(1, 1)).is_err());
    }

    #[test]
    fn sprint_membership_follows_inclusive_range() {
        let label = "Sprint X (01.03 – 31.03)";
        assert!(sprint_is_current_on(label, day(15, 3)));
        assert!(sprint_is_current_on(label, day(1, 3)));
        assert!(sprint_is_current_on(label, day(31, 3)));
        assert!(!sprint_is_current_on(label, day(1, 4)));
    }

    #[test]
    fn sprint_without_range_is_not_current() {
        assert!(!sprint_is_current_on("Sprint X", day(15, 3)));
        assert!(!sprint_is_current_on("Sprint X (01.03 - 31.03)", day(15, 3)));
        assert!(!sprint_is_current_on("Sprint X (31.02 – 31.03)", day(15, 3)));
    }

    #[test]
    fn record_carries_sprint_flag() {
        let record = factory()
            .from_json_on(
                &json!({"key": "P-4", "sprint": "Sprint 12 (01.03 – 14.03)"}),
                day(10, 3),
            )
            .unwrap();
        assert!(record.sprint_is_current);
    }
}
