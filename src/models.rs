use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Penalty units added by a single "add penalty" action.
pub const PENALTY_UNIT: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub uid: String,
    pub display_name: String,
    pub email: String,
}

/// A scheduled unit of work stored in its owner's private collection.
///
/// `start_time` is kept as the raw RFC 3339 string found in the document so a
/// malformed value can be detected and skipped at derivation time instead of
/// failing the whole snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub start_time: String,
    #[serde(default)]
    pub day: String,
    pub estimated_hours: f64,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub elapsed_seconds: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub alerted: bool,
}

impl Task {
    pub fn scheduled_start(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.start_time)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Validated input for a new task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    pub title: String,
    pub start: DateTime<Utc>,
    pub day: String,
    pub estimated_hours: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsEntryKind {
    Completion,
    Penalty,
}

/// One timestamped contribution to a StatsRecord, used for period filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsEntry {
    pub at: DateTime<Utc>,
    pub kind: StatsEntryKind,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    #[serde(default)]
    pub uid: String,
    pub display_name: String,
    #[serde(default)]
    pub tasks_completed: u64,
    #[serde(default)]
    pub total_hours: f64,
    #[serde(default)]
    pub penalty: u64,
    #[serde(default)]
    pub last_reset_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<StatsEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Today,
    Week,
    Month,
    #[default]
    #[serde(alias = "all-time")]
    All,
}

impl FromStr for Period {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(Period::Today),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "all" | "all-time" => Ok(Period::All),
            other => Err(format!("unknown period '{other}'")),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Period::Today => "today",
            Period::Week => "week",
            Period::Month => "month",
            Period::All => "all",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub name: &'static str,
    pub points: Vec<ChartPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSet {
    pub period: Period,
    pub tasks: ChartSeries,
    pub hours: ChartSeries,
    pub penalties: ChartSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerView {
    pub task_id: String,
    pub elapsed_seconds: i64,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub task_id: String,
    pub title: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub now: DateTime<Utc>,
    pub active: Vec<Task>,
    pub upcoming: Vec<Task>,
    pub completed: Vec<Task>,
    pub timers: Vec<TimerView>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub ready: bool,
    pub principal: Option<Principal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetTicket {
    pub token: String,
    pub task_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct AddTaskRequest {
    pub title: String,
    pub start: String,
    pub hours: f64,
}

#[derive(Debug, Deserialize)]
pub struct DayFilterRequest {
    pub day: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    pub period: Option<Period>,
}

#[derive(Debug, Deserialize)]
pub struct ResetConfirmRequest {
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_parses_aliases() {
        assert_eq!("today".parse::<Period>(), Ok(Period::Today));
        assert_eq!(" Week ".parse::<Period>(), Ok(Period::Week));
        assert_eq!("all-time".parse::<Period>(), Ok(Period::All));
        assert!("year".parse::<Period>().is_err());
    }

    #[test]
    fn task_with_bad_start_has_no_schedule() {
        let task = Task {
            id: "t1".into(),
            title: "Read".into(),
            start_time: "not a time".into(),
            day: String::new(),
            estimated_hours: 1.0,
            completed: false,
            elapsed_seconds: None,
            completed_at: None,
            alerted: false,
        };
        assert!(task.scheduled_start().is_none());
    }

    #[test]
    fn stats_record_tolerates_missing_optional_fields() {
        let record: StatsRecord =
            serde_json::from_value(serde_json::json!({ "display_name": "Ann" })).unwrap();
        assert_eq!(record.tasks_completed, 0);
        assert!(record.history.is_empty());
        assert!(record.last_reset_at.is_none());
    }
}
