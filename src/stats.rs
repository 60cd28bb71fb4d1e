use crate::models::{ChartPoint, ChartSeries, ChartSet, Period, StatsEntryKind, StatsRecord, Task};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Tally {
    tasks: f64,
    hours: f64,
    penalty: f64,
}

/// Builds the three comparison series for `period`.
///
/// Records are filtered through their public history. A record that has
/// totals but no history predates history tracking: the signed-in
/// principal's own such record falls back to its completed tasks, anyone
/// else's contributes zero outside the all-time view.
pub fn build_charts_at<Tz: TimeZone>(
    now: DateTime<Tz>,
    records: &[StatsRecord],
    own_uid: Option<&str>,
    own_tasks: &[Task],
    period: Period,
) -> ChartSet {
    let since = period_start(&now, period);
    let now = now.with_timezone(&Utc);

    let mut rows: Vec<(&str, Tally)> = records
        .iter()
        .map(|record| {
            let own = own_uid == Some(record.uid.as_str());
            let tally = match since {
                None => totals(record),
                Some(since) => tally_since(record, own.then_some(own_tasks), since, now),
            };
            (record.display_name.as_str(), tally)
        })
        .collect();
    rows.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));

    let series = |name: &'static str, pick: fn(&Tally) -> f64| ChartSeries {
        name,
        points: rows
            .iter()
            .map(|(label, tally)| ChartPoint {
                label: label.to_string(),
                value: pick(tally),
            })
            .collect(),
    };

    ChartSet {
        period,
        tasks: series("Tasks completed", |t| t.tasks),
        hours: series("Hours", |t| t.hours),
        penalties: series("Penalty", |t| t.penalty),
    }
}

/// Start of the window for `period` in `now`'s time zone; None for all-time.
pub fn period_start<Tz: TimeZone>(now: &DateTime<Tz>, period: Period) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    let first_day = match period {
        Period::Today => today,
        Period::Week => week_start(today),
        Period::Month => today.with_day(1).unwrap_or(today),
        Period::All => return None,
    };
    Some(local_midnight(&now.timezone(), first_day))
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_sunday() as i64)
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

fn totals(record: &StatsRecord) -> Tally {
    Tally {
        tasks: record.tasks_completed as f64,
        hours: record.total_hours,
        penalty: record.penalty as f64,
    }
}

fn tally_since(
    record: &StatsRecord,
    own_tasks: Option<&[Task]>,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Tally {
    let since = match record.last_reset_at {
        Some(reset) if reset > since => reset,
        _ => since,
    };
    let in_window = |at: DateTime<Utc>| at >= since && at <= now;

    let legacy = record.history.is_empty() && totals(record) != Tally::default();
    if !legacy {
        return record
            .history
            .iter()
            .filter(|entry| in_window(entry.at))
            .fold(Tally::default(), |mut tally, entry| {
                match entry.kind {
                    StatsEntryKind::Completion => {
                        tally.tasks += 1.0;
                        tally.hours += entry.value;
                    }
                    StatsEntryKind::Penalty => tally.penalty += entry.value,
                }
                tally
            });
    }

    match own_tasks {
        Some(tasks) => tasks
            .iter()
            .filter(|task| task.completed)
            .filter(|task| task.completed_at.is_some_and(in_window))
            .fold(Tally::default(), |mut tally, task| {
                tally.tasks += 1.0;
                tally.hours += task.estimated_hours;
                tally
            }),
        None => Tally::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatsEntry;
    use chrono::FixedOffset;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap()
    }

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<FixedOffset> {
        tz().with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn completion(at: DateTime<FixedOffset>, hours: f64) -> StatsEntry {
        StatsEntry {
            at: at.with_timezone(&Utc),
            kind: StatsEntryKind::Completion,
            value: hours,
        }
    }

    fn record(uid: &str, name: &str, history: Vec<StatsEntry>) -> StatsRecord {
        let tasks = history
            .iter()
            .filter(|e| e.kind == StatsEntryKind::Completion)
            .count() as u64;
        let hours: f64 = history
            .iter()
            .filter(|e| e.kind == StatsEntryKind::Completion)
            .map(|e| e.value)
            .sum();
        let penalty: u64 = history
            .iter()
            .filter(|e| e.kind == StatsEntryKind::Penalty)
            .map(|e| e.value as u64)
            .sum();
        StatsRecord {
            uid: uid.into(),
            display_name: name.into(),
            tasks_completed: tasks,
            total_hours: hours,
            penalty,
            last_reset_at: None,
            history,
        }
    }

    #[test]
    fn today_excludes_yesterday_but_all_time_keeps_it() {
        // Thursday 2026-01-15, 00:30 local.
        let now = local(2026, 1, 15, 0, 30);
        let ann = record(
            "u1",
            "Ann",
            vec![
                completion(local(2026, 1, 14, 23, 50), 2.0),
                completion(local(2026, 1, 15, 0, 10), 1.0),
            ],
        );

        let today = build_charts_at(now, &[ann.clone()], None, &[], Period::Today);
        assert_eq!(today.tasks.points[0].value, 1.0);
        assert_eq!(today.hours.points[0].value, 1.0);

        let all = build_charts_at(now, &[ann], None, &[], Period::All);
        assert_eq!(all.tasks.points[0].value, 2.0);
        assert_eq!(all.hours.points[0].value, 3.0);
    }

    #[test]
    fn week_starts_on_sunday() {
        let now = local(2026, 1, 15, 12, 0);
        let start = period_start(&now, Period::Week).unwrap();
        assert_eq!(start, local(2026, 1, 11, 0, 0).with_timezone(&Utc));
    }

    #[test]
    fn month_starts_on_the_first() {
        let now = local(2026, 1, 15, 12, 0);
        let start = period_start(&now, Period::Month).unwrap();
        assert_eq!(start, local(2026, 1, 1, 0, 0).with_timezone(&Utc));
        assert!(period_start(&now, Period::All).is_none());
    }

    #[test]
    fn penalties_are_filtered_too() {
        let now = local(2026, 1, 15, 12, 0);
        let penalty = |at| StatsEntry {
            at,
            kind: StatsEntryKind::Penalty,
            value: 5.0,
        };
        let bob = record(
            "u2",
            "Bob",
            vec![
                penalty(local(2025, 12, 31, 9, 0).with_timezone(&Utc)),
                penalty(local(2026, 1, 2, 9, 0).with_timezone(&Utc)),
            ],
        );
        let month = build_charts_at(now, &[bob], None, &[], Period::Month);
        assert_eq!(month.penalties.points[0].value, 5.0);
    }

    #[test]
    fn legacy_records_of_others_show_zero_outside_all_time() {
        let now = local(2026, 1, 15, 12, 0);
        let mut legacy = record("u2", "Bob", vec![]);
        legacy.tasks_completed = 4;
        legacy.total_hours = 6.0;

        let week = build_charts_at(now, &[legacy.clone()], Some("u1"), &[], Period::Week);
        assert_eq!(week.tasks.points[0].value, 0.0);
        let all = build_charts_at(now, &[legacy], Some("u1"), &[], Period::All);
        assert_eq!(all.tasks.points[0].value, 4.0);
    }

    #[test]
    fn own_legacy_record_falls_back_to_task_completions() {
        let now = local(2026, 1, 15, 12, 0);
        let mut own = record("u1", "Ann", vec![]);
        own.tasks_completed = 2;
        own.total_hours = 3.0;
        let done = |at: DateTime<FixedOffset>, hours: f64| Task {
            id: "t".into(),
            title: "t".into(),
            start_time: at.to_rfc3339(),
            day: String::new(),
            estimated_hours: hours,
            completed: true,
            elapsed_seconds: None,
            completed_at: Some(at.with_timezone(&Utc)),
            alerted: true,
        };
        let tasks = vec![
            done(local(2026, 1, 14, 9, 0), 1.0),
            done(local(2026, 1, 15, 9, 0), 2.0),
        ];
        let today = build_charts_at(now, &[own], Some("u1"), &tasks, Period::Today);
        assert_eq!(today.tasks.points[0].value, 1.0);
        assert_eq!(today.hours.points[0].value, 2.0);
    }

    #[test]
    fn history_before_last_reset_is_ignored() {
        let now = local(2026, 1, 15, 12, 0);
        let mut ann = record("u1", "Ann", vec![completion(local(2026, 1, 15, 8, 0), 1.0)]);
        ann.history.push(completion(local(2026, 1, 15, 11, 0), 2.0));
        ann.last_reset_at = Some(local(2026, 1, 15, 10, 0).with_timezone(&Utc));
        let today = build_charts_at(now, &[ann], None, &[], Period::Today);
        assert_eq!(today.tasks.points[0].value, 1.0);
        assert_eq!(today.hours.points[0].value, 2.0);
    }

    #[test]
    fn series_are_sorted_by_label() {
        let now = local(2026, 1, 15, 12, 0);
        let records = vec![record("u2", "bob", vec![]), record("u1", "Ann", vec![])];
        let charts = build_charts_at(now, &records, None, &[], Period::All);
        let labels: Vec<_> = charts.tasks.points.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["Ann", "bob"]);
        assert_eq!(charts.hours.name, "Hours");
    }
}
