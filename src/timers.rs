use crate::models::TimerView;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerEntry {
    accumulated: i64,
    started_at: Option<DateTime<Utc>>,
}

impl TimerEntry {
    fn elapsed(&self, now: DateTime<Utc>) -> i64 {
        match self.started_at {
            Some(started) => self.accumulated + (now - started).num_seconds().max(0),
            None => self.accumulated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Started { resumed_from: i64 },
    Stopped { elapsed: i64 },
}

/// Local stopwatches, one per task.
///
/// Elapsed time is derived from the instant a timer was started, so nothing
/// has to fire per task: any clock tick just reads `elapsed(now)`.
#[derive(Debug, Default)]
pub struct TimerBoard {
    entries: HashMap<String, TimerEntry>,
}

impl TimerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts or resumes. Resumes from the larger of the local and the
    /// persisted value. Returns the resume point.
    pub fn start(&mut self, task_id: &str, persisted: Option<i64>, now: DateTime<Utc>) -> i64 {
        let persisted = persisted.unwrap_or(0).max(0);
        let entry = self
            .entries
            .entry(task_id.to_string())
            .or_insert(TimerEntry {
                accumulated: persisted,
                started_at: None,
            });
        if entry.started_at.is_none() {
            entry.accumulated = entry.accumulated.max(persisted);
            entry.started_at = Some(now);
        }
        entry.accumulated
    }

    /// Pauses and returns the value to flush, or None if no timer exists.
    pub fn stop(&mut self, task_id: &str, now: DateTime<Utc>) -> Option<i64> {
        let entry = self.entries.get_mut(task_id)?;
        entry.accumulated = entry.elapsed(now);
        entry.started_at = None;
        Some(entry.accumulated)
    }

    pub fn toggle(&mut self, task_id: &str, persisted: Option<i64>, now: DateTime<Utc>) -> Toggle {
        if self.is_running(task_id) {
            let elapsed = self.stop(task_id, now).unwrap_or(0);
            Toggle::Stopped { elapsed }
        } else {
            let resumed_from = self.start(task_id, persisted, now);
            Toggle::Started { resumed_from }
        }
    }

    /// Stops and forgets the timer. Used on completion.
    pub fn finish(&mut self, task_id: &str, now: DateTime<Utc>) -> Option<i64> {
        self.entries
            .remove(task_id)
            .map(|entry| entry.elapsed(now))
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.entries
            .get(task_id)
            .is_some_and(|entry| entry.started_at.is_some())
    }

    pub fn elapsed(&self, task_id: &str, now: DateTime<Utc>) -> Option<i64> {
        self.entries.get(task_id).map(|entry| entry.elapsed(now))
    }

    pub fn running_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.started_at.is_some())
            .count()
    }

    /// Drops every timer, running or paused. Returns how many were running.
    pub fn halt_all(&mut self) -> usize {
        let running = self.running_count();
        self.entries.clear();
        running
    }

    pub fn view(&self, now: DateTime<Utc>) -> Vec<TimerView> {
        let mut out: Vec<TimerView> = self
            .entries
            .iter()
            .map(|(task_id, entry)| TimerView {
                task_id: task_id.clone(),
                elapsed_seconds: entry.elapsed(now),
                running: entry.started_at.is_some(),
            })
            .collect();
        out.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        out
    }
}
