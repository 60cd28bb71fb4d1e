use crate::models::Task;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::warn;

/// Tasks split into the three disjoint views, each ordered by scheduled start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub active: Vec<Task>,
    pub upcoming: Vec<Task>,
    pub completed: Vec<Task>,
}

impl Partition {
    /// Active tasks that have never been alerted.
    pub fn unalerted(&self) -> impl Iterator<Item = &Task> {
        self.active.iter().filter(|task| !task.alerted)
    }
}

pub fn partition(tasks: &[Task], now: DateTime<Utc>) -> Partition {
    let mut dated: Vec<(DateTime<Utc>, &Task)> = tasks
        .iter()
        .filter_map(|task| match task.scheduled_start() {
            Some(start) => Some((start, task)),
            None => {
                warn!(task = %task.id, start = %task.start_time, "skipping task with unparseable start");
                None
            }
        })
        .collect();
    dated.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

    let mut out = Partition::default();
    for (start, task) in dated {
        let bucket = if task.completed {
            &mut out.completed
        } else if start <= now {
            &mut out.active
        } else {
            &mut out.upcoming
        };
        bucket.push(task.clone());
    }
    out
}

/// Remembers which tasks were alerted in this session so a recomputation
/// racing the "alerted" write does not fire twice.
#[derive(Debug, Default)]
pub struct AlertGuard {
    fired: HashSet<String>,
}

impl AlertGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tasks that should alert now and records them as fired.
    pub fn take_due(&mut self, partition: &Partition) -> Vec<Task> {
        partition
            .unalerted()
            .filter(|task| self.fired.insert(task.id.clone()))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.fired.clear();
    }
}
