//! Write-side operations against the document store.
//!
//! Every operation takes the signed-in principal explicitly and validates its
//! input before anything is written. Multi-document effects (completion,
//! reset) go through a single batch so they land together or not at all.

use crate::errors::AppError;
use crate::models::{Principal, StatsEntry, StatsEntryKind, Task, TaskDraft, PENALTY_UNIT};
use crate::session::empty_stats;
use crate::store::{CollectionRef, DocRef, DocumentStore, FieldOp, Fields, Query, StoreError, WriteBatch};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const LOCAL_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

pub struct Dispatcher<S> {
    store: Arc<S>,
    admin_email: String,
}

impl<S: DocumentStore> Dispatcher<S> {
    pub fn new(store: Arc<S>, admin_email: impl Into<String>) -> Self {
        Self {
            store,
            admin_email: admin_email.into().trim().to_lowercase(),
        }
    }

    pub async fn add_task<Tz: TimeZone>(
        &self,
        principal: &Principal,
        title: &str,
        start: &str,
        hours: f64,
        tz: &Tz,
    ) -> Result<Task, AppError> {
        let draft = draft_task(title, start, hours, tz)?;
        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: draft.title,
            start_time: draft.start.to_rfc3339(),
            day: draft.day,
            estimated_hours: draft.estimated_hours,
            completed: false,
            elapsed_seconds: Some(0),
            completed_at: None,
            alerted: false,
        };

        let doc = CollectionRef::tasks(&principal.uid).doc(&task.id);
        self.store
            .set(&principal.uid, &doc, task_fields(&task))
            .await
            .map_err(AppError::write("add task"))?;
        info!(uid = %principal.uid, task = %task.id, "task added");
        Ok(task)
    }

    pub async fn save_elapsed(
        &self,
        principal: &Principal,
        task_id: &str,
        elapsed: i64,
    ) -> Result<(), AppError> {
        let doc = CollectionRef::tasks(&principal.uid).doc(task_id);
        self.store
            .update(
                &principal.uid,
                &doc,
                vec![("elapsed_seconds".into(), FieldOp::Set(json!(elapsed)))],
            )
            .await
            .map_err(AppError::write("save timer"))
    }

    /// Setting the flag twice is harmless.
    pub async fn mark_alerted(&self, principal: &Principal, task_id: &str) -> Result<(), AppError> {
        let doc = CollectionRef::tasks(&principal.uid).doc(task_id);
        self.store
            .update(
                &principal.uid,
                &doc,
                vec![("alerted".into(), FieldOp::Set(json!(true)))],
            )
            .await
            .map_err(AppError::write("mark alerted"))
    }

    /// Marks `task` complete and credits its estimated hours to the owner's
    /// stats, in one batch. The task update only applies while the stored
    /// task is still incomplete, so a repeat never double-counts.
    pub async fn complete_task(
        &self,
        principal: &Principal,
        task: &Task,
        elapsed: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if task.completed {
            return Err(AppError::AlreadyCompleted(task.id.clone()));
        }

        let entry = StatsEntry {
            at: now,
            kind: StatsEntryKind::Completion,
            value: task.estimated_hours,
        };
        let elapsed = elapsed.or(task.elapsed_seconds).unwrap_or(0);
        let batch = WriteBatch::new()
            .update_if(
                CollectionRef::tasks(&principal.uid).doc(&task.id),
                "completed",
                false,
                vec![
                    ("completed".into(), FieldOp::Set(json!(true))),
                    ("completed_at".into(), FieldOp::Set(json!(now))),
                    ("elapsed_seconds".into(), FieldOp::Set(json!(elapsed))),
                ],
            )
            .update(
                DocRef::stats(&principal.uid),
                vec![
                    ("tasks_completed".into(), FieldOp::Increment(1.0)),
                    ("total_hours".into(), FieldOp::Increment(task.estimated_hours)),
                    ("history".into(), FieldOp::Append(json!(entry))),
                ],
            );

        self.store
            .commit(&principal.uid, batch)
            .await
            .map_err(|err| match err {
                StoreError::PreconditionFailed { .. } => AppError::AlreadyCompleted(task.id.clone()),
                other => AppError::write("complete task")(other),
            })?;
        info!(uid = %principal.uid, task = %task.id, hours = task.estimated_hours, "task completed");
        Ok(())
    }

    pub async fn add_penalty(&self, principal: &Principal, now: DateTime<Utc>) -> Result<(), AppError> {
        let entry = StatsEntry {
            at: now,
            kind: StatsEntryKind::Penalty,
            value: PENALTY_UNIT as f64,
        };
        self.store
            .update(
                &principal.uid,
                &DocRef::stats(&principal.uid),
                vec![
                    ("penalty".into(), FieldOp::Increment(PENALTY_UNIT as f64)),
                    ("history".into(), FieldOp::Append(json!(entry))),
                ],
            )
            .await
            .map_err(AppError::write("add penalty"))?;
        info!(uid = %principal.uid, units = PENALTY_UNIT, "penalty added");
        Ok(())
    }

    pub fn is_admin(&self, principal: &Principal) -> bool {
        principal.email.trim().to_lowercase() == self.admin_email
    }

    /// Number of tasks a reset would delete.
    pub async fn reset_scope(&self, principal: &Principal) -> Result<usize, AppError> {
        if !self.is_admin(principal) {
            return Err(AppError::Forbidden);
        }
        let docs = self
            .store
            .query(&principal.uid, &Query::all(CollectionRef::tasks(&principal.uid)))
            .await
            .map_err(reset_error)?;
        Ok(docs.len())
    }

    /// Deletes every task of `principal` and zeroes its stats in one batch.
    pub async fn reset_all(&self, principal: &Principal, now: DateTime<Utc>) -> Result<usize, AppError> {
        if !self.is_admin(principal) {
            return Err(AppError::Forbidden);
        }

        let tasks = CollectionRef::tasks(&principal.uid);
        let docs = self
            .store
            .query(&principal.uid, &Query::all(tasks.clone()))
            .await
            .map_err(reset_error)?;

        let mut stats = empty_stats(principal);
        stats.insert("last_reset_at".into(), json!(now));
        let batch = docs
            .iter()
            .fold(WriteBatch::new(), |batch, doc| batch.delete(tasks.doc(&doc.id)))
            .set(DocRef::stats(&principal.uid), stats);

        self.store
            .commit(&principal.uid, batch)
            .await
            .map_err(reset_error)?;
        info!(uid = %principal.uid, deleted = docs.len(), "all data reset");
        Ok(docs.len())
    }
}

fn reset_error(err: StoreError) -> AppError {
    match err {
        StoreError::PermissionDenied { .. } => AppError::ResetPermissionDenied,
        other => AppError::write("reset all data")(other),
    }
}

fn task_fields(task: &Task) -> Fields {
    match serde_json::to_value(task) {
        Ok(Value::Object(mut fields)) => {
            fields.remove("id");
            fields
        }
        _ => Fields::new(),
    }
}

/// Validates add-task input. `start` is a local wall-clock time in `tz`
/// (`YYYY-MM-DDTHH:MM`, optionally with seconds) or an RFC 3339 instant.
pub fn draft_task<Tz: TimeZone>(
    title: &str,
    start: &str,
    hours: f64,
    tz: &Tz,
) -> Result<TaskDraft, AppError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title is required"));
    }
    if !hours.is_finite() || hours <= 0.0 {
        return Err(AppError::bad_request("estimated hours must be greater than zero"));
    }
    let start = start.trim();
    if start.is_empty() {
        return Err(AppError::bad_request("start time is required"));
    }
    let local = parse_local_start(start, tz)
        .ok_or_else(|| AppError::bad_request(format!("invalid start time '{start}'")))?;

    Ok(TaskDraft {
        title: title.to_string(),
        start: local.with_timezone(&Utc),
        day: local.date_naive().to_string(),
        estimated_hours: hours,
    })
}

pub fn parse_local_start<Tz: TimeZone>(input: &str, tz: &Tz) -> Option<DateTime<Tz>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(input) {
        return Some(instant.with_timezone(tz));
    }
    LOCAL_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(input, format).ok())
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
}
