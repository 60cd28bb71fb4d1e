use crate::models::{Principal, StatsRecord, Task};
use crate::store::{
    CollectionRef, Document, DocumentStore, Query, SnapshotEvent, StoreError, Subscription,
};
use chrono::NaiveDate;
use tracing::{info, warn};

/// Local mirror of the principal's task list and of the public stats.
///
/// Each snapshot replaces the cached list wholesale. A failing subscription
/// leaves the last good list in place and surfaces a warning instead.
#[derive(Default)]
pub struct LiveRecordStore {
    tasks_sub: Option<Subscription>,
    stats_sub: Option<Subscription>,
    tasks: Vec<Task>,
    stats: Vec<StatsRecord>,
    tasks_warning: Option<String>,
    stats_warning: Option<String>,
    day: Option<NaiveDate>,
}

impl LiveRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens both subscriptions for `principal`, replacing any previous ones.
    pub fn open<S: DocumentStore>(&mut self, store: &S, principal: &Principal) {
        self.close();
        self.tasks_sub = Some(store.subscribe(&principal.uid, self.tasks_query(principal)));
        self.stats_sub = Some(store.subscribe(&principal.uid, Query::all(CollectionRef::Stats)));
        info!(uid = %principal.uid, day = ?self.day, "live records opened");
        self.sync();
    }

    /// Restricts "my tasks" to one calendar day. Reopens the task subscription.
    pub fn set_day_filter<S: DocumentStore>(
        &mut self,
        store: &S,
        principal: &Principal,
        day: Option<NaiveDate>,
    ) {
        self.day = day;
        if self.tasks_sub.is_some() {
            self.tasks_sub = Some(store.subscribe(&principal.uid, self.tasks_query(principal)));
            self.sync();
        }
    }

    pub fn day_filter(&self) -> Option<NaiveDate> {
        self.day
    }

    /// Drops both subscriptions and every cached record.
    pub fn close(&mut self) {
        let had_tasks = self.tasks_sub.take().is_some();
        let had_stats = self.stats_sub.take().is_some();
        if had_tasks || had_stats {
            info!("live records closed");
        }
        self.tasks.clear();
        self.stats.clear();
        self.tasks_warning = None;
        self.stats_warning = None;
    }

    /// Pulls the newest snapshot of each subscription. Returns whether
    /// anything was replaced.
    pub fn sync(&mut self) -> bool {
        let mut changed = false;

        if let Some(event) = self.tasks_sub.as_mut().and_then(Subscription::latest) {
            match decode_all(event, decode_task) {
                Ok(tasks) => {
                    self.tasks = tasks;
                    self.tasks_warning = None;
                    changed = true;
                }
                Err(err) => {
                    warn!("task subscription failed: {err}");
                    self.tasks_warning = Some(format!("Could not load your tasks: {err}"));
                }
            }
        }

        if let Some(event) = self.stats_sub.as_mut().and_then(Subscription::latest) {
            match decode_all(event, decode_stats) {
                Ok(stats) => {
                    self.stats = stats;
                    self.stats_warning = None;
                    changed = true;
                }
                Err(err) => {
                    warn!("stats subscription failed: {err}");
                    self.stats_warning = Some(format!("Could not load statistics: {err}"));
                }
            }
        }

        changed
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn stats(&self) -> &[StatsRecord] {
        &self.stats
    }

    pub fn warnings(&self) -> Vec<String> {
        self.tasks_warning
            .iter()
            .chain(self.stats_warning.iter())
            .cloned()
            .collect()
    }

    /// Optimistic local edit. The next snapshot overwrites it.
    pub fn patch_task(&mut self, id: &str, patch: impl FnOnce(&mut Task)) {
        if let Some(task) = self.tasks.iter_mut().find(|task| task.id == id) {
            patch(task);
        }
    }

    fn tasks_query(&self, principal: &Principal) -> Query {
        let query = Query::all(CollectionRef::tasks(&principal.uid));
        match self.day {
            Some(day) => query.where_eq("day", day.to_string()),
            None => query,
        }
    }
}

fn decode_all<T>(
    event: SnapshotEvent,
    decode: fn(&Document) -> Option<T>,
) -> Result<Vec<T>, StoreError> {
    Ok(event?.iter().filter_map(decode).collect())
}

fn decode_task(doc: &Document) -> Option<Task> {
    match doc.decode::<Task>() {
        Ok(mut task) => {
            task.id = doc.id.clone();
            Some(task)
        }
        Err(err) => {
            warn!("skipping malformed task: {err}");
            None
        }
    }
}

fn decode_stats(doc: &Document) -> Option<StatsRecord> {
    match doc.decode::<StatsRecord>() {
        Ok(mut record) => {
            if record.uid.is_empty() {
                record.uid = doc.id.clone();
            }
            Some(record)
        }
        Err(err) => {
            warn!("skipping malformed stats record: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreData;
    use crate::store::{AccessRules, DocRef, Fields, MemoryStore};
    use serde_json::{json, Value};

    fn principal(uid: &str) -> Principal {
        Principal {
            uid: uid.into(),
            display_name: uid.to_uppercase(),
            email: format!("{uid}@example.com"),
        }
    }

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn task_fields(title: &str, day: &str) -> Fields {
        fields(json!({
            "title": title,
            "start_time": format!("{day}T09:00:00Z"),
            "day": day,
            "estimated_hours": 1.0,
        }))
    }

    #[tokio::test]
    async fn snapshots_replace_the_cache() {
        let store = MemoryStore::new(StoreData::default(), AccessRules::default());
        let ann = principal("u1");
        let mut live = LiveRecordStore::new();
        live.open(&store, &ann);
        assert!(live.tasks().is_empty());

        let tasks = CollectionRef::tasks("u1");
        store
            .set("u1", &tasks.doc("a"), task_fields("Read", "2026-01-15"))
            .await
            .unwrap();
        assert!(live.sync());
        assert_eq!(live.tasks().len(), 1);
        assert_eq!(live.tasks()[0].id, "a");

        store.delete("u1", &tasks.doc("a")).await.unwrap();
        live.sync();
        assert!(live.tasks().is_empty());
    }

    #[tokio::test]
    async fn malformed_documents_are_skipped() {
        let store = MemoryStore::new(StoreData::default(), AccessRules::default());
        let tasks = CollectionRef::tasks("u1");
        store
            .set("u1", &tasks.doc("good"), task_fields("Read", "2026-01-15"))
            .await
            .unwrap();
        store
            .set("u1", &tasks.doc("bad"), fields(json!({ "title": 3 })))
            .await
            .unwrap();

        let mut live = LiveRecordStore::new();
        live.open(&store, &principal("u1"));
        assert_eq!(live.tasks().len(), 1);
        assert!(live.warnings().is_empty());
    }

    #[tokio::test]
    async fn day_filter_reopens_task_subscription() {
        let store = MemoryStore::new(StoreData::default(), AccessRules::default());
        let tasks = CollectionRef::tasks("u1");
        store
            .set("u1", &tasks.doc("a"), task_fields("Read", "2026-01-15"))
            .await
            .unwrap();
        store
            .set("u1", &tasks.doc("b"), task_fields("Write", "2026-01-16"))
            .await
            .unwrap();

        let ann = principal("u1");
        let mut live = LiveRecordStore::new();
        live.open(&store, &ann);
        assert_eq!(live.tasks().len(), 2);

        live.set_day_filter(&store, &ann, NaiveDate::from_ymd_opt(2026, 1, 16));
        assert_eq!(live.tasks().len(), 1);
        assert_eq!(live.tasks()[0].title, "Write");
        assert_eq!(store.listener_count(), 2);
    }

    #[tokio::test]
    async fn stats_records_take_their_id_from_the_document() {
        let store = MemoryStore::new(StoreData::default(), AccessRules::default());
        store
            .set("u2", &DocRef::stats("u2"), fields(json!({ "display_name": "Bob" })))
            .await
            .unwrap();
        let mut live = LiveRecordStore::new();
        live.open(&store, &principal("u1"));
        assert_eq!(live.stats().len(), 1);
        assert_eq!(live.stats()[0].uid, "u2");
    }

    #[tokio::test]
    async fn close_detaches_listeners_and_clears_cache() {
        let store = MemoryStore::new(StoreData::default(), AccessRules::default());
        store
            .set("u1", &DocRef::stats("u1"), fields(json!({ "display_name": "Ann" })))
            .await
            .unwrap();
        let mut live = LiveRecordStore::new();
        live.open(&store, &principal("u1"));
        assert_eq!(store.listener_count(), 2);
        assert_eq!(live.stats().len(), 1);

        live.close();
        assert_eq!(store.listener_count(), 0);
        assert!(live.stats().is_empty());
    }

    #[tokio::test]
    async fn failing_subscription_keeps_last_snapshot() {
        let store = MemoryStore::new(StoreData::default(), AccessRules::default());
        let tasks = CollectionRef::tasks("u1");
        store
            .set("u1", &tasks.doc("a"), task_fields("Read", "2026-01-15"))
            .await
            .unwrap();
        let mut live = LiveRecordStore::new();
        live.open(&store, &principal("u1"));
        assert_eq!(live.tasks().len(), 1);

        store.fail_listeners(StoreError::PermissionDenied {
            path: tasks.path(),
        });
        assert!(!live.sync());
        assert_eq!(live.tasks().len(), 1);
        let warnings = live.warnings();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("Could not load your tasks"));
        assert!(warnings[1].starts_with("Could not load statistics"));

        store
            .set("u1", &tasks.doc("b"), task_fields("Write", "2026-01-15"))
            .await
            .unwrap();
        assert!(live.sync());
        assert_eq!(live.tasks().len(), 2);
        assert_eq!(live.warnings().len(), 1);
    }
}
