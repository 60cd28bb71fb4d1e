//! Document store seam.
//!
//! `DocumentStore` is the set of primitives the tracker consumes from its
//! backend: point reads and writes, single-filter queries, live snapshot
//! subscriptions and all-or-nothing batches. `MemoryStore` is the in-process
//! backend used by the server binary and the tests; it enforces owner-only
//! access rules and optionally mirrors every commit to a JSON file.

use crate::storage::{persist_data, StoreData};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error};

pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("permission denied on {path}")]
    PermissionDenied { path: String },
    #[error("document {path} not found")]
    NotFound { path: String },
    #[error("precondition on field '{field}' failed for {path}")]
    PreconditionFailed { path: String, field: String },
    #[error("malformed document {path}: {reason}")]
    Malformed { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionRef {
    /// A principal's private task list.
    Tasks { owner: String },
    /// The public per-principal stats collection, keyed by principal id.
    Stats,
}

impl CollectionRef {
    pub fn tasks(owner: impl Into<String>) -> Self {
        CollectionRef::Tasks {
            owner: owner.into(),
        }
    }

    pub fn path(&self) -> String {
        match self {
            CollectionRef::Tasks { owner } => format!("users/{owner}/tasks"),
            CollectionRef::Stats => "stats".to_string(),
        }
    }

    pub fn doc(&self, id: impl Into<String>) -> DocRef {
        DocRef {
            collection: self.clone(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    pub collection: CollectionRef,
    pub id: String,
}

impl DocRef {
    pub fn stats(uid: impl Into<String>) -> Self {
        CollectionRef::Stats.doc(uid)
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.collection.path(), self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Fields,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(Value::Object(self.data.clone())).map_err(|err| {
            StoreError::Malformed {
                path: self.id.clone(),
                reason: err.to_string(),
            }
        })
    }
}

/// A collection query with at most one equality filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionRef,
    pub filter: Option<(String, Value)>,
}

impl Query {
    pub fn all(collection: CollectionRef) -> Self {
        Self {
            collection,
            filter: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some((field.into(), value.into()));
        self
    }

    fn matches(&self, fields: &Fields) -> bool {
        match &self.filter {
            Some((field, expected)) => fields.get(field) == Some(expected),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    Increment(f64),
    Append(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        doc: DocRef,
        data: Fields,
    },
    Update {
        doc: DocRef,
        ops: Vec<(String, FieldOp)>,
        expect: Option<(String, Value)>,
    },
    Delete {
        doc: DocRef,
    },
}

impl WriteOp {
    fn doc(&self) -> &DocRef {
        match self {
            WriteOp::Set { doc, .. } | WriteOp::Update { doc, .. } | WriteOp::Delete { doc } => doc,
        }
    }
}

/// Writes applied all-or-nothing by [`DocumentStore::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, doc: DocRef, data: Fields) -> Self {
        self.ops.push(WriteOp::Set { doc, data });
        self
    }

    pub fn update(mut self, doc: DocRef, ops: Vec<(String, FieldOp)>) -> Self {
        self.ops.push(WriteOp::Update {
            doc,
            ops,
            expect: None,
        });
        self
    }

    /// Update that only applies while `field` still equals `expected`.
    pub fn update_if(
        mut self,
        doc: DocRef,
        field: impl Into<String>,
        expected: impl Into<Value>,
        ops: Vec<(String, FieldOp)>,
    ) -> Self {
        self.ops.push(WriteOp::Update {
            doc,
            ops,
            expect: Some((field.into(), expected.into())),
        });
        self
    }

    pub fn delete(mut self, doc: DocRef) -> Self {
        self.ops.push(WriteOp::Delete { doc });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub type SnapshotEvent = Result<Vec<Document>, StoreError>;

/// A live query. Every delivery is the complete current result set.
///
/// Dropping the subscription (or calling [`Subscription::cancel`]) detaches
/// the listener from the store.
pub struct Subscription {
    rx: watch::Receiver<SnapshotEvent>,
    unread: bool,
    _guard: ListenerGuard,
}

impl Subscription {
    /// Returns the newest snapshot if one arrived since the last call.
    pub fn latest(&mut self) -> Option<SnapshotEvent> {
        let changed = self.rx.has_changed().unwrap_or(false);
        let unread = std::mem::take(&mut self.unread);
        if !changed && !unread {
            return None;
        }
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn cancel(self) {}
}

struct ListenerGuard {
    id: u64,
    inner: Weak<Mutex<StoreInner>>,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.listeners.retain(|listener| listener.id != self.id);
            debug!(listener = self.id, "subscription closed");
        }
    }
}

pub trait DocumentStore: Send + Sync + 'static {
    fn get(
        &self,
        caller: &str,
        doc: &DocRef,
    ) -> impl Future<Output = Result<Option<Document>, StoreError>> + Send;

    fn set(
        &self,
        caller: &str,
        doc: &DocRef,
        data: Fields,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update(
        &self,
        caller: &str,
        doc: &DocRef,
        ops: Vec<(String, FieldOp)>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete(
        &self,
        caller: &str,
        doc: &DocRef,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn query(
        &self,
        caller: &str,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send;

    /// Opens a live query. Access failures are delivered through the stream.
    fn subscribe(&self, caller: &str, query: Query) -> Subscription;

    fn commit(
        &self,
        caller: &str,
        batch: WriteBatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessRules {
    /// Deny every write regardless of ownership.
    pub read_only: bool,
}

impl AccessRules {
    fn check_read(&self, caller: &str, collection: &CollectionRef) -> Result<(), StoreError> {
        let allowed = match collection {
            CollectionRef::Tasks { owner } => !caller.is_empty() && caller == owner,
            CollectionRef::Stats => !caller.is_empty(),
        };
        if allowed {
            Ok(())
        } else {
            Err(StoreError::PermissionDenied {
                path: collection.path(),
            })
        }
    }

    fn check_write(&self, caller: &str, doc: &DocRef) -> Result<(), StoreError> {
        let allowed = !self.read_only
            && !caller.is_empty()
            && match &doc.collection {
                CollectionRef::Tasks { owner } => caller == owner,
                CollectionRef::Stats => caller == doc.id,
            };
        if allowed {
            Ok(())
        } else {
            Err(StoreError::PermissionDenied { path: doc.path() })
        }
    }
}

struct Listener {
    id: u64,
    caller: String,
    query: Query,
    tx: watch::Sender<SnapshotEvent>,
}

#[derive(Default)]
struct StoreInner {
    data: StoreData,
    listeners: Vec<Listener>,
    next_listener: u64,
}

impl StoreInner {
    fn run_query(&self, query: &Query) -> Vec<Document> {
        self.data
            .collections
            .get(&query.collection.path())
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| query.matches(fields))
                    .map(|(id, fields)| Document {
                        id: id.clone(),
                        data: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn evaluate(&self, rules: &AccessRules, caller: &str, query: &Query) -> SnapshotEvent {
        rules.check_read(caller, &query.collection)?;
        Ok(self.run_query(query))
    }

    fn notify(&mut self, rules: &AccessRules, touched: &HashSet<CollectionRef>) {
        self.listeners.retain(|listener| !listener.tx.is_closed());
        for listener in &self.listeners {
            if touched.contains(&listener.query.collection) {
                let event = self.evaluate(rules, &listener.caller, &listener.query);
                let _previous = listener.tx.send_replace(event);
            }
        }
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
    rules: AccessRules,
    persist_to: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new(data: StoreData, rules: AccessRules) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                data,
                ..StoreInner::default()
            })),
            rules,
            persist_to: None,
        }
    }

    /// Mirror every committed batch to `path`.
    pub fn persist_to(mut self, path: PathBuf) -> Self {
        self.persist_to = Some(path);
        self
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn data(&self) -> StoreData {
        self.lock().data.clone()
    }

    /// Pushes `error` to every open subscription, as a backend outage would.
    #[cfg(test)]
    pub(crate) fn fail_listeners(&self, error: StoreError) {
        let inner = self.lock();
        for listener in &inner.listeners {
            let _previous = listener.tx.send_replace(Err(error.clone()));
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_batch(&self, caller: &str, batch: WriteBatch) -> Result<Option<StoreData>, StoreError> {
        let mut inner = self.lock();
        for op in &batch.ops {
            self.rules.check_write(caller, op.doc())?;
        }

        let mut staged = inner.data.clone();
        let mut touched = HashSet::new();
        for op in batch.ops {
            touched.insert(op.doc().collection.clone());
            apply_op(&mut staged, op)?;
        }
        inner.data = staged;
        inner.notify(&self.rules, &touched);

        Ok(self.persist_to.as_ref().map(|_| inner.data.clone()))
    }
}

impl DocumentStore for MemoryStore {
    async fn get(&self, caller: &str, doc: &DocRef) -> Result<Option<Document>, StoreError> {
        self.rules.check_read(caller, &doc.collection)?;
        let inner = self.lock();
        Ok(inner
            .data
            .collections
            .get(&doc.collection.path())
            .and_then(|docs| docs.get(&doc.id))
            .map(|fields| Document {
                id: doc.id.clone(),
                data: fields.clone(),
            }))
    }

    async fn set(&self, caller: &str, doc: &DocRef, data: Fields) -> Result<(), StoreError> {
        self.commit(caller, WriteBatch::new().set(doc.clone(), data)).await
    }

    async fn update(
        &self,
        caller: &str,
        doc: &DocRef,
        ops: Vec<(String, FieldOp)>,
    ) -> Result<(), StoreError> {
        self.commit(caller, WriteBatch::new().update(doc.clone(), ops))
            .await
    }

    async fn delete(&self, caller: &str, doc: &DocRef) -> Result<(), StoreError> {
        self.commit(caller, WriteBatch::new().delete(doc.clone())).await
    }

    async fn query(&self, caller: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        let inner = self.lock();
        inner.evaluate(&self.rules, caller, query)
    }

    fn subscribe(&self, caller: &str, query: Query) -> Subscription {
        let mut inner = self.lock();
        let initial = inner.evaluate(&self.rules, caller, &query);
        let (tx, rx) = watch::channel(initial);
        let id = inner.next_listener;
        inner.next_listener += 1;
        debug!(listener = id, path = %query.collection.path(), "subscription opened");
        inner.listeners.push(Listener {
            id,
            caller: caller.to_string(),
            query,
            tx,
        });

        Subscription {
            rx,
            unread: true,
            _guard: ListenerGuard {
                id,
                inner: Arc::downgrade(&self.inner),
            },
        }
    }

    async fn commit(&self, caller: &str, batch: WriteBatch) -> Result<(), StoreError> {
        let writes = batch.len();
        let snapshot = self.apply_batch(caller, batch)?;
        debug!(writes, "batch committed");

        if let (Some(path), Some(data)) = (self.persist_to.as_ref(), snapshot) {
            // The in-memory tree stays authoritative when the mirror fails.
            if let Err(err) = persist_data(path, &data).await {
                error!("failed to persist store: {err}");
            }
        }
        Ok(())
    }
}

fn apply_op(data: &mut StoreData, op: WriteOp) -> Result<(), StoreError> {
    match op {
        WriteOp::Set { doc, data: fields } => {
            data.collections
                .entry(doc.collection.path())
                .or_default()
                .insert(doc.id, fields);
        }
        WriteOp::Update { doc, ops, expect } => {
            let path = doc.path();
            let fields = data
                .collections
                .get_mut(&doc.collection.path())
                .and_then(|docs| docs.get_mut(&doc.id))
                .ok_or_else(|| StoreError::NotFound { path: path.clone() })?;

            if let Some((field, expected)) = expect {
                let current = fields.get(&field).cloned().unwrap_or(Value::Null);
                if current != expected {
                    return Err(StoreError::PreconditionFailed { path, field });
                }
            }

            for (field, op) in ops {
                let next = match op {
                    FieldOp::Set(value) => value,
                    FieldOp::Increment(delta) => {
                        let base = fields.get(&field).and_then(Value::as_f64).unwrap_or(0.0);
                        number_value(base + delta)
                    }
                    FieldOp::Append(value) => match fields.remove(&field) {
                        Some(Value::Array(mut items)) => {
                            items.push(value);
                            Value::Array(items)
                        }
                        _ => Value::Array(vec![value]),
                    },
                };
                fields.insert(field, next);
            }
        }
        WriteOp::Delete { doc } => {
            if let Some(docs) = data.collections.get_mut(&doc.collection.path()) {
                docs.remove(&doc.id);
                if docs.is_empty() {
                    data.collections.remove(&doc.collection.path());
                }
            }
        }
    }
    Ok(())
}

/// Whole numbers stay integers so counters decode as unsigned fields.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::new(StoreData::default(), AccessRules::default())
    }

    #[tokio::test]
    async fn owner_reads_back_what_it_set() {
        let store = store();
        let doc = DocRef::stats("u1");
        store
            .set("u1", &doc, fields(json!({ "display_name": "Ann" })))
            .await
            .unwrap();
        let found = store.get("u2", &doc).await.unwrap().expect("doc");
        assert_eq!(found.data["display_name"], json!("Ann"));
    }

    #[tokio::test]
    async fn private_collection_rejects_other_principals() {
        let store = store();
        let doc = CollectionRef::tasks("u1").doc("t1");
        let err = store
            .set("u2", &doc, fields(json!({ "title": "x" })))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied { .. }));

        let err = store
            .query("u2", &Query::all(CollectionRef::tasks("u1")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn stats_are_writable_only_by_owner() {
        let store = store();
        let err = store
            .set("u2", &DocRef::stats("u1"), fields(json!({ "display_name": "x" })))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn increment_and_append_update_fields() {
        let store = store();
        let doc = DocRef::stats("u1");
        store
            .set("u1", &doc, fields(json!({ "tasks_completed": 1 })))
            .await
            .unwrap();
        store
            .update(
                "u1",
                &doc,
                vec![
                    ("tasks_completed".into(), FieldOp::Increment(1.0)),
                    ("total_hours".into(), FieldOp::Increment(1.5)),
                    ("history".into(), FieldOp::Append(json!({ "v": 1 }))),
                ],
            )
            .await
            .unwrap();
        let found = store.get("u1", &doc).await.unwrap().unwrap();
        assert_eq!(found.data["tasks_completed"], json!(2));
        assert_eq!(found.data["total_hours"], json!(1.5));
        assert_eq!(found.data["history"], json!([{ "v": 1 }]));
    }

    #[tokio::test]
    async fn failed_batch_leaves_nothing_applied() {
        let store = store();
        let tasks = CollectionRef::tasks("u1");
        store
            .set("u1", &tasks.doc("t1"), fields(json!({ "completed": true })))
            .await
            .unwrap();
        store
            .set("u1", &DocRef::stats("u1"), fields(json!({ "tasks_completed": 0 })))
            .await
            .unwrap();

        let batch = WriteBatch::new()
            .update(
                DocRef::stats("u1"),
                vec![("tasks_completed".into(), FieldOp::Increment(1.0))],
            )
            .update_if(
                tasks.doc("t1"),
                "completed",
                false,
                vec![("completed".into(), FieldOp::Set(json!(true)))],
            );
        let err = store.commit("u1", batch).await.unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed { .. }));

        let stats = store.get("u1", &DocRef::stats("u1")).await.unwrap().unwrap();
        assert_eq!(stats.data["tasks_completed"], json!(0));
    }

    #[tokio::test]
    async fn read_only_rules_deny_owner_writes() {
        let store = MemoryStore::new(StoreData::default(), AccessRules { read_only: true });
        let err = store
            .set("u1", &DocRef::stats("u1"), fields(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn subscription_delivers_full_snapshots() {
        let store = store();
        let tasks = CollectionRef::tasks("u1");
        let mut sub = store.subscribe("u1", Query::all(tasks.clone()));
        assert_eq!(sub.latest(), Some(Ok(vec![])));
        assert_eq!(sub.latest(), None);

        store
            .set("u1", &tasks.doc("a"), fields(json!({ "day": "d1" })))
            .await
            .unwrap();
        store
            .set("u1", &tasks.doc("b"), fields(json!({ "day": "d2" })))
            .await
            .unwrap();

        let snapshot = sub.latest().unwrap().unwrap();
        let ids: Vec<_> = snapshot.iter().map(|doc| doc.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn filtered_subscription_only_sees_matches() {
        let store = store();
        let tasks = CollectionRef::tasks("u1");
        store
            .set("u1", &tasks.doc("a"), fields(json!({ "day": "d1" })))
            .await
            .unwrap();
        store
            .set("u1", &tasks.doc("b"), fields(json!({ "day": "d2" })))
            .await
            .unwrap();
        let mut sub = store.subscribe("u1", Query::all(tasks).where_eq("day", "d2"));
        let snapshot = sub.latest().unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "b");
    }

    #[tokio::test]
    async fn denied_subscription_reports_error() {
        let store = store();
        let mut sub = store.subscribe("u2", Query::all(CollectionRef::tasks("u1")));
        assert!(matches!(
            sub.latest(),
            Some(Err(StoreError::PermissionDenied { .. }))
        ));
    }

    #[tokio::test]
    async fn dropping_subscription_detaches_listener() {
        let store = store();
        let sub = store.subscribe("u1", Query::all(CollectionRef::Stats));
        assert_eq!(store.listener_count(), 1);
        sub.cancel();
        assert_eq!(store.listener_count(), 0);
    }
}
