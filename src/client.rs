use crate::derivation::{partition, AlertGuard, Partition};
use crate::dispatch::Dispatcher;
use crate::errors::AppError;
use crate::identity::LocalIdentity;
use crate::live::LiveRecordStore;
use crate::models::{
    Alert, ChartSet, Period, Principal, ResetTicket, SessionResponse, StatsRecord, Task, TaskView,
    TimerView,
};
use crate::session::{ensure_stats_record, SessionTracker, Transition};
use crate::stats::build_charts_at;
use crate::store::{CollectionRef, DocumentStore};
use crate::timers::{TimerBoard, Toggle};
use chrono::{DateTime, Local, NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

/// One client session: the signed-in principal, its live records, local
/// timers and the write-side dispatcher.
///
/// Local state is a cache. Writes go to the store and come back through the
/// subscriptions; whatever snapshot arrives last wins.
pub struct Tracker<S: DocumentStore> {
    store: Arc<S>,
    identity: Arc<LocalIdentity>,
    auth: watch::Receiver<Option<Principal>>,
    session: SessionTracker,
    live: LiveRecordStore,
    dispatcher: Dispatcher<S>,
    timers: TimerBoard,
    alert_guard: AlertGuard,
    alerts: Vec<Alert>,
    alert_error: Option<String>,
    stats_error: Option<String>,
    pending_reset: Option<String>,
}

impl<S: DocumentStore> Tracker<S> {
    pub fn new(store: Arc<S>, identity: Arc<LocalIdentity>, admin_email: &str) -> Self {
        let auth = identity.subscribe();
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&store), admin_email),
            store,
            identity,
            auth,
            session: SessionTracker::new(),
            live: LiveRecordStore::new(),
            timers: TimerBoard::new(),
            alert_guard: AlertGuard::new(),
            alerts: Vec::new(),
            alert_error: None,
            stats_error: None,
            pending_reset: None,
        }
    }

    pub fn session(&self) -> SessionResponse {
        SessionResponse {
            ready: self.session.is_ready(),
            principal: self.session.principal().cloned(),
        }
    }

    pub async fn sign_in(&mut self, display_name: &str, email: &str) -> Result<Principal, AppError> {
        let principal = self.identity.sign_in(display_name, email)?;
        self.sync_auth().await?;
        Ok(principal)
    }

    pub async fn sign_out(&mut self) -> Result<(), AppError> {
        self.identity.sign_out();
        self.sync_auth().await
    }

    /// Applies the latest auth state. Everything owned by a departing
    /// principal is torn down before the session moves on.
    pub async fn sync_auth(&mut self) -> Result<(), AppError> {
        if !self.auth.has_changed().unwrap_or(false) {
            return Ok(());
        }
        let next = self.auth.borrow_and_update().clone();
        let transition = self.session.classify(&next);
        if transition.leaves_principal() {
            self.teardown();
        }
        self.session.apply(next);

        match transition {
            Transition::SignedIn(principal) | Transition::Switched { to: principal, .. } => {
                self.live.open(self.store.as_ref(), &principal);
                self.ensure_stats(&principal).await;
            }
            Transition::Refreshed(principal) => {
                self.ensure_stats(&principal).await;
            }
            Transition::SignedOut(principal) => {
                info!(uid = %principal.uid, "session cleared");
            }
            Transition::Unchanged => {}
        }
        Ok(())
    }

    /// A failed stats write leaves a warning and is retried on the next tick.
    async fn ensure_stats(&mut self, principal: &Principal) {
        match ensure_stats_record(self.store.as_ref(), principal).await {
            Ok(()) => self.stats_error = None,
            Err(err) => {
                warn!(uid = %principal.uid, "could not prepare stats record: {err}");
                self.stats_error = Some(format!("Could not save your statistics record: {err}"));
            }
        }
    }

    fn teardown(&mut self) {
        let halted = self.timers.halt_all();
        self.live.close();
        self.alert_guard.clear();
        self.alerts.clear();
        self.alert_error = None;
        self.stats_error = None;
        self.pending_reset = None;
        info!(halted_timers = halted, "session torn down");
    }

    /// Stops every timer and closes every subscription.
    pub fn shutdown(&mut self) {
        self.teardown();
    }

    /// Clock tick: pulls fresh snapshots, re-partitions and fires alerts for
    /// tasks that just became active.
    pub async fn tick(&mut self, now: DateTime<Local>) -> Result<Partition, AppError> {
        self.sync_auth().await?;
        self.live.sync();
        let now = now.with_timezone(&Utc);
        let partition = partition(self.live.tasks(), now);

        let Some(principal) = self.session.principal().cloned() else {
            return Ok(partition);
        };
        if self.stats_error.is_some() {
            self.ensure_stats(&principal).await;
        }
        for task in self.alert_guard.take_due(&partition) {
            info!(task = %task.id, title = %task.title, "task is now active");
            self.alerts.push(Alert {
                task_id: task.id.clone(),
                title: task.title.clone(),
                at: now,
            });
            match self.dispatcher.mark_alerted(&principal, &task.id).await {
                Ok(()) => self.alert_error = None,
                Err(err) => {
                    warn!("could not record alert for {}: {err}", task.id);
                    self.alert_error = Some(err.to_string());
                }
            }
            self.live.patch_task(&task.id, |task| task.alerted = true);
        }
        Ok(partition)
    }

    pub async fn task_view(&mut self, now: DateTime<Local>) -> Result<TaskView, AppError> {
        self.session.require()?;
        let Partition {
            active,
            upcoming,
            completed,
        } = self.tick(now).await?;
        let mut warnings = self.live.warnings();
        warnings.extend(self.stats_error.clone());
        warnings.extend(self.alert_error.clone());

        Ok(TaskView {
            now: now.with_timezone(&Utc),
            active,
            upcoming,
            completed,
            timers: self.timers.view(now.with_timezone(&Utc)),
            warnings,
        })
    }

    pub async fn add_task(&mut self, title: &str, start: &str, hours: f64) -> Result<Task, AppError> {
        let principal = self.session.require()?.clone();
        let task = self
            .dispatcher
            .add_task(&principal, title, start, hours, &Local)
            .await?;
        self.live.sync();
        Ok(task)
    }

    pub async fn toggle_timer(
        &mut self,
        task_id: &str,
        now: DateTime<Local>,
    ) -> Result<TimerView, AppError> {
        let principal = self.session.require()?.clone();
        let task = self.known_task(task_id).await?;
        if task.completed {
            return Err(AppError::AlreadyCompleted(task.id));
        }

        let now = now.with_timezone(&Utc);
        match self.timers.toggle(task_id, task.elapsed_seconds, now) {
            Toggle::Started { resumed_from } => {
                info!(task = task_id, resumed_from, "timer started");
            }
            Toggle::Stopped { elapsed } => {
                info!(task = task_id, elapsed, "timer stopped");
                self.live
                    .patch_task(task_id, |task| task.elapsed_seconds = Some(elapsed));
                self.dispatcher
                    .save_elapsed(&principal, task_id, elapsed)
                    .await?;
            }
        }

        Ok(TimerView {
            task_id: task_id.to_string(),
            elapsed_seconds: self.timers.elapsed(task_id, now).unwrap_or(0),
            running: self.timers.is_running(task_id),
        })
    }

    pub async fn complete_task(&mut self, task_id: &str, now: DateTime<Local>) -> Result<Task, AppError> {
        let principal = self.session.require()?.clone();
        let task = self.known_task(task_id).await?;
        if task.completed {
            return Err(AppError::AlreadyCompleted(task.id));
        }

        let now = now.with_timezone(&Utc);
        let was_running = self.timers.is_running(task_id);
        let elapsed = self.timers.stop(task_id, now);
        if let Err(err) = self
            .dispatcher
            .complete_task(&principal, &task, elapsed, now)
            .await
        {
            if was_running {
                self.timers.start(task_id, None, now);
            }
            return Err(err);
        }
        self.timers.finish(task_id, now);

        self.live.patch_task(task_id, |task| {
            task.completed = true;
            task.completed_at = Some(now);
            if let Some(elapsed) = elapsed {
                task.elapsed_seconds = Some(elapsed);
            }
        });
        self.live.sync();
        self.known_task(task_id).await
    }

    pub async fn add_penalty(&mut self, now: DateTime<Local>) -> Result<(), AppError> {
        let principal = self.session.require()?.clone();
        self.dispatcher
            .add_penalty(&principal, now.with_timezone(&Utc))
            .await?;
        self.live.sync();
        Ok(())
    }

    pub fn set_day_filter(&mut self, day: Option<NaiveDate>) -> Result<(), AppError> {
        let principal = self.session.require()?.clone();
        self.live.set_day_filter(self.store.as_ref(), &principal, day);
        Ok(())
    }

    pub fn day_filter(&self) -> Option<NaiveDate> {
        self.live.day_filter()
    }

    pub async fn charts(&mut self, period: Period, now: DateTime<Local>) -> Result<ChartSet, AppError> {
        self.sync_auth().await?;
        let principal = self.session.require()?.clone();
        self.live.sync();
        Ok(build_charts_at(
            now,
            self.live.stats(),
            Some(&principal.uid),
            self.live.tasks(),
            period,
        ))
    }

    /// First step of a reset: checks the account and hands out a one-time
    /// confirmation token.
    pub async fn request_reset(&mut self) -> Result<ResetTicket, AppError> {
        let principal = self.session.require()?.clone();
        let task_count = self.dispatcher.reset_scope(&principal).await?;
        let token = Uuid::new_v4().to_string();
        self.pending_reset = Some(token.clone());
        info!(uid = %principal.uid, task_count, "reset requested");
        Ok(ResetTicket { token, task_count })
    }

    pub async fn confirm_reset(&mut self, token: &str, now: DateTime<Local>) -> Result<usize, AppError> {
        let principal = self.session.require()?.clone();
        match self.pending_reset.take() {
            Some(expected) if expected == token => {}
            _ => return Err(AppError::ConfirmationRequired),
        }

        let deleted = self
            .dispatcher
            .reset_all(&principal, now.with_timezone(&Utc))
            .await?;
        self.timers.halt_all();
        self.alert_guard.clear();
        self.live.sync();
        Ok(deleted)
    }

    pub fn drain_alerts(&mut self) -> Vec<Alert> {
        std::mem::take(&mut self.alerts)
    }

    pub fn stats(&mut self) -> &[StatsRecord] {
        self.live.sync();
        self.live.stats()
    }

    /// Cached task, or a point read when the day filter hides it.
    async fn known_task(&mut self, task_id: &str) -> Result<Task, AppError> {
        self.live.sync();
        if let Some(task) = self.live.task(task_id) {
            return Ok(task.clone());
        }

        let principal = self.session.require()?;
        let doc = CollectionRef::tasks(&principal.uid).doc(task_id);
        let found = self.store.get(&principal.uid, &doc).await?;
        let Some(doc) = found else {
            return Err(AppError::NotFound(task_id.to_string()));
        };
        let mut task: Task = doc.decode()?;
        task.id = doc.id;
        Ok(task)
    }
}
