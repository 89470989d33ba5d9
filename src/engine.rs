//! Expiry tracking and snooze arithmetic over the task store.
//!
//! The engine keeps two pieces of in-memory state derived from the store:
//! the Active Task Set (non-cancelled tasks, sorted ascending by effective
//! time) and one Expired-pending slot holding the task whose expiry is
//! awaiting a user decision. A periodic caller drives [`handle_expiry`];
//! user decisions arrive as [`snooze`] / [`cancel`] and the task CRUD
//! operations. Every store mutation is followed by a refresh so the
//! in-memory view never drifts from disk.
//!
//! [`handle_expiry`]: ExpiryEngine::handle_expiry
//! [`snooze`]: ExpiryEngine::snooze
//! [`cancel`]: ExpiryEngine::cancel

use crate::config::{EngineConfig, SnoozePolicy};
use crate::error::{ChimeError, Result};
use crate::events::{ChangeKind, EngineEvent, EventBus};
use crate::store::{TaskPatch, TaskStore};
use crate::task::{self, Task, TaskDraft};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// How far a snooze pushes a task, before overdue time and collision
/// stepping are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnoozeAction {
    /// A quick push, seconds-scale (`SnoozePolicy::short_secs`).
    Short,
    /// Out of the way for hours (`SnoozePolicy::long_secs`).
    Long,
}

/// Expiry state machine over the task store.
#[derive(Debug)]
pub struct ExpiryEngine {
    store: TaskStore,
    policy: SnoozePolicy,
    events: EventBus,
    /// Non-cancelled tasks sorted ascending by effective time, excluding
    /// the pending task.
    active: Vec<Task>,
    /// The task whose expiry is awaiting a snooze/cancel decision.
    expired_pending: Option<Task>,
}

impl ExpiryEngine {
    /// Create an engine over the given store and load the active set.
    pub fn new(store: TaskStore, policy: SnoozePolicy) -> Self {
        let mut engine = Self {
            store,
            policy,
            events: EventBus::new(),
            active: Vec::new(),
            expired_pending: None,
        };
        engine.refresh_active_tasks();
        engine
    }

    /// Create an engine from configuration.
    ///
    /// Prunes stored history past the configured retention before the
    /// first load.
    pub fn from_config(config: &EngineConfig) -> Self {
        let store = TaskStore::from_config(&config.store);
        store.prune_older_than(config.store.retention_days, Utc::now().date_naive());
        Self::new(store, config.snooze.clone())
    }

    /// Open a subscription to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Reload the Active Task Set from the store.
    ///
    /// Excludes cancelled tasks and the task occupying the pending slot.
    /// Sorted ascending by effective time, so the head is the next task
    /// due.
    pub fn refresh_active_tasks(&mut self) {
        let pending_id = self.expired_pending.as_ref().map(|t| t.task_id.clone());
        let mut active: Vec<Task> = self
            .store
            .read_all()
            .into_values()
            .flatten()
            .filter(|t| !t.expired)
            .filter(|t| pending_id.as_deref() != Some(t.task_id.as_str()))
            .collect();
        active.sort_by_key(Task::effective_time);
        self.active = active;
    }

    /// The next task due, if any.
    pub fn current_task(&self) -> Option<&Task> {
        self.active.first()
    }

    /// Returns true when the current task has reached its effective time.
    pub fn is_current_task_due_at(&self, now: DateTime<Utc>) -> bool {
        self.current_task().is_some_and(|t| t.is_due_at(now))
    }

    pub fn is_current_task_due(&self) -> bool {
        self.is_current_task_due_at(Utc::now())
    }

    /// Promote the current task to the pending slot if it is due.
    ///
    /// At most one task is pending at a time: while the slot is occupied
    /// this is a logged no-op, whatever else is due. Publishes
    /// [`EngineEvent::TaskExpired`] and returns the promoted task.
    pub fn handle_expiry_at(&mut self, now: DateTime<Utc>) -> Option<Task> {
        if let Some(pending) = &self.expired_pending {
            warn!(
                "expiry check skipped, task {} already awaiting a decision",
                pending.task_id
            );
            return None;
        }

        let task = match self.current_task() {
            Some(t) if t.is_due_at(now) => t.clone(),
            _ => return None,
        };

        self.expired_pending = Some(task.clone());
        self.refresh_active_tasks();
        info!("task {} expired: {}", task.task_id, task.message);
        self.events.publish(EngineEvent::TaskExpired(task.clone()));
        Some(task)
    }

    pub fn handle_expiry(&mut self) -> Option<Task> {
        self.handle_expiry_at(Utc::now())
    }

    /// Push a task's effective time forward.
    ///
    /// The increment added to the task's accumulated `snooze_time` is
    /// `time_since_expiry + tier + overlap_time`:
    /// - `time_since_expiry`: seconds the task is overdue at `now`,
    ///   floored to `SnoozePolicy::expiry_floor_secs` (0 for a task still
    ///   in the future);
    /// - tier: `short_secs` or `long_secs` per `action`;
    /// - `overlap_time`: collision steps walking the new effective time
    ///   off any other active task's effective time.
    ///
    /// Clears the pending slot when the snoozed task holds it, clears the
    /// task's cancelled flag, and regroups the record when its effective
    /// date changed.
    pub fn snooze_at(&mut self, action: SnoozeAction, task_id: &str, now: DateTime<Utc>) {
        let (prior_key, mut task) = match self.resolve_task(task_id) {
            Ok(found) => found,
            Err(e) => {
                error!("cannot snooze: {e}");
                return;
            }
        };

        let increment = self.snooze_increment(&task, action, now);
        task.snooze_time += increment;
        task.expired = false;

        if self
            .expired_pending
            .as_ref()
            .is_some_and(|p| p.task_id == task.task_id)
        {
            self.expired_pending = None;
        }

        if task.date_key() == prior_key {
            self.store.apply_patch(
                &task.task_id,
                &TaskPatch {
                    snooze_time: Some(task.snooze_time),
                    expired: Some(false),
                    timestamp: None,
                },
            );
        } else {
            self.replace_record(&task, &prior_key);
        }
        self.refresh_active_tasks();
        info!(
            "snoozed task {} by {increment}s to {}",
            task.task_id,
            task.effective_time()
        );
        self.events
            .publish(EngineEvent::TasksChanged(ChangeKind::Snoozed));
    }

    pub fn snooze(&mut self, action: SnoozeAction, task_id: &str) {
        self.snooze_at(action, task_id, Utc::now());
    }

    /// Dismiss a task without rescheduling it.
    ///
    /// The record stays in the store flagged `expired`; it stops being a
    /// candidate for expiry. Safe to repeat for an already-cancelled id.
    pub fn cancel(&mut self, task_id: &str) {
        let (_, task) = match self.resolve_task(task_id) {
            Ok(found) => found,
            Err(e) => {
                error!("cannot cancel: {e}");
                return;
            }
        };

        self.store.apply_patch(
            &task.task_id,
            &TaskPatch {
                expired: Some(true),
                ..TaskPatch::default()
            },
        );
        if self
            .expired_pending
            .as_ref()
            .is_some_and(|p| p.task_id == task.task_id)
        {
            self.expired_pending = None;
        }
        self.refresh_active_tasks();
        info!("cancelled task {}: {}", task.task_id, task.message);
        self.events
            .publish(EngineEvent::TasksChanged(ChangeKind::Cancelled));
    }

    /// Drop the pending slot without recording a decision.
    ///
    /// The abandoned task rejoins the Active Task Set and will expire
    /// again on a later check.
    pub fn clear_expired_pending(&mut self) {
        if let Some(task) = self.expired_pending.take() {
            debug!("cleared pending task {}", task.task_id);
            self.refresh_active_tasks();
        }
    }

    /// Create and persist a new task from user input.
    ///
    /// The draft timestamp is truncated to the whole minute; user-picked
    /// times are minute-granular.
    pub fn add_task(&mut self, draft: TaskDraft) -> Task {
        let task = Task::from_draft(draft);
        self.store.add(&task);
        self.refresh_active_tasks();
        info!("added task {} due {}", task.task_id, task.effective_time());
        self.events
            .publish(EngineEvent::TasksChanged(ChangeKind::Added));
        task
    }

    /// Overwrite a task's user-editable fields.
    ///
    /// Resets accumulated snooze and recomputes the cancelled flag from
    /// the new timestamp: anything at or before one second past the
    /// current whole minute counts as already passed. Moves the record
    /// between date groups when the effective date changed. Unknown id is
    /// a logged no-op.
    pub fn update_task_at(&mut self, task_id: &str, draft: TaskDraft, now: DateTime<Utc>) {
        let (prior_key, mut task) = match self.resolve_task(task_id) {
            Ok(found) => found,
            Err(e) => {
                error!("cannot update: {e}");
                return;
            }
        };

        task.message = draft.message;
        task.timestamp = draft.timestamp;
        task.alarm_name = draft.alarm_name;
        task.vibrate = draft.vibrate;
        task.keep_alarming = draft.keep_alarming;
        task.snooze_time = 0;
        let grace = task::truncate_to_minute(now) + Duration::seconds(1);
        task.expired = task.timestamp <= grace;

        if self
            .expired_pending
            .as_ref()
            .is_some_and(|p| p.task_id == task.task_id)
        {
            self.expired_pending = None;
        }

        self.replace_record(&task, &prior_key);
        self.refresh_active_tasks();
        info!("updated task {}: {}", task.task_id, task.message);
        self.events
            .publish(EngineEvent::TasksChanged(ChangeKind::Updated));
    }

    pub fn update_task(&mut self, task_id: &str, draft: TaskDraft) {
        self.update_task_at(task_id, draft, Utc::now());
    }

    /// Remove a task record entirely.
    ///
    /// Unlike [`cancel`], no history is retained. Unknown id is a logged
    /// no-op.
    ///
    /// [`cancel`]: ExpiryEngine::cancel
    pub fn delete_task(&mut self, task_id: &str) {
        let (prior_key, task) = match self.resolve_task(task_id) {
            Ok(found) => found,
            Err(e) => {
                error!("cannot delete: {e}");
                return;
            }
        };

        self.store.remove(&task, Some(&prior_key));
        if self
            .expired_pending
            .as_ref()
            .is_some_and(|p| p.task_id == task.task_id)
        {
            self.expired_pending = None;
        }
        self.refresh_active_tasks();
        info!("deleted task {}: {}", task.task_id, task.message);
        self.events
            .publish(EngineEvent::TasksChanged(ChangeKind::Deleted));
    }

    /// Look up a task by id: the pending slot first, then the active set.
    pub fn task_by_id(&self, task_id: &str) -> Option<&Task> {
        self.expired_pending
            .as_ref()
            .filter(|t| t.task_id == task_id)
            .or_else(|| self.active.iter().find(|t| t.task_id == task_id))
    }

    /// True when another task (active or pending) already triggers in the
    /// same calendar minute.
    ///
    /// Advisory, for warning the user before they create a clashing task.
    /// Snooze arithmetic resolves exact collisions on its own either way.
    pub fn minute_taken(&self, when: DateTime<Utc>, exclude_id: Option<&str>) -> bool {
        let minute = task::truncate_to_minute(when);
        self.active
            .iter()
            .chain(self.expired_pending.as_ref())
            .filter(|t| exclude_id != Some(t.task_id.as_str()))
            .any(|t| task::truncate_to_minute(t.effective_time()) == minute)
    }

    /// Active tasks sorted ascending by effective time.
    pub fn active_tasks(&self) -> &[Task] {
        &self.active
    }

    /// The task currently awaiting a snooze/cancel decision.
    pub fn expired_pending(&self) -> Option<&Task> {
        self.expired_pending.as_ref()
    }

    /// Find the task an id refers to and the date key it is stored under.
    ///
    /// Priority: the pending task, then the active set, then a full store
    /// scan. The store scan covers ids arriving from a stale notification
    /// for a task no longer held in memory (cancelled included).
    fn resolve_task(&self, task_id: &str) -> Result<(String, Task)> {
        if let Some(task) = self
            .expired_pending
            .as_ref()
            .filter(|t| t.task_id == task_id)
        {
            return Ok((task.date_key(), task.clone()));
        }
        if let Some(task) = self.active.iter().find(|t| t.task_id == task_id) {
            return Ok((task.date_key(), task.clone()));
        }
        self.store
            .find(task_id)
            .ok_or_else(|| ChimeError::Engine(format!("unknown task {task_id}")))
    }

    /// Seconds one snooze adds to `snooze_time`.
    fn snooze_increment(&self, task: &Task, action: SnoozeAction, now: DateTime<Utc>) -> i64 {
        let time_since_expiry = {
            let overdue = (now - task.effective_time()).num_seconds();
            if overdue > 0 {
                // Floored, not rounded: repeated snoozes stay stable under
                // small clock jitter.
                let floor = self.policy.expiry_floor_secs.max(1);
                overdue - overdue % floor
            } else {
                0
            }
        };
        let snooze_seconds = match action {
            SnoozeAction::Short => self.policy.short_secs,
            SnoozeAction::Long => self.policy.long_secs,
        };

        let step = self.policy.collision_step_secs.max(1);
        let mut candidate = task.effective_time().timestamp() + time_since_expiry + snooze_seconds;
        let mut overlap_time = 0;
        while self.collides(candidate, &task.task_id) {
            candidate += step;
            overlap_time += step;
        }

        time_since_expiry + snooze_seconds + overlap_time
    }

    /// True when any other active task's effective time is exactly `at`
    /// (epoch seconds).
    fn collides(&self, at: i64, exclude_id: &str) -> bool {
        self.active
            .iter()
            .any(|t| t.task_id != exclude_id && t.effective_time().timestamp() == at)
    }

    /// Re-store `task` under its current date key, dropping the copy held
    /// under `prior_key`, in one write.
    fn replace_record(&self, task: &Task, prior_key: &str) {
        let mut groups = self.store.read_all();
        match groups.get_mut(prior_key) {
            Some(list) => {
                list.retain(|t| t.task_id != task.task_id);
                if list.is_empty() {
                    groups.remove(prior_key);
                }
            }
            None => error!(
                "date group {prior_key} not found moving task {}",
                task.task_id
            ),
        }
        groups.entry(task.date_key()).or_default().push(task.clone());
        self.store.write_all(&groups);
        debug!(
            "stored task {} under {}, was {prior_key}",
            task.task_id,
            task.date_key()
        );
    }
}
