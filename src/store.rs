//! Date-keyed JSON persistence for tasks.
//!
//! The whole collection lives in one JSON document mapping date keys
//! (`YYYY-MM-DD` of each task's effective time) to lists of task records.
//! There is no partial read or locking; the store is written whole, via a
//! temp file + rename so readers never observe a half-written document.
//!
//! Every public operation absorbs expected failures: I/O errors are logged
//! and leave the store unchanged, invalid content is logged and replaced
//! with an empty store (self-healing). Callers always get a usable value.

use crate::config::StoreConfig;
use crate::error::{ChimeError, Result};
use crate::task::Task;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Tasks grouped under their date key, sorted by key.
pub type TaskGroups = BTreeMap<String, Vec<Task>>;

/// Field-level update applied to a stored task record in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    /// New base trigger time.
    pub timestamp: Option<DateTime<Utc>>,
    /// New accumulated snooze seconds.
    pub snooze_time: Option<i64>,
    /// New dismissed state.
    pub expired: Option<bool>,
}

/// Durable storage for the full task collection.
#[derive(Debug, Clone)]
pub struct TaskStore {
    /// Backing JSON file.
    path: PathBuf,
    /// Pause after each write, for external readers that poll the file.
    settle_delay_ms: u64,
}

impl TaskStore {
    /// Create a store backed by the given file.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            settle_delay_ms: 0,
        }
    }

    /// Create a store from configuration (path default + settle delay).
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            path: config.resolved_path(),
            settle_delay_ms: config.settle_delay_ms,
        }
    }

    /// Override the post-write settle delay in ms.
    pub fn with_settle_delay_ms(mut self, delay_ms: u64) -> Self {
        self.settle_delay_ms = delay_ms;
        self
    }

    /// Path of the backing store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full task collection.
    ///
    /// A missing file reads as empty. Invalid content is replaced with an
    /// empty store on disk and reads as empty. An unreadable file reads as
    /// empty without touching disk.
    pub fn read_all(&self) -> TaskGroups {
        match self.load() {
            Ok(groups) => groups,
            Err(ChimeError::Store(e)) => {
                warn!("task store invalid, resetting to empty: {e}");
                let empty = TaskGroups::new();
                self.write_all(&empty);
                empty
            }
            Err(e) => {
                error!("cannot read task store: {e}");
                TaskGroups::new()
            }
        }
    }

    /// Overwrite the full task collection.
    ///
    /// On failure the error is logged and the caller's in-memory state
    /// stays authoritative until the next successful write.
    pub fn write_all(&self, groups: &TaskGroups) {
        if let Err(e) = self.persist(groups) {
            error!("cannot persist task store: {e}");
        }
    }

    /// Append a task to its date group, creating the group if absent.
    pub fn add(&self, task: &Task) {
        let mut groups = self.read_all();
        let key = task.date_key();
        groups.entry(key.clone()).or_default().push(task.clone());
        self.write_all(&groups);
        debug!("added task {} to group {key}", task.task_id);
    }

    /// Remove a task from its date group.
    ///
    /// `date_key` names the group to search when the task's effective date
    /// has changed since it was stored; `None` uses the task's current
    /// date key. A group that empties is dropped. A task missing from the
    /// expected group logs an error and leaves the store unchanged.
    pub fn remove(&self, task: &Task, date_key: Option<&str>) {
        let key = date_key.map_or_else(|| task.date_key(), str::to_owned);
        let mut groups = self.read_all();
        let Some(list) = groups.get_mut(&key) else {
            error!("date group {key} not found removing task {}", task.task_id);
            return;
        };
        let before = list.len();
        list.retain(|t| t.task_id != task.task_id);
        if list.len() == before {
            error!("task {} not found in group {key}", task.task_id);
            return;
        }
        if list.is_empty() {
            groups.remove(&key);
        }
        self.write_all(&groups);
        debug!("removed task {} from group {key}", task.task_id);
    }

    /// Merge `patch` into the record with `task_id`, wherever it is stored.
    ///
    /// The record stays in its current date group; moving records between
    /// groups is the engine's job. An unknown id logs an error.
    pub fn apply_patch(&self, task_id: &str, patch: &TaskPatch) {
        let mut groups = self.read_all();
        let Some(record) = groups
            .values_mut()
            .flatten()
            .find(|t| t.task_id == task_id)
        else {
            error!("task {task_id} not found applying patch");
            return;
        };
        if let Some(timestamp) = patch.timestamp {
            record.timestamp = timestamp;
        }
        if let Some(snooze_time) = patch.snooze_time {
            record.snooze_time = snooze_time;
        }
        if let Some(expired) = patch.expired {
            record.expired = expired;
        }
        self.write_all(&groups);
        debug!("patched task {task_id}: {patch:?}");
    }

    /// Drop every date group more than `days` days before `today`.
    pub fn prune_older_than(&self, days: u32, today: NaiveDate) {
        let Some(earliest) = today.checked_sub_days(chrono::Days::new(u64::from(days))) else {
            return;
        };
        let cutoff = earliest.to_string();
        let mut groups = self.read_all();
        let before = groups.len();
        groups.retain(|key, _| key.as_str() >= cutoff.as_str());
        let dropped = before - groups.len();
        if dropped > 0 {
            self.write_all(&groups);
            debug!("pruned {dropped} old task group(s)");
        }
    }

    /// Locate a task anywhere in the store.
    ///
    /// Returns the date key it is currently stored under and a copy of the
    /// record.
    pub fn find(&self, task_id: &str) -> Option<(String, Task)> {
        let groups = self.read_all();
        for (key, tasks) in &groups {
            if let Some(task) = tasks.iter().find(|t| t.task_id == task_id) {
                return Some((key.clone(), task.clone()));
            }
        }
        None
    }

    fn load(&self) -> Result<TaskGroups> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(TaskGroups::new());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content)
            .map_err(|e| ChimeError::Store(format!("cannot parse store: {e}")))
    }

    fn persist(&self, groups: &TaskGroups) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ChimeError::Store(format!("cannot create store dir: {e}")))?;
        }

        let json = serde_json::to_string_pretty(groups)
            .map_err(|e| ChimeError::Store(format!("cannot serialize store: {e}")))?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| ChimeError::Store(format!("cannot write store: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| ChimeError::Store(format!("cannot replace store: {e}")))?;

        if self.settle_delay_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(self.settle_delay_ms));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid RFC 3339 timestamp")
    }

    fn make_task(id: &str, timestamp: &str, snooze_time: i64) -> Task {
        Task {
            task_id: id.to_owned(),
            message: format!("task {id}"),
            timestamp: ts(timestamp),
            alarm_name: None,
            vibrate: false,
            keep_alarming: false,
            expired: false,
            snooze_time,
        }
    }

    fn make_store() -> (tempfile::TempDir, TaskStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::new(dir.path().join("tasks.json"));
        (dir, store)
    }

    #[test]
    fn missing_file_reads_empty_without_reset() {
        let (_dir, store) = make_store();
        assert!(store.read_all().is_empty());
        assert!(!store.path().exists(), "read of a missing file must not write");
    }

    #[test]
    fn corrupt_content_self_heals_to_empty() {
        let (_dir, store) = make_store();
        std::fs::write(store.path(), "this is not json").unwrap();

        assert!(store.read_all().is_empty());

        let healed = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(healed, "{}");
    }

    #[test]
    fn wrong_shape_self_heals_to_empty() {
        let (_dir, store) = make_store();
        std::fs::write(store.path(), "[1, 2, 3]").unwrap();

        assert!(store.read_all().is_empty());
        let healed = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(healed, "{}");
    }

    #[test]
    fn write_read_round_trip_preserves_records() {
        let (_dir, store) = make_store();
        let mut groups = TaskGroups::new();
        groups.insert(
            "2024-01-01".to_owned(),
            vec![
                make_task("a", "2024-01-01T08:00:00Z", 40),
                make_task("b", "2024-01-01T09:00:00Z", 0),
            ],
        );
        groups.insert(
            "2024-01-02".to_owned(),
            vec![make_task("c", "2024-01-02T10:00:00Z", 0)],
        );

        store.write_all(&groups);
        assert_eq!(store.read_all(), groups);
    }

    #[test]
    fn write_leaves_no_temp_file() {
        let (_dir, store) = make_store();
        store.write_all(&TaskGroups::new());
        assert!(store.path().exists());
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn add_creates_group_and_appends() {
        let (_dir, store) = make_store();
        store.add(&make_task("a", "2024-01-01T08:00:00Z", 0));
        store.add(&make_task("b", "2024-01-01T09:00:00Z", 0));
        store.add(&make_task("c", "2024-01-02T08:00:00Z", 0));

        let groups = store.read_all();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["2024-01-01"].len(), 2);
        assert_eq!(groups["2024-01-02"].len(), 1);
    }

    #[test]
    fn add_groups_by_effective_date_not_base_date() {
        let (_dir, store) = make_store();
        // 23:59 + 2 min snooze lands on the next day.
        store.add(&make_task("a", "2024-01-01T23:59:00Z", 120));

        let groups = store.read_all();
        assert!(groups.contains_key("2024-01-02"));
        assert!(!groups.contains_key("2024-01-01"));
    }

    #[test]
    fn remove_drops_group_when_it_empties() {
        let (_dir, store) = make_store();
        let task = make_task("a", "2024-01-01T08:00:00Z", 0);
        store.add(&task);
        store.remove(&task, None);

        assert!(store.read_all().is_empty());
    }

    #[test]
    fn remove_keeps_siblings() {
        let (_dir, store) = make_store();
        let a = make_task("a", "2024-01-01T08:00:00Z", 0);
        let b = make_task("b", "2024-01-01T09:00:00Z", 0);
        store.add(&a);
        store.add(&b);
        store.remove(&a, None);

        let groups = store.read_all();
        assert_eq!(groups["2024-01-01"].len(), 1);
        assert_eq!(groups["2024-01-01"][0].task_id, "b");
    }

    #[test]
    fn remove_with_prior_date_key() {
        let (_dir, store) = make_store();
        let mut task = make_task("a", "2024-01-01T08:00:00Z", 0);
        store.add(&task);

        // Snooze pushed the effective date forward; the record still lives
        // under the old key.
        task.snooze_time = 86_400;
        store.remove(&task, Some("2024-01-01"));

        assert!(store.read_all().is_empty());
    }

    #[test]
    fn remove_unknown_task_leaves_store_unchanged() {
        let (_dir, store) = make_store();
        let a = make_task("a", "2024-01-01T08:00:00Z", 0);
        store.add(&a);

        let ghost = make_task("ghost", "2024-01-01T10:00:00Z", 0);
        store.remove(&ghost, None);

        let groups = store.read_all();
        assert_eq!(groups["2024-01-01"].len(), 1);
    }

    #[test]
    fn apply_patch_merges_fields_in_place() {
        let (_dir, store) = make_store();
        store.add(&make_task("a", "2024-01-01T08:00:00Z", 0));

        store.apply_patch(
            "a",
            &TaskPatch {
                snooze_time: Some(50),
                expired: Some(true),
                timestamp: None,
            },
        );

        let (key, task) = store.find("a").expect("task present");
        // In-place patch: the record stays under its stored key.
        assert_eq!(key, "2024-01-01");
        assert_eq!(task.snooze_time, 50);
        assert!(task.expired);
        assert_eq!(task.timestamp, ts("2024-01-01T08:00:00Z"));
    }

    #[test]
    fn apply_patch_unknown_id_is_noop() {
        let (_dir, store) = make_store();
        store.add(&make_task("a", "2024-01-01T08:00:00Z", 0));
        let before = store.read_all();

        store.apply_patch("ghost", &TaskPatch::default());
        assert_eq!(store.read_all(), before);
    }

    #[test]
    fn prune_drops_only_groups_past_the_cutoff() {
        let (_dir, store) = make_store();
        store.add(&make_task("old", "2024-01-01T08:00:00Z", 0));
        store.add(&make_task("recent", "2024-02-05T08:00:00Z", 0));
        store.add(&make_task("future", "2024-03-01T08:00:00Z", 0));

        let today = NaiveDate::from_ymd_opt(2024, 2, 10).unwrap();
        store.prune_older_than(30, today);

        let groups = store.read_all();
        assert!(!groups.contains_key("2024-01-01"), "40-day-old group pruned");
        assert!(groups.contains_key("2024-02-05"), "5-day-old group kept");
        assert!(groups.contains_key("2024-03-01"), "future group kept");
    }

    #[test]
    fn prune_keeps_group_exactly_at_cutoff() {
        let (_dir, store) = make_store();
        store.add(&make_task("edge", "2024-01-11T08:00:00Z", 0));

        let today = NaiveDate::from_ymd_opt(2024, 2, 10).unwrap();
        store.prune_older_than(30, today);

        assert!(store.read_all().contains_key("2024-01-11"));
    }

    #[test]
    fn find_returns_current_key_and_record() {
        let (_dir, store) = make_store();
        store.add(&make_task("a", "2024-01-01T08:00:00Z", 0));
        store.add(&make_task("b", "2024-01-02T08:00:00Z", 0));

        let (key, task) = store.find("b").expect("task present");
        assert_eq!(key, "2024-01-02");
        assert_eq!(task.task_id, "b");
        assert!(store.find("ghost").is_none());
    }

    #[test]
    fn settle_delay_pauses_after_write() {
        let (_dir, store) = make_store();
        let store = store.with_settle_delay_ms(50);

        let start = std::time::Instant::now();
        store.write_all(&TaskGroups::new());
        assert!(start.elapsed() >= std::time::Duration::from_millis(50));
    }

    #[test]
    fn from_config_uses_configured_path_and_delay() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StoreConfig {
            path: Some(dir.path().join("custom.json")),
            settle_delay_ms: 5,
            retention_days: 30,
        };
        let store = TaskStore::from_config(&config);
        assert_eq!(store.path(), dir.path().join("custom.json"));
        assert_eq!(store.settle_delay_ms, 5);
    }
}
