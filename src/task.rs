//! Task entity and effective-time arithmetic.
//!
//! A task's *effective time* is `timestamp + snooze_time` seconds. Every
//! due/ordering/collision decision in the engine uses effective time, never
//! the raw timestamp. The calendar date of the effective time (ISO
//! `YYYY-MM-DD`) is the *date key* tasks are grouped under in the store.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Date header format, e.g. `Thursday 21 Mar`.
const HEADER_DATE_FORMAT: &str = "%A %d %b";

/// Time-of-day format, e.g. `14:30`.
const TIME_FORMAT: &str = "%H:%M";

/// A single reminder record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque unique identifier, fixed at creation.
    pub task_id: String,
    /// Free-form reminder text.
    pub message: String,
    /// Base trigger time. Set at creation/edit, never mutated by snoozing.
    pub timestamp: DateTime<Utc>,
    /// Audio asset reference played on expiry (None = silent).
    pub alarm_name: Option<String>,
    /// Whether the device vibrates on expiry.
    pub vibrate: bool,
    /// Whether the alarm repeats until dismissed instead of firing once.
    pub keep_alarming: bool,
    /// True once the user has dismissed (cancelled) the task.
    pub expired: bool,
    /// Accumulated seconds added to `timestamp` by snoozing.
    #[serde(default)]
    pub snooze_time: i64,
}

/// User-supplied fields for creating or editing a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    /// Free-form reminder text.
    pub message: String,
    /// Requested trigger time.
    pub timestamp: DateTime<Utc>,
    /// Audio asset reference (None = silent).
    pub alarm_name: Option<String>,
    /// Whether the device vibrates on expiry.
    pub vibrate: bool,
    /// Whether the alarm repeats until dismissed.
    pub keep_alarming: bool,
}

impl Task {
    /// Build a new task from user input.
    ///
    /// Generates a fresh id, truncates the trigger time to the whole
    /// minute (user-picked times are minute-granular) and starts the task
    /// non-expired with no accumulated snooze.
    #[must_use]
    pub fn from_draft(draft: TaskDraft) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            message: draft.message,
            timestamp: truncate_to_minute(draft.timestamp),
            alarm_name: draft.alarm_name,
            vibrate: draft.vibrate,
            keep_alarming: draft.keep_alarming,
            expired: false,
            snooze_time: 0,
        }
    }

    /// The instant this task is due: `timestamp + snooze_time` seconds.
    #[must_use]
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.timestamp + Duration::seconds(self.snooze_time)
    }

    /// Date-group key for the store: `YYYY-MM-DD` of the effective time.
    #[must_use]
    pub fn date_key(&self) -> String {
        self.effective_time().date_naive().to_string()
    }

    /// Returns true when the task has reached its effective time.
    #[must_use]
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.effective_time()
    }

    /// Header date of the effective time, e.g. `Thursday 21 Mar`.
    #[must_use]
    pub fn format_header_date(&self) -> String {
        self.effective_time().format(HEADER_DATE_FORMAT).to_string()
    }

    /// Time of day of the effective time, e.g. `14:30`.
    #[must_use]
    pub fn format_time(&self) -> String {
        self.effective_time().format(TIME_FORMAT).to_string()
    }

    /// Accumulated snooze as display text, e.g. `+ 1m 30s`.
    ///
    /// Empty when the task has not been snoozed.
    #[must_use]
    pub fn format_snooze(&self) -> String {
        if self.snooze_time <= 0 {
            return String::new();
        }
        let hours = self.snooze_time / 3600;
        let mins = self.snooze_time % 3600 / 60;
        let secs = self.snooze_time % 60;

        let mut parts = Vec::new();
        if hours > 0 {
            parts.push(format!("{hours}h"));
        }
        if mins > 0 {
            parts.push(format!("{mins}m"));
        }
        if secs > 0 {
            parts.push(format!("{secs}s"));
        }
        format!("+ {}", parts.join(" "))
    }
}

/// Drop the seconds and sub-second part of a timestamp.
pub(crate) fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}
