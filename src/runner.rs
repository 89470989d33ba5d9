//! Engine background loop.
//!
//! Spawns a tokio task that periodically checks the current task for
//! expiry and serializes user commands onto the same loop, so engine
//! state is only ever touched from one place.

use crate::config::EngineConfig;
use crate::engine::{ExpiryEngine, SnoozeAction};
use crate::events::EngineEvent;
use crate::task::TaskDraft;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// Ticks between periodic state dumps at debug level.
const STATE_DUMP_EVERY_TICKS: u64 = 10;

/// User actions serialized onto the engine loop.
#[derive(Debug)]
pub enum EngineCommand {
    /// Push a task forward.
    Snooze {
        action: SnoozeAction,
        task_id: String,
    },
    /// Dismiss a task for good.
    Cancel { task_id: String },
    /// Create a task.
    Add(TaskDraft),
    /// Overwrite a task's user-editable fields.
    Update { task_id: String, draft: TaskDraft },
    /// Remove a task record entirely.
    Delete { task_id: String },
    /// Abandon the pending expiry without a decision.
    ClearPending,
    /// Stop the loop.
    Shutdown,
}

/// Background loop that owns the engine.
///
/// Commands arrive over an unbounded channel and interleave with poll
/// ticks on one task; see the engine for why nothing else may touch it.
pub struct EngineRunner {
    engine: ExpiryEngine,
    poll_interval_ms: u64,
    command_rx: mpsc::UnboundedReceiver<EngineCommand>,
    ticks: u64,
}

impl EngineRunner {
    /// Wrap an engine; returns the runner and its command handle.
    pub fn new(
        engine: ExpiryEngine,
        poll_interval_ms: u64,
    ) -> (Self, mpsc::UnboundedSender<EngineCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let runner = Self {
            engine,
            poll_interval_ms,
            command_rx,
            ticks: 0,
        };
        (runner, command_tx)
    }

    /// Build the engine and runner from configuration.
    pub fn from_config(config: &EngineConfig) -> (Self, mpsc::UnboundedSender<EngineCommand>) {
        Self::new(ExpiryEngine::from_config(config), config.poll_interval_ms)
    }

    /// Open a subscription to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.subscribe()
    }

    /// Start the background loop.
    ///
    /// Runs until a [`EngineCommand::Shutdown`] arrives or every command
    /// handle is dropped.
    pub fn run(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "engine runner started, polling every {} ms",
                self.poll_interval_ms
            );
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(
                self.poll_interval_ms.max(1),
            ));

            loop {
                tokio::select! {
                    _ = interval.tick() => self.tick(),
                    command = self.command_rx.recv() => {
                        let Some(command) = command else {
                            info!("engine command channel closed, stopping");
                            return;
                        };
                        if !self.handle_command(command) {
                            info!("engine runner stopping");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// One poll tick: promote a due task, periodically dump state.
    fn tick(&mut self) {
        self.ticks += 1;
        self.engine.handle_expiry();
        if self.ticks % STATE_DUMP_EVERY_TICKS == 0 {
            self.log_state();
        }
    }

    /// Apply one command to the engine. Returns false to stop the loop.
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        debug!("engine command: {command:?}");
        match command {
            EngineCommand::Snooze { action, task_id } => self.engine.snooze(action, &task_id),
            EngineCommand::Cancel { task_id } => self.engine.cancel(&task_id),
            EngineCommand::Add(draft) => {
                self.engine.add_task(draft);
            }
            EngineCommand::Update { task_id, draft } => self.engine.update_task(&task_id, draft),
            EngineCommand::Delete { task_id } => self.engine.delete_task(&task_id),
            EngineCommand::ClearPending => self.engine.clear_expired_pending(),
            EngineCommand::Shutdown => return false,
        }
        true
    }

    fn log_state(&self) {
        let current = self
            .engine
            .current_task()
            .map_or("none", |t| t.task_id.as_str());
        let pending = self
            .engine
            .expired_pending()
            .map_or("none", |t| t.task_id.as_str());
        debug!(
            "engine state: current={current} pending={pending} active={}",
            self.engine.active_tasks().len()
        );
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::SnoozePolicy;
    use crate::events::ChangeKind;
    use crate::store::TaskStore;
    use crate::task::Task;
    use chrono::{DateTime, Duration, Utc};

    fn make_task(id: &str, timestamp: DateTime<Utc>) -> Task {
        Task {
            task_id: id.to_owned(),
            message: format!("task {id}"),
            timestamp,
            alarm_name: None,
            vibrate: false,
            keep_alarming: false,
            expired: false,
            snooze_time: 0,
        }
    }

    fn make_runner(
        tasks: &[Task],
    ) -> (
        tempfile::TempDir,
        EngineRunner,
        mpsc::UnboundedSender<EngineCommand>,
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::new(dir.path().join("tasks.json"));
        for task in tasks {
            store.add(task);
        }
        let engine = ExpiryEngine::new(store, SnoozePolicy::default());
        let (runner, command_tx) = EngineRunner::new(engine, 10);
        (dir, runner, command_tx)
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<EngineEvent>,
        mut want: impl FnMut(&EngineEvent) -> bool,
    ) -> EngineEvent {
        let found = async {
            loop {
                match events.recv().await {
                    Ok(event) if want(&event) => break event,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), found)
            .await
            .expect("event within timeout")
    }

    #[tokio::test]
    async fn run_promotes_a_due_task() {
        let (_dir, runner, _tx) =
            make_runner(&[make_task("due", Utc::now() - Duration::minutes(1))]);
        let mut events = runner.subscribe();

        let handle = runner.run();

        let event = wait_for(&mut events, |e| matches!(e, EngineEvent::TaskExpired(_))).await;
        assert!(matches!(
            event,
            EngineEvent::TaskExpired(task) if task.task_id == "due"
        ));

        handle.abort();
    }

    #[tokio::test]
    async fn commands_are_processed_on_the_loop() {
        let (_dir, runner, tx) = make_runner(&[]);
        let mut events = runner.subscribe();
        let handle = runner.run();

        tx.send(EngineCommand::Add(TaskDraft {
            message: "from command".to_owned(),
            timestamp: Utc::now() + Duration::hours(1),
            alarm_name: None,
            vibrate: false,
            keep_alarming: false,
        }))
        .expect("runner alive");

        wait_for(&mut events, |e| {
            matches!(e, EngineEvent::TasksChanged(ChangeKind::Added))
        })
        .await;

        handle.abort();
    }

    #[tokio::test]
    async fn snooze_command_resolves_a_pending_expiry() {
        let (dir, runner, tx) = make_runner(&[make_task("due", Utc::now() - Duration::minutes(1))]);
        let mut events = runner.subscribe();
        let handle = runner.run();

        wait_for(&mut events, |e| matches!(e, EngineEvent::TaskExpired(_))).await;
        tx.send(EngineCommand::Snooze {
            action: SnoozeAction::Long,
            task_id: "due".to_owned(),
        })
        .expect("runner alive");
        wait_for(&mut events, |e| {
            matches!(e, EngineEvent::TasksChanged(ChangeKind::Snoozed))
        })
        .await;

        let store = TaskStore::new(dir.path().join("tasks.json"));
        let (_, task) = store.find("due").expect("task persisted");
        assert!(!task.expired);
        assert!(task.snooze_time >= 36_000, "long tier plus overdue time");

        handle.abort();
    }

    #[tokio::test]
    async fn shutdown_command_stops_the_loop() {
        let (_dir, runner, tx) = make_runner(&[]);
        let handle = runner.run();

        tx.send(EngineCommand::Shutdown).expect("runner alive");

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("loop exits")
            .expect("task joins cleanly");
    }

    #[tokio::test]
    async fn dropping_every_command_handle_stops_the_loop() {
        let (_dir, runner, tx) = make_runner(&[]);
        let handle = runner.run();

        drop(tx);

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("loop exits")
            .expect("task joins cleanly");
    }
}
