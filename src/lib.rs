//! Chime: task expiry and snooze scheduling engine for a personal
//! reminder app.
//!
//! A task is a reminder with a trigger time; snoozing pushes the trigger
//! forward by accumulating seconds on top of the original timestamp.
//! The engine watches the task collection, promotes at most one due task
//! at a time into a pending slot for the user to resolve, and keeps the
//! date-grouped JSON store on disk in sync with every decision.
//!
//! # Architecture
//!
//! - **Store** ([`store`]): the whole collection as one JSON document,
//!   grouped by effective date, written atomically.
//! - **Engine** ([`engine`]): active-set ordering, expiry promotion,
//!   snooze/cancel arithmetic, task CRUD.
//! - **Runner** ([`runner`]): the poll loop; one spawned task owns the
//!   engine and serializes ticks with user commands.
//! - **Events** ([`events`]): broadcast fan-out of expiries and
//!   collection changes to UI collaborators.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod paths;
pub mod runner;
pub mod store;
pub mod task;

pub use config::{EngineConfig, SnoozePolicy, StoreConfig};
pub use engine::{ExpiryEngine, SnoozeAction};
pub use error::{ChimeError, Result};
pub use events::{ChangeKind, EngineEvent, EventBus};
pub use runner::{EngineCommand, EngineRunner};
pub use store::{TaskGroups, TaskPatch, TaskStore};
pub use task::{Task, TaskDraft};
