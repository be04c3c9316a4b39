//! Reminder scheduling engine.
//!
//! Keeps a device's local alarms in step with a user's reminder preferences
//! held in a remote store, following a reconciliation pattern:
//!
//! - **Desired state**: the latest store snapshot, resolved to fire instants
//! - **Actual state**: the alarms the engine has registered
//! - **Diff**: compare the two per reminder id
//! - **Actions**: cancel-then-schedule or cancel until they agree
//!
//! # Key Concepts
//!
//! ## Occurrences
//!
//! `occurrence::next_fire_instant` turns a reminder's local time of day and
//! repetition into the next UTC instant strictly after "now", re-resolving
//! the timezone on every call.
//!
//! ## Engine
//!
//! `ReconciliationEngine` holds the `scheduled` map. The engine actor feeds it
//! snapshots, alarm firings and boot/timezone signals through one mailbox.
//!
//! ## Lifecycle
//!
//! `LifecycleController` spawns an engine on sign-in, wires the user's
//! snapshot stream into it and tears everything down on sign-out.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mealnudge_reminders::{
//!     EngineConfig, EnginePorts, InMemoryPreferenceStore, LifecycleController,
//!     SystemClock, TokioAlarmPort, UserId,
//! };
//!
//! #[tokio::main]
//! async fn main() -> mealnudge_core::Result<()> {
//!     let (alarms, mut fired) = TokioAlarmPort::new();
//!     let ports = EnginePorts {
//!         store: Arc::new(InMemoryPreferenceStore::new()),
//!         alarms: Arc::new(alarms),
//!         clock: Arc::new(SystemClock),
//!     };
//!     let controller = LifecycleController::new(ports, EngineConfig::default())?;
//!     controller.sign_in(UserId::new("user-1")).await?;
//!
//!     while let Some(id) = fired.recv().await {
//!         controller.on_alarm_fired(id).await?;
//!     }
//!     controller.sign_out().await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod actors;
pub mod clock;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod model;
pub mod occurrence;
pub mod ports;
pub mod retry;
pub mod service;
pub mod types;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, parse_timezone};
pub use engine::{EnginePorts, EngineSnapshot, ReconciliationEngine, Registrations};
pub use lifecycle::{LifecycleController, LifecycleState};
pub use model::{DaySet, ReminderFields, ReminderId, ReminderPreference, Repetition, UserId};
pub use occurrence::{NextFire, next_fire_instant};
pub use ports::{
    AlarmOp, AlarmPort, AlarmPrecision, FiredReceiver, InMemoryPreferenceStore, PendingAlarm,
    PreferenceStore, RecordingAlarmPort, SnapshotStream, TokioAlarmPort,
};
pub use service::ReminderService;
pub use types::{
    ActionFailure, FiredOutcome, ReconcileAction, ReconcileReport, ScheduleStatus, SignOutReport,
    SystemSignal,
};
