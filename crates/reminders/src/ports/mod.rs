//! Collaborators the engine consumes: the remote preference store and the
//! local one-shot alarm facility.
//!
//! Both are injected as trait objects. In-memory implementations back the
//! tests and the demo driver; `TokioAlarmPort` is a real in-process alarm
//! facility built on tokio timers.

mod alarm;
mod memory;
mod store;
mod tokio_alarm;

pub use alarm::{AlarmPort, AlarmPrecision};
pub use memory::{AlarmOp, InMemoryPreferenceStore, PendingAlarm, RecordingAlarmPort};
pub use store::{PreferenceStore, SnapshotStream};
pub use tokio_alarm::{FiredReceiver, TokioAlarmPort};
