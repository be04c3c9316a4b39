//! Messages for the engine actor.
//!
//! Design principles:
//! - Commands are fire-and-forget (`send_message`)
//! - Queries return responses (`call`)
//! - Failures are reported through state and logs, never as actor crashes

use ractor::RpcReplyPort;

use crate::engine::EngineSnapshot;
use crate::model::{ReminderId, ReminderPreference};
use crate::types::{ScheduleStatus, SignOutReport, SystemSignal};

/// Everything the engine reacts to, in one ordered mailbox.
#[derive(Debug)]
pub enum EngineMessage {
    // ═══════════════════════════════════════════════════════════════════════
    // COMMANDS
    // ═══════════════════════════════════════════════════════════════════════
    /// A full listing from the preference store.
    Snapshot {
        reminders: Vec<ReminderPreference>,
    },

    /// The alarm facility delivered the alarm for `id`.
    Fired { id: ReminderId },

    /// Boot completed or timezone changed.
    Signal(SystemSignal),

    /// Re-run a pass after transient alarm failures.
    RetryReconcile { attempt: u32 },

    /// Retry persisting the fired marker of a one-shot.
    RetryMarkFired { id: ReminderId, attempt: u32 },

    /// Cancel every alarm, clear state, reply, then stop.
    SignOut { reply: RpcReplyPort<SignOutReport> },

    // ═══════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════
    /// Copy of the schedule map and statuses.
    GetSchedule { reply: RpcReplyPort<EngineSnapshot> },

    /// Status of one reminder.
    GetStatus {
        id: ReminderId,
        reply: RpcReplyPort<Option<ScheduleStatus>>,
    },
}
