//! Core types for reconciliation passes.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::model::ReminderId;
use crate::ports::AlarmPrecision;

/// Per-reminder scheduling status, kept for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// An alarm is registered.
    Scheduled {
        at: DateTime<Utc>,
        precision: AlarmPrecision,
    },
    /// Registration failed; the previous alarm (if any) is left in place.
    Failed { reason: String },
    /// The definition cannot be scheduled.
    Invalid { reason: String },
    /// One-shot reminder already delivered.
    Terminal,
    /// Paused by the user.
    Disabled,
}

impl ScheduleStatus {
    pub const fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled { .. })
    }

    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Alarm operations the engine issues to converge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileAction {
    /// Cancel-then-register an alarm at `at`.
    Schedule {
        id: ReminderId,
        at: DateTime<Utc>,
        payload: String,
    },
    /// Remove the alarm for `id`.
    Cancel { id: ReminderId },
}

impl ReconcileAction {
    /// Get the reminder ID this action targets.
    pub const fn id(&self) -> &ReminderId {
        match self {
            Self::Schedule { id, .. } | Self::Cancel { id } => id,
        }
    }

    /// Get a description of the action.
    pub fn description(&self) -> String {
        match self {
            Self::Schedule { id, at, .. } => format!("schedule {id} at {at}"),
            Self::Cancel { id } => format!("cancel {id}"),
        }
    }
}

/// An action that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
    pub action: ReconcileAction,
    pub reason: String,
    /// Retrying later may succeed.
    pub transient: bool,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Actions that were applied.
    pub actions_taken: Vec<ReconcileAction>,
    /// Actions that failed.
    pub actions_failed: Vec<ActionFailure>,
    /// Reminders that should have a pending alarm.
    pub desired_count: usize,
    /// Entries in the schedule map after the pass.
    pub scheduled_count: usize,
}

impl ReconcileReport {
    /// Nothing had to change and nothing failed.
    pub fn converged(&self) -> bool {
        self.actions_taken.is_empty() && self.actions_failed.is_empty()
    }

    /// Check if all actions succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.actions_failed.is_empty()
    }

    /// Whether any failure is worth retrying.
    pub fn has_transient_failures(&self) -> bool {
        self.actions_failed.iter().any(|f| f.transient)
    }
}

/// Result of tearing down a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignOutReport {
    /// Ids whose alarms were cancelled.
    pub cancelled: Vec<ReminderId>,
    /// Ids whose cancel failed, with the reason.
    pub failed: Vec<(ReminderId, String)>,
}

/// What the engine did with a fired alarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiredOutcome {
    /// No alarm was held for this id; duplicate or stale delivery.
    Ignored,
    /// One-shot delivered; the fired marker must be persisted.
    MarkFired { id: ReminderId },
    /// Recurring reminder re-armed for its next occurrence.
    Rescheduled(ReconcileReport),
}

/// Platform events that invalidate the alarm facility's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemSignal {
    /// Device rebooted; registered alarms are presumed lost.
    BootCompleted,
    /// The device zone changed.
    TimezoneChanged(Tz),
}
