//! Core error types for mealnudge operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.
//! Failures are scoped to a single reminder wherever possible; nothing here
//! is fatal to the process.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Core error type for mealnudge operations.
#[derive(Debug, Error)]
pub enum Error {
    // Definition errors
    #[error("invalid reminder: {reason}")]
    InvalidReminder { reason: String },

    #[error("reminder '{id}' not found")]
    ReminderNotFound { id: String },

    // Preference store errors
    #[error("preference store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    // Alarm facility errors
    #[error("alarm registration denied for '{id}': {reason}")]
    AlarmDenied { id: String, reason: String },

    #[error("alarm facility unavailable: {reason}")]
    AlarmUnavailable { reason: String },

    // Runtime errors
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    #[error("channel closed")]
    ChannelClosed,

    #[error("actor not available: {reason}")]
    ActorUnavailable { reason: String },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // Configuration errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("unknown timezone '{name}'")]
    InvalidTimezone { name: String },

    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },
}

impl Error {
    /// Create an invalid reminder error.
    pub fn invalid_reminder(reason: impl Into<String>) -> Self {
        Self::InvalidReminder {
            reason: reason.into(),
        }
    }

    /// Create a reminder not found error.
    pub fn reminder_not_found(id: impl Into<String>) -> Self {
        Self::ReminderNotFound { id: id.into() }
    }

    /// Create a store unavailable error.
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an alarm denied error.
    pub fn alarm_denied(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AlarmDenied {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an alarm unavailable error.
    pub fn alarm_unavailable(reason: impl Into<String>) -> Self {
        Self::AlarmUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Create an actor unavailable error.
    pub fn actor_unavailable(reason: impl Into<String>) -> Self {
        Self::ActorUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an invalid state transition error.
    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid timezone error.
    pub fn invalid_timezone(name: impl Into<String>) -> Self {
        Self::InvalidTimezone { name: name.into() }
    }

    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// Denials, invalid definitions and configuration problems are permanent.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. }
                | Self::AlarmUnavailable { .. }
                | Self::Timeout { .. }
        )
    }
}
