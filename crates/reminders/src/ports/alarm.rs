//! Local one-shot alarm facility interface.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mealnudge_core::Result;
use serde::{Deserialize, Serialize};

use crate::model::ReminderId;

/// How precisely the platform should honour the fire instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmPrecision {
    Exact,
    /// Best effort; the platform may batch or delay delivery.
    Inexact,
}

impl fmt::Display for AlarmPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Inexact => write!(f, "inexact"),
        }
    }
}

/// Registers and cancels wake-ups keyed by reminder id.
///
/// A registration fires at most once. Registrations are not guaranteed to
/// survive a device reboot. Firings are delivered out of band to the engine
/// (see `TokioAlarmPort` for how an implementation hands them over).
#[async_trait]
pub trait AlarmPort: Send + Sync {
    /// Register a wake-up for `id` at `at` carrying `payload`.
    ///
    /// Returns `Error::AlarmDenied` when the platform refuses this precision
    /// and `Error::AlarmUnavailable` for temporary refusals.
    async fn schedule(
        &self,
        id: &ReminderId,
        at: DateTime<Utc>,
        payload: &str,
        precision: AlarmPrecision,
    ) -> Result<()>;

    /// Remove any pending wake-up for `id`. Idempotent.
    async fn cancel(&self, id: &ReminderId) -> Result<()>;

    /// Whether `AlarmPrecision::Inexact` registrations are available.
    fn supports_inexact(&self) -> bool {
        false
    }
}
