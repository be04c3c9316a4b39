//! Next-occurrence calculation.
//!
//! Given a reminder, the current instant and a timezone, compute the next
//! instant the reminder should fire. The calculation is pure: it re-resolves
//! the wall-clock time in the zone on every call, so daylight-saving shifts
//! and timezone changes are picked up without caching absolute instants.

use chrono::{
    DateTime, Datelike, Days, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use mealnudge_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::model::{ReminderPreference, Repetition};

/// Days scanned forward from today, inclusive of the same weekday next week.
const SCAN_DAYS: u64 = 7;

/// Longest daylight-saving gap we step over when a wall-clock time does not
/// exist on a given date.
const MAX_GAP_MINUTES: i64 = 180;

/// Outcome of the next-occurrence calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum NextFire {
    /// Fire at this instant.
    At(DateTime<Utc>),
    /// A one-shot reminder that has already fired; it never fires again.
    Terminal,
}

impl NextFire {
    /// The instant, if not terminal.
    pub const fn instant(self) -> Option<DateTime<Utc>> {
        match self {
            Self::At(at) => Some(at),
            Self::Terminal => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminal)
    }
}

/// Compute the next fire instant of `reminder` strictly after `now`.
///
/// # Errors
///
/// Returns `Error::InvalidReminder` if the definition fails validation
/// (time out of range, weekly without days). The caller reports it rather
/// than guessing a day.
pub fn next_fire_instant(
    reminder: &ReminderPreference,
    now: DateTime<Utc>,
    timezone: Tz,
) -> Result<NextFire> {
    reminder.validate()?;
    let time = reminder
        .time_of_day()
        .ok_or_else(|| Error::invalid_reminder("time of day out of range"))?;

    match &reminder.repetition {
        Repetition::Once if reminder.fired => Ok(NextFire::Terminal),
        Repetition::Once | Repetition::Daily => first_after(now, timezone, time, |_| true),
        Repetition::Weekly { days } => {
            first_after(now, timezone, time, |date| days.contains(date.weekday()))
        }
    }
}

/// First date from today (in `timezone`) accepted by `matches` whose
/// wall-clock `time` resolves to an instant strictly after `now`.
fn first_after(
    now: DateTime<Utc>,
    timezone: Tz,
    time: NaiveTime,
    matches: impl Fn(NaiveDate) -> bool,
) -> Result<NextFire> {
    let today = now.with_timezone(&timezone).date_naive();

    (0..=SCAN_DAYS)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter(|date| matches(*date))
        .filter_map(|date| resolve_local(timezone, date.and_time(time)))
        .find(|at| *at > now)
        .map(NextFire::At)
        .ok_or_else(|| Error::invalid_reminder("no occurrence within a week"))
}

/// Map a wall-clock time in `timezone` to a UTC instant.
///
/// Ambiguous times (clocks going back) resolve to the earlier instant.
/// Times inside a gap (clocks going forward) move to the first valid minute
/// after the gap.
pub fn resolve_local(timezone: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match timezone.from_local_datetime(&local) {
        LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => Some(at.with_timezone(&Utc)),
        LocalResult::None => (1..=MAX_GAP_MINUTES)
            .filter_map(|minutes| local.checked_add_signed(chrono::Duration::minutes(minutes)))
            .find_map(|shifted| timezone.from_local_datetime(&shifted).earliest())
            .map(|at| at.with_timezone(&Utc)),
    }
}
