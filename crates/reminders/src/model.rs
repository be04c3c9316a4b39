//! Reminder data model.
//!
//! `ReminderPreference` is the only persistent entity. The store owns its
//! content; the engine only reads it from snapshots.

use std::fmt;

use chrono::{NaiveTime, Weekday};
use itertools::Itertools;
use mealnudge_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Store-assigned reminder identifier. Empty until the first create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReminderId(String);

impl ReminderId {
    /// Create an identifier from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True before the store has assigned an id.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ReminderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ReminderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identity of the signed-in user whose reminders are being synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of weekdays, one bit per day starting at Monday.
///
/// An empty set is representable so that invalid records coming from the
/// store can be reported instead of failing deserialization of the whole
/// snapshot.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Weekday>", into = "Vec<Weekday>")]
pub struct DaySet(u8);

impl DaySet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Add a day, returning the new set.
    #[must_use]
    pub fn with(self, day: Weekday) -> Self {
        Self(self.0 | Self::bit(day))
    }

    /// Check membership.
    pub fn contains(self, day: Weekday) -> bool {
        self.0 & Self::bit(day) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of days in the set.
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Days in Monday-first order.
    pub fn days(self) -> Vec<Weekday> {
        ALL_WEEKDAYS
            .iter()
            .copied()
            .filter(|day| self.contains(*day))
            .collect()
    }

    fn bit(day: Weekday) -> u8 {
        1 << day.num_days_from_monday()
    }
}

const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

impl FromIterator<Weekday> for DaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl From<Vec<Weekday>> for DaySet {
    fn from(days: Vec<Weekday>) -> Self {
        days.into_iter().collect()
    }
}

impl From<DaySet> for Vec<Weekday> {
    fn from(set: DaySet) -> Self {
        set.days()
    }
}

impl fmt::Debug for DaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.days()).finish()
    }
}

impl fmt::Display for DaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.days().iter().join(","))
    }
}

/// How often a reminder fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Repetition {
    /// Fires once at the next occurrence of the time of day.
    Once,
    /// Fires every day.
    Daily,
    /// Fires on the listed weekdays.
    Weekly { days: DaySet },
}

impl Repetition {
    /// Weekly repetition on the given days.
    pub fn weekly(days: impl IntoIterator<Item = Weekday>) -> Self {
        Self::Weekly {
            days: days.into_iter().collect(),
        }
    }

    pub const fn is_once(&self) -> bool {
        matches!(self, Self::Once)
    }
}

impl fmt::Display for Repetition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once => write!(f, "once"),
            Self::Daily => write!(f, "daily"),
            Self::Weekly { days } => write!(f, "weekly({days})"),
        }
    }
}

/// A user-defined meal-logging reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPreference {
    #[serde(default)]
    pub id: ReminderId,
    /// Local wall-clock hour, 0-23.
    pub hour: u8,
    /// Local wall-clock minute, 0-59.
    pub minute: u8,
    pub repetition: Repetition,
    /// Delivered verbatim at fire time.
    pub message: String,
    pub enabled: bool,
    /// Set once a one-shot reminder has been delivered.
    #[serde(default)]
    pub fired: bool,
    /// Opaque classification tag (breakfast, water, ...).
    #[serde(default)]
    pub category: String,
}

impl ReminderPreference {
    /// Create an enabled, unpersisted reminder.
    pub fn new(hour: u8, minute: u8, repetition: Repetition, message: impl Into<String>) -> Self {
        Self {
            id: ReminderId::default(),
            hour,
            minute,
            repetition,
            message: message.into(),
            enabled: true,
            fired: false,
            category: String::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<ReminderId>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_fired(mut self, fired: bool) -> Self {
        self.fired = fired;
        self
    }

    /// Time of day, if hour and minute are in range.
    pub fn time_of_day(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
    }

    /// A one-shot reminder that has already been delivered.
    pub const fn is_terminal(&self) -> bool {
        self.repetition.is_once() && self.fired
    }

    /// Check that the definition can be scheduled.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidReminder` for an out-of-range time or a weekly
    /// reminder without days.
    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 {
            return Err(Error::invalid_reminder(format!(
                "hour {} out of range 0-23",
                self.hour
            )));
        }
        if self.minute > 59 {
            return Err(Error::invalid_reminder(format!(
                "minute {} out of range 0-59",
                self.minute
            )));
        }
        if let Repetition::Weekly { days } = &self.repetition {
            if days.is_empty() {
                return Err(Error::invalid_reminder("weekly reminder has no days"));
            }
        }
        Ok(())
    }
}

/// Partial update of a stored reminder. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition: Option<Repetition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fired: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl ReminderFields {
    /// Fields written after a one-shot reminder is delivered.
    pub const fn mark_fired() -> Self {
        Self {
            hour: None,
            minute: None,
            repetition: None,
            message: None,
            enabled: Some(false),
            fired: Some(true),
            category: None,
        }
    }

    /// Whether the update changes when the reminder fires.
    pub const fn changes_timing(&self) -> bool {
        self.hour.is_some() || self.minute.is_some() || self.repetition.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the update to a stored reminder.
    pub fn apply(&self, current: &ReminderPreference) -> ReminderPreference {
        ReminderPreference {
            id: current.id.clone(),
            hour: self.hour.unwrap_or(current.hour),
            minute: self.minute.unwrap_or(current.minute),
            repetition: self
                .repetition
                .clone()
                .unwrap_or_else(|| current.repetition.clone()),
            message: self
                .message
                .clone()
                .unwrap_or_else(|| current.message.clone()),
            enabled: self.enabled.unwrap_or(current.enabled),
            fired: self.fired.unwrap_or(current.fired),
            category: self
                .category
                .clone()
                .unwrap_or_else(|| current.category.clone()),
        }
    }
}
