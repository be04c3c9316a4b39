//! User-facing mutations of reminder preferences.
//!
//! Writes only go to the store. The engine learns about them from the next
//! snapshot, like any other change.

use std::sync::Arc;
use std::time::Duration;

use mealnudge_core::{Error, Result};
use tracing::info;

use crate::config::EngineConfig;
use crate::model::{ReminderFields, ReminderId, ReminderPreference, Repetition, UserId};
use crate::ports::PreferenceStore;
use crate::retry::with_timeout;

/// Validating front door to one user's reminders.
pub struct ReminderService {
    store: Arc<dyn PreferenceStore>,
    user_id: UserId,
    timeout: Duration,
}

impl ReminderService {
    pub fn new(store: Arc<dyn PreferenceStore>, user_id: UserId, config: &EngineConfig) -> Self {
        Self {
            store,
            user_id,
            timeout: config.store_timeout(),
        }
    }

    /// Persist a new reminder.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidReminder` for a draft that already carries an
    /// id, fails validation or has a blank message; store errors otherwise.
    pub async fn add(&self, mut draft: ReminderPreference) -> Result<ReminderId> {
        if !draft.id.is_empty() {
            return Err(Error::invalid_reminder(format!(
                "new reminder already has id {}",
                draft.id
            )));
        }
        draft.validate()?;
        check_message(&draft.message)?;
        draft.fired = false;

        let id = with_timeout(
            "store create",
            self.timeout,
            self.store.create(&self.user_id, draft),
        )
        .await?;
        info!(user_id = %self.user_id, reminder_id = %id, "Reminder added");
        Ok(id)
    }

    /// Apply a partial edit.
    ///
    /// Changing when a one-shot fires makes it eligible again.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidReminder` for out-of-range fields, an empty
    /// weekly day set or a blank message, `Error::ReminderNotFound` for an
    /// unknown id, and store errors otherwise.
    pub async fn edit(&self, id: &ReminderId, mut fields: ReminderFields) -> Result<()> {
        check_fields(&fields)?;
        if fields.is_empty() {
            return Ok(());
        }
        if fields.changes_timing() && fields.fired.is_none() {
            fields.fired = Some(false);
        }
        self.update(id, fields).await?;
        info!(user_id = %self.user_id, reminder_id = %id, "Reminder edited");
        Ok(())
    }

    /// Remove a reminder. Unknown ids are fine.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub async fn delete(&self, id: &ReminderId) -> Result<()> {
        with_timeout(
            "store delete",
            self.timeout,
            self.store.delete(&self.user_id, id),
        )
        .await?;
        info!(user_id = %self.user_id, reminder_id = %id, "Reminder deleted");
        Ok(())
    }

    /// Pause or resume a reminder.
    ///
    /// Resuming clears the fired marker, so a delivered one-shot is armed
    /// again for the next occurrence of its time of day.
    ///
    /// # Errors
    ///
    /// Returns `Error::ReminderNotFound` for an unknown id and store errors
    /// otherwise.
    pub async fn set_enabled(&self, id: &ReminderId, enabled: bool) -> Result<()> {
        let fields = ReminderFields {
            enabled: Some(enabled),
            fired: enabled.then_some(false),
            ..ReminderFields::default()
        };
        self.update(id, fields).await?;
        info!(user_id = %self.user_id, reminder_id = %id, enabled, "Reminder toggled");
        Ok(())
    }

    async fn update(&self, id: &ReminderId, fields: ReminderFields) -> Result<()> {
        with_timeout(
            "store update",
            self.timeout,
            self.store.update(&self.user_id, id, fields),
        )
        .await
    }
}

fn check_message(message: &str) -> Result<()> {
    if message.trim().is_empty() {
        return Err(Error::invalid_reminder("message is blank"));
    }
    Ok(())
}

fn check_fields(fields: &ReminderFields) -> Result<()> {
    if let Some(hour) = fields.hour.filter(|h| *h > 23) {
        return Err(Error::invalid_reminder(format!("hour {hour} out of range 0-23")));
    }
    if let Some(minute) = fields.minute.filter(|m| *m > 59) {
        return Err(Error::invalid_reminder(format!(
            "minute {minute} out of range 0-59"
        )));
    }
    if let Some(Repetition::Weekly { days }) = &fields.repetition {
        if days.is_empty() {
            return Err(Error::invalid_reminder("weekly reminder has no days"));
        }
    }
    fields.message.as_deref().map_or(Ok(()), check_message)
}
