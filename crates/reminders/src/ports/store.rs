//! Remote preference store interface.

use async_trait::async_trait;
use futures::stream::BoxStream;
use mealnudge_core::Result;

use crate::model::{ReminderFields, ReminderId, ReminderPreference, UserId};

/// Stream of full snapshots. Each item lists every reminder of the user.
pub type SnapshotStream = BoxStream<'static, Vec<ReminderPreference>>;

/// Storage interface for a user's reminder preferences.
///
/// Snapshots are full listings, not diffs, and their order carries no
/// meaning. Delivery is not ordered relative to the caller's own writes.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Subscribe to the user's reminders.
    ///
    /// The stream yields the current listing first and then one listing per
    /// change. It ends when the store drops the subscription.
    async fn stream_preferences(&self, user_id: &UserId) -> Result<SnapshotStream>;

    /// Persist a new reminder and return its assigned id.
    async fn create(&self, user_id: &UserId, preference: ReminderPreference) -> Result<ReminderId>;

    /// Apply a partial update.
    ///
    /// Returns `Error::ReminderNotFound` if the id does not exist.
    async fn update(&self, user_id: &UserId, id: &ReminderId, fields: ReminderFields) -> Result<()>;

    /// Remove a reminder. No-op if it doesn't exist.
    async fn delete(&self, user_id: &UserId, id: &ReminderId) -> Result<()>;
}
