//! In-memory store and alarm implementations.
//!
//! Both support failure injection so that retry and degradation paths can be
//! exercised without a platform.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use mealnudge_core::{Error, Result};
use tokio::sync::{RwLock, watch};
use tracing::debug;
use uuid::Uuid;

use super::alarm::{AlarmPort, AlarmPrecision};
use super::store::{PreferenceStore, SnapshotStream};
use crate::model::{ReminderFields, ReminderId, ReminderPreference, UserId};

/// One user's reminders plus the snapshot fan-out.
struct UserCollection {
    reminders: BTreeMap<ReminderId, ReminderPreference>,
    snapshots: watch::Sender<Vec<ReminderPreference>>,
}

impl UserCollection {
    fn new() -> Self {
        let (snapshots, _) = watch::channel(Vec::new());
        Self {
            reminders: BTreeMap::new(),
            snapshots,
        }
    }

    fn publish(&self) {
        self.snapshots
            .send_replace(self.reminders.values().cloned().collect());
    }
}

/// Preference store held in process memory.
///
/// Every mutation publishes a full snapshot to all subscribers of that user.
/// Subscribers that fall behind only see the latest snapshot.
#[derive(Default)]
pub struct InMemoryPreferenceStore {
    users: RwLock<HashMap<UserId, UserCollection>>,
    failing_writes: AtomicU32,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert reminders directly, assigning ids where missing.
    pub async fn seed(
        &self,
        user_id: &UserId,
        reminders: Vec<ReminderPreference>,
    ) -> Vec<ReminderId> {
        let mut users = self.users.write().await;
        let collection = users
            .entry(user_id.clone())
            .or_insert_with(UserCollection::new);

        let ids = reminders
            .into_iter()
            .map(|mut reminder| {
                if reminder.id.is_empty() {
                    reminder.id = new_id();
                }
                let id = reminder.id.clone();
                collection.reminders.insert(id.clone(), reminder);
                id
            })
            .collect();
        collection.publish();
        ids
    }

    /// Current listing for a user.
    pub async fn snapshot(&self, user_id: &UserId) -> Vec<ReminderPreference> {
        let users = self.users.read().await;
        users
            .get(user_id)
            .map(|c| c.reminders.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Look up one reminder.
    pub async fn get(&self, user_id: &UserId, id: &ReminderId) -> Option<ReminderPreference> {
        let users = self.users.read().await;
        users
            .get(user_id)
            .and_then(|c| c.reminders.get(id))
            .cloned()
    }

    /// Make the next `count` writes fail with `Error::StoreUnavailable`.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::store_unavailable("injected write failure"));
        }
        Ok(())
    }
}

fn new_id() -> ReminderId {
    ReminderId::new(format!("rem-{}", Uuid::new_v4()))
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn stream_preferences(&self, user_id: &UserId) -> Result<SnapshotStream> {
        let receiver = {
            let mut users = self.users.write().await;
            users
                .entry(user_id.clone())
                .or_insert_with(UserCollection::new)
                .snapshots
                .subscribe()
        };
        debug!(user_id = %user_id, "Snapshot subscription opened");

        let stream = futures::stream::unfold((receiver, true), |(mut rx, first)| async move {
            if !first {
                rx.changed().await.ok()?;
            }
            let snapshot = rx.borrow_and_update().clone();
            Some((snapshot, (rx, false)))
        });
        Ok(stream.boxed())
    }

    async fn create(
        &self,
        user_id: &UserId,
        mut preference: ReminderPreference,
    ) -> Result<ReminderId> {
        self.check_write()?;
        if preference.id.is_empty() {
            preference.id = new_id();
        }
        let id = preference.id.clone();

        let mut users = self.users.write().await;
        let collection = users
            .entry(user_id.clone())
            .or_insert_with(UserCollection::new);
        collection.reminders.insert(id.clone(), preference);
        collection.publish();
        Ok(id)
    }

    async fn update(
        &self,
        user_id: &UserId,
        id: &ReminderId,
        fields: ReminderFields,
    ) -> Result<()> {
        self.check_write()?;
        let mut users = self.users.write().await;
        let collection = users
            .get_mut(user_id)
            .ok_or_else(|| Error::reminder_not_found(id.as_str()))?;
        let current = collection
            .reminders
            .get(id)
            .ok_or_else(|| Error::reminder_not_found(id.as_str()))?;

        let updated = fields.apply(current);
        collection.reminders.insert(id.clone(), updated);
        collection.publish();
        Ok(())
    }

    async fn delete(&self, user_id: &UserId, id: &ReminderId) -> Result<()> {
        self.check_write()?;
        let mut users = self.users.write().await;
        if let Some(collection) = users.get_mut(user_id) {
            if collection.reminders.remove(id).is_some() {
                collection.publish();
            }
        }
        Ok(())
    }
}

/// A call the engine made against the alarm facility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmOp {
    Schedule {
        id: ReminderId,
        at: DateTime<Utc>,
        precision: AlarmPrecision,
    },
    Cancel {
        id: ReminderId,
    },
}

impl AlarmOp {
    pub const fn id(&self) -> &ReminderId {
        match self {
            Self::Schedule { id, .. } | Self::Cancel { id } => id,
        }
    }
}

/// A pending registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAlarm {
    pub at: DateTime<Utc>,
    pub precision: AlarmPrecision,
    pub payload: String,
}

/// Alarm facility that records every accepted call.
///
/// Rejected calls are not recorded. `fire` and `lose_all` simulate the
/// platform delivering an alarm and forgetting everything on reboot.
pub struct RecordingAlarmPort {
    ops: RwLock<Vec<AlarmOp>>,
    pending: RwLock<HashMap<ReminderId, PendingAlarm>>,
    deny_exact: AtomicBool,
    deny_all: AtomicBool,
    inexact_supported: AtomicBool,
    failing_schedules: AtomicU32,
    hang: AtomicBool,
    overwrites: AtomicU32,
}

impl Default for RecordingAlarmPort {
    fn default() -> Self {
        Self {
            ops: RwLock::new(Vec::new()),
            pending: RwLock::new(HashMap::new()),
            deny_exact: AtomicBool::new(false),
            deny_all: AtomicBool::new(false),
            inexact_supported: AtomicBool::new(true),
            failing_schedules: AtomicU32::new(0),
            hang: AtomicBool::new(false),
            overwrites: AtomicU32::new(0),
        }
    }
}

impl RecordingAlarmPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse `AlarmPrecision::Exact` registrations.
    pub fn deny_exact(&self, deny: bool) {
        self.deny_exact.store(deny, Ordering::SeqCst);
    }

    /// Refuse every registration.
    pub fn deny_all(&self, deny: bool) {
        self.deny_all.store(deny, Ordering::SeqCst);
    }

    pub fn set_inexact_supported(&self, supported: bool) {
        self.inexact_supported.store(supported, Ordering::SeqCst);
    }

    /// Make the next `count` registrations fail with
    /// `Error::AlarmUnavailable`.
    pub fn fail_next_schedules(&self, count: u32) {
        self.failing_schedules.store(count, Ordering::SeqCst);
    }

    /// Never complete any call while set.
    pub fn hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Every accepted call, in order.
    pub async fn ops(&self) -> Vec<AlarmOp> {
        self.ops.read().await.clone()
    }

    /// Accepted calls for one id, in order.
    pub async fn ops_for(&self, id: &ReminderId) -> Vec<AlarmOp> {
        self.ops
            .read()
            .await
            .iter()
            .filter(|op| op.id() == id)
            .cloned()
            .collect()
    }

    pub async fn clear_ops(&self) {
        self.ops.write().await.clear();
    }

    /// Pending registrations.
    pub async fn pending(&self) -> HashMap<ReminderId, PendingAlarm> {
        self.pending.read().await.clone()
    }

    pub async fn pending_for(&self, id: &ReminderId) -> Option<PendingAlarm> {
        self.pending.read().await.get(id).cloned()
    }

    /// Registrations accepted while another was still pending for the same id.
    pub fn overwrite_count(&self) -> u32 {
        self.overwrites.load(Ordering::SeqCst)
    }

    /// Deliver the pending alarm for `id`, returning its payload.
    pub async fn fire(&self, id: &ReminderId) -> Option<String> {
        self.pending
            .write()
            .await
            .remove(id)
            .map(|alarm| alarm.payload)
    }

    /// Forget every registration without recording cancels, as a reboot does.
    pub async fn lose_all(&self) {
        self.pending.write().await.clear();
    }

    async fn stall_if_hung(&self) {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl AlarmPort for RecordingAlarmPort {
    async fn schedule(
        &self,
        id: &ReminderId,
        at: DateTime<Utc>,
        payload: &str,
        precision: AlarmPrecision,
    ) -> Result<()> {
        self.stall_if_hung().await;

        let injected = self
            .failing_schedules
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::alarm_unavailable("injected schedule failure"));
        }
        if self.deny_all.load(Ordering::SeqCst) {
            return Err(Error::alarm_denied(id.as_str(), "alarms not permitted"));
        }
        match precision {
            AlarmPrecision::Exact if self.deny_exact.load(Ordering::SeqCst) => {
                return Err(Error::alarm_denied(id.as_str(), "exact alarms not permitted"));
            }
            AlarmPrecision::Inexact if !self.supports_inexact() => {
                return Err(Error::alarm_denied(id.as_str(), "inexact alarms unsupported"));
            }
            _ => {}
        }

        let previous = self.pending.write().await.insert(
            id.clone(),
            PendingAlarm {
                at,
                precision,
                payload: payload.to_string(),
            },
        );
        if previous.is_some() {
            self.overwrites.fetch_add(1, Ordering::SeqCst);
        }
        self.ops.write().await.push(AlarmOp::Schedule {
            id: id.clone(),
            at,
            precision,
        });
        Ok(())
    }

    async fn cancel(&self, id: &ReminderId) -> Result<()> {
        self.stall_if_hung().await;
        self.pending.write().await.remove(id);
        self.ops
            .write()
            .await
            .push(AlarmOp::Cancel { id: id.clone() });
        Ok(())
    }

    fn supports_inexact(&self) -> bool {
        self.inexact_supported.load(Ordering::SeqCst)
    }
}
