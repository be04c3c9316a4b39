//! Reconciliation of store snapshots against registered alarms.
//!
//! The engine compares the desired state (the last snapshot, resolved to fire
//! instants) with the actual state (the `scheduled` map of alarms it holds)
//! and issues the minimal set of `ReconcileAction`s to converge. It does no
//! synchronisation of its own: the engine actor owns it and feeds it one
//! event at a time.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use im::{HashMap, HashSet};
use mealnudge_core::{Error, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::model::{ReminderFields, ReminderId, ReminderPreference, UserId};
use crate::occurrence::{NextFire, next_fire_instant};
use crate::ports::{AlarmPort, AlarmPrecision, PreferenceStore};
use crate::retry::with_timeout;
use crate::types::{
    ActionFailure, FiredOutcome, ReconcileAction, ReconcileReport, ScheduleStatus, SignOutReport,
};

/// A delivery this far ahead of the held instant belongs to an earlier
/// registration.
const EARLY_FIRE_TOLERANCE: chrono::Duration = chrono::Duration::seconds(60);

/// Point-in-time copy of the engine's view.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub scheduled: HashMap<ReminderId, DateTime<Utc>>,
    pub statuses: HashMap<ReminderId, ScheduleStatus>,
    pub timezone: Tz,
}

impl EngineSnapshot {
    /// Scheduled entries ordered by id.
    pub fn scheduled_sorted(&self) -> Vec<(ReminderId, DateTime<Utc>)> {
        let ordered: BTreeMap<_, _> = self
            .scheduled
            .iter()
            .map(|(id, at)| (id.clone(), *at))
            .collect();
        ordered.into_iter().collect()
    }
}

/// What a reminder should look like in the alarm facility right now.
enum Disposition {
    Arm { at: DateTime<Utc>, payload: String },
    Idle(ScheduleStatus),
}

/// Publishes the ids that may have an alarm registered with the port,
/// including registrations still in flight.
pub type Registrations = watch::Sender<HashSet<ReminderId>>;

/// Collaborators the engine talks to.
#[derive(Clone)]
pub struct EnginePorts {
    pub store: Arc<dyn PreferenceStore>,
    pub alarms: Arc<dyn AlarmPort>,
    pub clock: Arc<dyn Clock>,
}

/// Keeps one user's alarms in step with their reminders.
pub struct ReconciliationEngine {
    user_id: UserId,
    ports: EnginePorts,
    timezone: Tz,
    config: EngineConfig,
    /// Alarms this engine believes are pending, by fire instant.
    scheduled: HashMap<ReminderId, DateTime<Utc>>,
    statuses: HashMap<ReminderId, ScheduleStatus>,
    last_snapshot: Vec<ReminderPreference>,
    /// One-shots that fired but whose fired marker the store hasn't echoed yet.
    pending_fired: HashSet<ReminderId>,
    registrations: Registrations,
}

impl ReconciliationEngine {
    pub fn new(user_id: UserId, ports: EnginePorts, timezone: Tz, config: EngineConfig) -> Self {
        Self {
            user_id,
            ports,
            timezone,
            config,
            scheduled: HashMap::new(),
            statuses: HashMap::new(),
            last_snapshot: Vec::new(),
            pending_fired: HashSet::new(),
            registrations: watch::channel(HashSet::new()).0,
        }
    }

    /// Publish registrations on `registrations` instead of a private channel.
    #[must_use]
    pub fn with_registrations(mut self, registrations: Registrations) -> Self {
        self.registrations = registrations;
        self
    }

    /// Follow the ids that may have an alarm registered with the port.
    ///
    /// Unlike the `scheduled` map this errs on the side of inclusion: an id
    /// joins before its schedule call and leaves only once a cancel or a
    /// delivery is confirmed.
    pub fn watch_registrations(&self) -> watch::Receiver<HashSet<ReminderId>> {
        self.registrations.subscribe()
    }

    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub const fn timezone(&self) -> Tz {
        self.timezone
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            scheduled: self.scheduled.clone(),
            statuses: self.statuses.clone(),
            timezone: self.timezone,
        }
    }

    pub fn status(&self, id: &ReminderId) -> Option<ScheduleStatus> {
        self.statuses.get(id).cloned()
    }

    /// Replace the known reminder set and converge on it.
    pub async fn on_snapshot(&mut self, reminders: Vec<ReminderPreference>) -> ReconcileReport {
        self.settle_pending_fired(&reminders);
        self.last_snapshot = reminders;
        self.reconcile().await
    }

    /// Forget every registration and reschedule from the last snapshot.
    ///
    /// Used after a reboot (the platform dropped all alarms) and after a zone
    /// change (every instant must be re-derived). Nothing is cancelled first.
    pub async fn on_boot_or_timezone_change(&mut self, timezone: Option<Tz>) -> ReconcileReport {
        if let Some(timezone) = timezone {
            info!(
                user_id = %self.user_id,
                from = %self.timezone,
                to = %timezone,
                "Timezone changed"
            );
            self.timezone = timezone;
        }
        info!(
            user_id = %self.user_id,
            dropped = self.scheduled.len(),
            "Discarding schedule map for full resync"
        );
        self.scheduled.clear();
        self.reconcile().await
    }

    /// Run one pass against the last snapshot.
    pub async fn reconcile(&mut self) -> ReconcileReport {
        let now = self.ports.clock.now();
        info!(
            user_id = %self.user_id,
            reminders = self.last_snapshot.len(),
            scheduled = self.scheduled.len(),
            "Starting reconciliation"
        );

        let (actions, desired_count) = self.diff(now);
        debug!(actions = actions.len(), "Generated actions");

        let (taken, failed) = self.apply_actions(actions).await;
        let report = ReconcileReport {
            actions_taken: taken,
            actions_failed: failed,
            desired_count,
            scheduled_count: self.scheduled.len(),
        };

        if report.converged() {
            info!(user_id = %self.user_id, "Schedule converged");
        } else {
            info!(
                user_id = %self.user_id,
                actions_taken = report.actions_taken.len(),
                actions_failed = report.actions_failed.len(),
                "Reconciliation complete"
            );
        }
        report
    }

    /// Handle a delivered alarm.
    ///
    /// Deliveries for ids the engine doesn't hold, or that arrive well before
    /// the held instant, are stale or duplicated and are ignored, so an alarm
    /// can never be acted on twice.
    pub async fn on_fired(&mut self, id: &ReminderId) -> FiredOutcome {
        let Some(fired_at) = self.scheduled.get(id).copied() else {
            debug!(reminder_id = %id, "Ignoring fire for an alarm not held");
            return FiredOutcome::Ignored;
        };
        let now = self.ports.clock.now();
        if fired_at > now + EARLY_FIRE_TOLERANCE {
            debug!(reminder_id = %id, due = %fired_at, "Ignoring fire ahead of the held instant");
            return FiredOutcome::Ignored;
        }
        self.scheduled.remove(id);
        self.forget_registration(id);

        let Some(reminder) = self.last_snapshot.iter().find(|r| &r.id == id).cloned() else {
            warn!(reminder_id = %id, "Fired alarm has no reminder in the last snapshot");
            self.statuses.remove(id);
            return FiredOutcome::Ignored;
        };

        if reminder.repetition.is_once() {
            info!(reminder_id = %id, "One-shot reminder delivered");
            self.pending_fired.insert(id.clone());
            self.statuses.insert(id.clone(), ScheduleStatus::Terminal);
            return FiredOutcome::MarkFired { id: id.clone() };
        }

        // Never re-arm at or before the instant that just fired.
        let now = now.max(fired_at);
        let mut report = ReconcileReport::default();
        match self.disposition(&reminder, now) {
            Disposition::Arm { at, payload } => {
                let action = ReconcileAction::Schedule {
                    id: id.clone(),
                    at,
                    payload,
                };
                report.desired_count = 1;
                let (taken, failed) = self.apply_actions(vec![action]).await;
                report.actions_taken = taken;
                report.actions_failed = failed;
            }
            Disposition::Idle(status) => {
                self.statuses.insert(id.clone(), status);
            }
        }
        report.scheduled_count = self.scheduled.len();
        FiredOutcome::Rescheduled(report)
    }

    /// Persist the fired marker of a delivered one-shot.
    ///
    /// # Errors
    ///
    /// Returns the store error, or `Error::Timeout`, so the caller can retry.
    /// A reminder deleted in the meantime counts as done.
    pub async fn mark_fired(&self, id: &ReminderId) -> Result<()> {
        let write = self
            .ports
            .store
            .update(&self.user_id, id, ReminderFields::mark_fired());
        match with_timeout("store update", self.config.store_timeout(), write).await {
            Ok(()) => {
                debug!(reminder_id = %id, "Fired marker persisted");
                Ok(())
            }
            Err(Error::ReminderNotFound { .. }) => {
                debug!(reminder_id = %id, "Reminder gone before fired marker was written");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel every alarm held and drop all local state.
    ///
    /// State is dropped even when a cancel fails; the failures are reported.
    pub async fn sign_out(&mut self) -> SignOutReport {
        let held: BTreeMap<ReminderId, DateTime<Utc>> = self
            .scheduled
            .iter()
            .map(|(id, at)| (id.clone(), *at))
            .collect();

        let mut report = SignOutReport::default();
        for id in held.into_keys() {
            match self.cancel_alarm(&id).await {
                Ok(()) => {
                    self.forget_registration(&id);
                    report.cancelled.push(id);
                }
                Err(e) => {
                    warn!(reminder_id = %id, error = %e, "Cancel failed during sign-out");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        self.scheduled.clear();
        self.statuses.clear();
        self.pending_fired.clear();
        self.last_snapshot.clear();
        info!(
            user_id = %self.user_id,
            cancelled = report.cancelled.len(),
            failed = report.failed.len(),
            "Engine state discarded"
        );
        report
    }

    /// Drop one-shots whose fired marker the store now reflects.
    fn settle_pending_fired(&mut self, reminders: &[ReminderPreference]) {
        if self.pending_fired.is_empty() {
            return;
        }
        let settled: Vec<ReminderId> = self
            .pending_fired
            .iter()
            .filter(|id| {
                reminders
                    .iter()
                    .find(|r| &r.id == *id)
                    .is_none_or(|r| r.fired || !r.enabled)
            })
            .cloned()
            .collect();
        for id in settled {
            self.pending_fired.remove(&id);
        }
    }

    fn disposition(&self, reminder: &ReminderPreference, now: DateTime<Utc>) -> Disposition {
        let awaiting_marker =
            reminder.repetition.is_once() && self.pending_fired.contains(&reminder.id);
        if reminder.is_terminal() || awaiting_marker {
            return Disposition::Idle(ScheduleStatus::Terminal);
        }
        if !reminder.enabled {
            return Disposition::Idle(ScheduleStatus::Disabled);
        }
        match next_fire_instant(reminder, now, self.timezone) {
            Ok(NextFire::At(at)) => Disposition::Arm {
                at,
                payload: reminder.message.clone(),
            },
            Ok(NextFire::Terminal) => Disposition::Idle(ScheduleStatus::Terminal),
            Err(e) => {
                warn!(reminder_id = %reminder.id, error = %e, "Reminder cannot be scheduled");
                Disposition::Idle(ScheduleStatus::Invalid {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Compare desired against held alarms. Cancels come first, then
    /// schedules, each ordered by id.
    fn diff(&mut self, now: DateTime<Utc>) -> (Vec<ReconcileAction>, usize) {
        let mut by_id: BTreeMap<ReminderId, &ReminderPreference> = BTreeMap::new();
        for reminder in &self.last_snapshot {
            if reminder.id.is_empty() {
                warn!("Skipping reminder without an id");
                continue;
            }
            by_id.insert(reminder.id.clone(), reminder);
        }

        let plan: Vec<(ReminderId, Disposition)> = by_id
            .into_iter()
            .map(|(id, reminder)| (id, self.disposition(reminder, now)))
            .collect();

        let mut desired: BTreeMap<ReminderId, (DateTime<Utc>, String)> = BTreeMap::new();
        let mut present: HashSet<ReminderId> = HashSet::new();
        for (id, disposition) in plan {
            present.insert(id.clone());
            match disposition {
                Disposition::Arm { at, payload } => {
                    desired.insert(id, (at, payload));
                }
                Disposition::Idle(status) => {
                    self.statuses.insert(id, status);
                }
            }
        }
        self.statuses.retain(|id, _| present.contains(id));

        let stale: BTreeMap<ReminderId, ()> = self
            .scheduled
            .keys()
            .filter(|id| !desired.contains_key(*id))
            .map(|id| (id.clone(), ()))
            .collect();

        let desired_count = desired.len();
        let cancels = stale
            .into_keys()
            .map(|id| ReconcileAction::Cancel { id });
        let schedules = desired
            .into_iter()
            .filter(|(id, (at, _))| {
                // A failed registration may already have cancelled the held alarm.
                self.scheduled.get(id) != Some(at)
                    || self.statuses.get(id).is_some_and(ScheduleStatus::is_failed)
            })
            .map(|(id, (at, payload))| ReconcileAction::Schedule { id, at, payload });

        (cancels.chain(schedules).collect(), desired_count)
    }

    async fn apply_actions(
        &mut self,
        actions: Vec<ReconcileAction>,
    ) -> (Vec<ReconcileAction>, Vec<ActionFailure>) {
        let mut taken = Vec::new();
        let mut failed = Vec::new();

        for action in actions {
            debug!(action = %action.description(), "Applying action");

            let result = match &action {
                ReconcileAction::Schedule { id, at, payload } => self.arm(id, *at, payload).await,
                ReconcileAction::Cancel { id } => self.disarm(id).await,
            };

            match result {
                Ok(()) => taken.push(action),
                Err(e) => {
                    warn!(action = %action.description(), error = %e, "Action failed");
                    failed.push(ActionFailure {
                        transient: e.is_transient(),
                        reason: e.to_string(),
                        action,
                    });
                }
            }
        }

        (taken, failed)
    }

    /// Register an alarm, degrading to inexact precision once if allowed.
    /// On failure the held instant is left untouched.
    async fn arm(&mut self, id: &ReminderId, at: DateTime<Utc>, payload: &str) -> Result<()> {
        let result = match self.register(id, at, payload, AlarmPrecision::Exact).await {
            Ok(()) => Ok(AlarmPrecision::Exact),
            Err(exact_error)
                if self.config.allow_inexact_fallback && self.ports.alarms.supports_inexact() =>
            {
                warn!(
                    reminder_id = %id,
                    error = %exact_error,
                    "Exact alarm refused, retrying inexact"
                );
                self.register(id, at, payload, AlarmPrecision::Inexact)
                    .await
                    .map(|()| AlarmPrecision::Inexact)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(precision) => {
                self.scheduled.insert(id.clone(), at);
                self.statuses
                    .insert(id.clone(), ScheduleStatus::Scheduled { at, precision });
                debug!(reminder_id = %id, at = %at, precision = %precision, "Alarm scheduled");
                Ok(())
            }
            Err(e) => {
                self.statuses.insert(
                    id.clone(),
                    ScheduleStatus::Failed {
                        reason: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn disarm(&mut self, id: &ReminderId) -> Result<()> {
        self.cancel_alarm(id).await?;
        self.scheduled.remove(id);
        self.forget_registration(id);
        debug!(reminder_id = %id, "Alarm cancelled");
        Ok(())
    }

    /// Cancel-then-schedule, so that at most one alarm is pending per id.
    async fn register(
        &self,
        id: &ReminderId,
        at: DateTime<Utc>,
        payload: &str,
        precision: AlarmPrecision,
    ) -> Result<()> {
        self.registrations.send_if_modified(|ids| ids.insert(id.clone()).is_none());
        self.cancel_alarm(id).await?;
        let limit = self.config.alarm_timeout();
        with_timeout(
            "alarm schedule",
            limit,
            self.ports.alarms.schedule(id, at, payload, precision),
        )
        .await
    }

    fn forget_registration(&self, id: &ReminderId) {
        self.registrations.send_if_modified(|ids| ids.remove(id).is_some());
    }

    async fn cancel_alarm(&self, id: &ReminderId) -> Result<()> {
        with_timeout(
            "alarm cancel",
            self.config.alarm_timeout(),
            self.ports.alarms.cancel(id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::indexing_slicing)]
    #![allow(clippy::panic)]

    use super::*;
    use crate::clock::ManualClock;
    use crate::model::Repetition;
    use crate::ports::{AlarmOp, InMemoryPreferenceStore, RecordingAlarmPort};
    use chrono::TimeZone;

    struct Harness {
        engine: ReconciliationEngine,
        store: Arc<InMemoryPreferenceStore>,
        alarms: Arc<RecordingAlarmPort>,
        clock: Arc<ManualClock>,
    }

    fn utc(d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, d, h, mi, 0).single().unwrap()
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryPreferenceStore::new());
        let alarms = Arc::new(RecordingAlarmPort::new());
        let clock = Arc::new(ManualClock::new(utc(21, 7, 0)));
        let ports = EnginePorts {
            store: store.clone(),
            alarms: alarms.clone(),
            clock: clock.clone(),
        };
        let engine = ReconciliationEngine::new(
            UserId::new("user-1"),
            ports,
            Tz::UTC,
            EngineConfig::default(),
        );
        Harness {
            engine,
            store,
            alarms,
            clock,
        }
    }

    fn daily(id: &str, hour: u8) -> ReminderPreference {
        ReminderPreference::new(hour, 0, Repetition::Daily, "Eat").with_id(id)
    }

    #[tokio::test]
    async fn test_diff_orders_cancels_before_schedules() {
        let mut h = harness();
        h.engine.on_snapshot(vec![daily("b", 8), daily("z", 9)]).await;

        h.engine.last_snapshot = vec![daily("a", 10), daily("b", 8)];
        let (actions, desired) = h.engine.diff(h.clock.now());

        assert_eq!(desired, 2);
        assert_eq!(actions.len(), 2);
        assert!(matches!(&actions[0], ReconcileAction::Cancel { id } if id.as_str() == "z"));
        assert!(matches!(&actions[1], ReconcileAction::Schedule { id, .. } if id.as_str() == "a"));
    }

    #[tokio::test]
    async fn test_unchanged_snapshot_is_converged() {
        let mut h = harness();
        let first = h.engine.on_snapshot(vec![daily("a", 8)]).await;
        assert_eq!(first.actions_taken.len(), 1);

        let second = h.engine.on_snapshot(vec![daily("a", 8)]).await;
        assert!(second.converged());
        assert_eq!(h.alarms.ops().await.len(), 2);
    }

    #[tokio::test]
    async fn test_reminder_without_id_is_skipped() {
        let mut h = harness();
        let draft = ReminderPreference::new(8, 0, Repetition::Daily, "Eat");
        let report = h.engine.on_snapshot(vec![draft]).await;
        assert_eq!(report.desired_count, 0);
        assert!(h.alarms.ops().await.is_empty());
    }

    #[tokio::test]
    async fn test_fire_for_unknown_id_is_ignored() {
        let mut h = harness();
        let outcome = h.engine.on_fired(&ReminderId::new("ghost")).await;
        assert_eq!(outcome, FiredOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_recurring_fire_rearms_only_that_reminder() {
        let mut h = harness();
        h.engine
            .on_snapshot(vec![daily("a", 8), daily("b", 8)])
            .await;
        h.alarms.clear_ops().await;

        h.clock.set(utc(21, 8, 0));
        let outcome = h.engine.on_fired(&ReminderId::new("a")).await;

        let FiredOutcome::Rescheduled(report) = outcome else {
            panic!("expected reschedule");
        };
        assert_eq!(report.actions_taken.len(), 1);
        let ops = h.alarms.ops().await;
        assert!(ops.iter().all(|op| op.id().as_str() == "a"));
        assert!(ops.contains(&AlarmOp::Schedule {
            id: ReminderId::new("a"),
            at: utc(22, 8, 0),
            precision: AlarmPrecision::Exact,
        }));
    }

    #[tokio::test]
    async fn test_once_fire_stays_terminal_until_store_echoes() {
        let mut h = harness();
        let once = ReminderPreference::new(8, 0, Repetition::Once, "Pill").with_id("p");
        h.store.seed(&UserId::new("user-1"), vec![once.clone()]).await;
        h.engine.on_snapshot(vec![once.clone()]).await;

        h.clock.set(utc(21, 8, 0));
        let outcome = h.engine.on_fired(&ReminderId::new("p")).await;
        assert_eq!(outcome, FiredOutcome::MarkFired { id: ReminderId::new("p") });

        // A stale snapshot still shows it unfired.
        let report = h.engine.on_snapshot(vec![once]).await;
        assert_eq!(report.desired_count, 0);
        assert_eq!(h.engine.status(&ReminderId::new("p")), Some(ScheduleStatus::Terminal));

        h.engine.mark_fired(&ReminderId::new("p")).await.unwrap();
        let stored = h.store.snapshot(&UserId::new("user-1")).await;
        assert!(stored[0].fired);
        assert!(!stored[0].enabled);

        h.engine.on_snapshot(stored).await;
        assert!(h.engine.pending_fired.is_empty());
    }

    #[tokio::test]
    async fn test_mark_fired_for_deleted_reminder_is_ok() {
        let h = harness();
        let result = h.engine.mark_fired(&ReminderId::new("gone")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_sign_out_clears_everything() {
        let mut h = harness();
        h.engine
            .on_snapshot(vec![daily("a", 8), daily("b", 9)])
            .await;

        let report = h.engine.sign_out().await;
        assert_eq!(report.cancelled.len(), 2);
        assert!(report.failed.is_empty());

        let snapshot = h.engine.snapshot();
        assert!(snapshot.scheduled.is_empty());
        assert!(snapshot.statuses.is_empty());
        assert!(h.alarms.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_registrations_follow_schedule_and_cancel() {
        let mut h = harness();
        let registrations = h.engine.watch_registrations();

        h.engine.on_snapshot(vec![daily("a", 8), daily("b", 9)]).await;
        assert_eq!(registrations.borrow().len(), 2);

        h.engine.on_snapshot(vec![daily("b", 9)]).await;
        assert!(!registrations.borrow().contains(&ReminderId::new("a")));
        assert!(registrations.borrow().contains(&ReminderId::new("b")));

        h.engine.sign_out().await;
        assert!(registrations.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_failed_registration_stays_published() {
        let mut h = harness();
        let registrations = h.engine.watch_registrations();
        h.alarms.deny_all(true);

        h.engine.on_snapshot(vec![daily("a", 8)]).await;

        assert!(h.engine.snapshot().scheduled.is_empty());
        assert!(registrations.borrow().contains(&ReminderId::new("a")));
    }
}
