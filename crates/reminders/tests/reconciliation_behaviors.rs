//! BDD-style behavioral tests for the reconciliation engine.
//!
//! The engine runs against a recording alarm port and a manual clock, so
//! every scenario is deterministic. Names follow Given-When-Then.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::indexing_slicing)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use mealnudge_reminders::{
    AlarmOp, AlarmPrecision, DaySet, EngineConfig, EnginePorts, FiredOutcome,
    InMemoryPreferenceStore, ManualClock, ReconcileAction, ReconciliationEngine,
    RecordingAlarmPort, ReminderId, ReminderPreference, Repetition, ScheduleStatus, UserId,
};

struct World {
    engine: ReconciliationEngine,
    store: Arc<InMemoryPreferenceStore>,
    alarms: Arc<RecordingAlarmPort>,
    clock: Arc<ManualClock>,
}

fn utc(month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, month, day, hour, minute, 0)
        .single()
        .expect("valid instant")
}

fn user() -> UserId {
    UserId::new("user-1")
}

/// Wednesday 2026-10-21, 07:00 UTC.
fn world_with(config: EngineConfig) -> World {
    let store = Arc::new(InMemoryPreferenceStore::new());
    let alarms = Arc::new(RecordingAlarmPort::new());
    let clock = Arc::new(ManualClock::new(utc(10, 21, 7, 0)));
    let ports = EnginePorts {
        store: store.clone(),
        alarms: alarms.clone(),
        clock: clock.clone(),
    };
    World {
        engine: ReconciliationEngine::new(user(), ports, Tz::UTC, config),
        store,
        alarms,
        clock,
    }
}

fn world() -> World {
    world_with(EngineConfig::default())
}

fn daily(id: &str, hour: u8, minute: u8) -> ReminderPreference {
    ReminderPreference::new(hour, minute, Repetition::Daily, "Log your meal").with_id(id)
}

fn rid(id: &str) -> ReminderId {
    ReminderId::new(id)
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERGENCE BEHAVIORS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn given_daily_reminder_before_its_time_when_snapshot_then_alarm_today() {
    // GIVEN: 07:00 and a daily 08:00 reminder
    let mut w = world();

    // WHEN: the first snapshot arrives
    let report = w.engine.on_snapshot(vec![daily("breakfast", 8, 0)]).await;

    // THEN: exactly one exact alarm at 08:00 today
    assert!(report.all_succeeded());
    assert_eq!(report.desired_count, 1);
    let pending = w.alarms.pending_for(&rid("breakfast")).await.unwrap();
    assert_eq!(pending.at, utc(10, 21, 8, 0));
    assert_eq!(pending.precision, AlarmPrecision::Exact);
    assert_eq!(pending.payload, "Log your meal");
}

#[tokio::test]
async fn given_daily_reminder_after_its_time_when_snapshot_then_alarm_tomorrow() {
    // GIVEN: 09:00 and a daily 08:00 reminder
    let mut w = world();
    w.clock.set(utc(10, 21, 9, 0));

    // WHEN
    w.engine.on_snapshot(vec![daily("breakfast", 8, 0)]).await;

    // THEN
    let pending = w.alarms.pending_for(&rid("breakfast")).await.unwrap();
    assert_eq!(pending.at, utc(10, 22, 8, 0));
}

#[tokio::test]
async fn given_weekly_tuesday_friday_on_wednesday_when_snapshot_then_alarm_friday() {
    // GIVEN: Wednesday and a {Tue, Fri} reminder at 12:30
    let mut w = world();
    let weekly = ReminderPreference::new(
        12,
        30,
        Repetition::weekly([Weekday::Tue, Weekday::Fri]),
        "Lunch",
    )
    .with_id("lunch");

    // WHEN
    w.engine.on_snapshot(vec![weekly]).await;

    // THEN: Friday 2026-10-23
    let pending = w.alarms.pending_for(&rid("lunch")).await.unwrap();
    assert_eq!(pending.at, utc(10, 23, 12, 30));
}

#[tokio::test]
async fn given_converged_engine_when_same_snapshot_again_then_no_alarm_calls() {
    // GIVEN
    let mut w = world();
    let reminders = vec![daily("a", 8, 0), daily("b", 12, 0), daily("c", 19, 0)];
    w.engine.on_snapshot(reminders.clone()).await;
    w.alarms.clear_ops().await;

    // WHEN
    let report = w.engine.on_snapshot(reminders).await;

    // THEN
    assert!(report.converged());
    assert!(w.alarms.ops().await.is_empty());
}

#[tokio::test]
async fn given_many_edits_when_reconciling_then_never_more_than_one_alarm_per_id() {
    // GIVEN
    let mut w = world();

    // WHEN: the same reminder is retimed repeatedly
    for hour in [8, 9, 10, 9, 8, 20] {
        w.engine.on_snapshot(vec![daily("a", hour, 0)]).await;
    }

    // THEN: every schedule was preceded by a cancel, one alarm is pending
    assert_eq!(w.alarms.overwrite_count(), 0);
    let pending = w.alarms.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[&rid("a")].at, utc(10, 21, 20, 0));

    let ops = w.alarms.ops_for(&rid("a")).await;
    for pair in ops.windows(2) {
        if matches!(pair[1], AlarmOp::Schedule { .. }) {
            assert!(matches!(pair[0], AlarmOp::Cancel { .. }));
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DELETION AND DISABLING BEHAVIORS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn given_scheduled_reminder_when_deleted_from_snapshot_then_alarm_cancelled() {
    // GIVEN
    let mut w = world();
    w.engine
        .on_snapshot(vec![daily("a", 8, 0), daily("b", 9, 0)])
        .await;

    // WHEN: "a" disappears
    let report = w.engine.on_snapshot(vec![daily("b", 9, 0)]).await;

    // THEN
    assert!(
        report
            .actions_taken
            .contains(&ReconcileAction::Cancel { id: rid("a") })
    );
    assert!(w.alarms.pending_for(&rid("a")).await.is_none());
    let snapshot = w.engine.snapshot();
    assert!(!snapshot.scheduled.contains_key(&rid("a")));
    assert!(!snapshot.statuses.contains_key(&rid("a")));
}

#[tokio::test]
async fn given_scheduled_reminder_when_disabled_then_alarm_cancelled_and_reported() {
    // GIVEN
    let mut w = world();
    w.engine.on_snapshot(vec![daily("a", 8, 0)]).await;

    // WHEN
    w.engine
        .on_snapshot(vec![daily("a", 8, 0).with_enabled(false)])
        .await;

    // THEN
    assert!(w.alarms.pending().await.is_empty());
    assert_eq!(w.engine.status(&rid("a")), Some(ScheduleStatus::Disabled));
}

#[tokio::test]
async fn given_scheduled_reminders_when_snapshot_empty_then_everything_cancelled() {
    // GIVEN
    let mut w = world();
    w.engine
        .on_snapshot(vec![daily("a", 8, 0), daily("b", 9, 0), daily("c", 10, 0)])
        .await;

    // WHEN
    let report = w.engine.on_snapshot(Vec::new()).await;

    // THEN
    assert_eq!(report.actions_taken.len(), 3);
    assert_eq!(report.scheduled_count, 0);
    assert!(w.alarms.pending().await.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════════
// BOOT AND TIMEZONE BEHAVIORS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn given_alarms_lost_on_reboot_when_boot_signal_then_every_alarm_restored() {
    // GIVEN: two scheduled reminders and a reboot that forgot them
    let mut w = world();
    w.engine
        .on_snapshot(vec![daily("a", 8, 0), daily("b", 9, 0)])
        .await;
    w.alarms.lose_all().await;

    // WHEN
    let report = w.engine.on_boot_or_timezone_change(None).await;

    // THEN: both are scheduled again even though the map already had them
    assert_eq!(report.actions_taken.len(), 2);
    let pending = w.alarms.pending().await;
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[&rid("a")].at, utc(10, 21, 8, 0));
}

#[tokio::test]
async fn given_scheduled_reminder_when_timezone_changes_then_instant_rederived() {
    // GIVEN: 07:00 UTC is 16:00 in Tokyo
    let mut w = world();
    w.engine.on_snapshot(vec![daily("a", 8, 0)]).await;

    // WHEN
    w.engine
        .on_boot_or_timezone_change(Some(chrono_tz::Asia::Tokyo))
        .await;

    // THEN: 08:00 Tokyo on the 22nd is 23:00 UTC on the 21st
    let pending = w.alarms.pending_for(&rid("a")).await.unwrap();
    assert_eq!(pending.at, utc(10, 21, 23, 0));
    assert_eq!(w.engine.timezone(), chrono_tz::Asia::Tokyo);
}

// ═══════════════════════════════════════════════════════════════════════════════
// FIRING BEHAVIORS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn given_daily_alarm_when_it_fires_then_rescheduled_for_tomorrow() {
    // GIVEN
    let mut w = world();
    w.engine.on_snapshot(vec![daily("a", 8, 0)]).await;

    // WHEN
    w.clock.set(utc(10, 21, 8, 0));
    w.alarms.fire(&rid("a")).await.unwrap();
    let outcome = w.engine.on_fired(&rid("a")).await;

    // THEN
    assert!(matches!(outcome, FiredOutcome::Rescheduled(ref r) if r.all_succeeded()));
    let pending = w.alarms.pending_for(&rid("a")).await.unwrap();
    assert_eq!(pending.at, utc(10, 22, 8, 0));
}

#[tokio::test]
async fn given_late_clock_when_alarm_fires_then_next_instant_is_after_the_fired_one() {
    // GIVEN: the clock lags behind the alarm
    let mut w = world();
    w.engine.on_snapshot(vec![daily("a", 8, 0)]).await;
    w.clock.set(utc(10, 21, 7, 59));

    // WHEN
    w.engine.on_fired(&rid("a")).await;

    // THEN
    let pending = w.alarms.pending_for(&rid("a")).await.unwrap();
    assert_eq!(pending.at, utc(10, 22, 8, 0));
}

#[tokio::test]
async fn given_once_reminder_when_it_fires_then_marked_in_store_and_never_rescheduled() {
    // GIVEN: a persisted one-shot
    let mut w = world();
    let once = ReminderPreference::new(8, 0, Repetition::Once, "Take vitamins").with_id("pill");
    w.store.seed(&user(), vec![once.clone()]).await;
    w.engine.on_snapshot(vec![once]).await;

    // WHEN: it fires and the marker is written
    w.clock.set(utc(10, 21, 8, 0));
    w.alarms.fire(&rid("pill")).await.unwrap();
    let outcome = w.engine.on_fired(&rid("pill")).await;
    assert_eq!(outcome, FiredOutcome::MarkFired { id: rid("pill") });
    w.engine.mark_fired(&rid("pill")).await.unwrap();

    // THEN: the store has it fired and disabled, and the echo arms nothing
    let stored = w.store.get(&user(), &rid("pill")).await.unwrap();
    assert!(stored.fired);
    assert!(!stored.enabled);

    w.alarms.clear_ops().await;
    w.engine.on_snapshot(w.store.snapshot(&user()).await).await;
    w.clock.set(utc(10, 22, 12, 0));
    w.engine.reconcile().await;

    assert!(w.alarms.ops().await.is_empty());
    assert_eq!(w.engine.status(&rid("pill")), Some(ScheduleStatus::Terminal));
}

#[tokio::test]
async fn given_fired_alarm_when_delivered_twice_then_second_delivery_ignored() {
    // GIVEN
    let mut w = world();
    w.engine
        .on_snapshot(vec![
            ReminderPreference::new(8, 0, Repetition::Once, "Snack").with_id("snack"),
        ])
        .await;
    w.clock.set(utc(10, 21, 8, 0));

    // WHEN
    let first = w.engine.on_fired(&rid("snack")).await;
    let second = w.engine.on_fired(&rid("snack")).await;

    // THEN
    assert!(matches!(first, FiredOutcome::MarkFired { .. }));
    assert_eq!(second, FiredOutcome::Ignored);
}

#[tokio::test]
async fn given_rearmed_reminder_when_stale_delivery_arrives_then_ignored() {
    // GIVEN: "a" fired at 08:00 and is re-armed for tomorrow
    let mut w = world();
    w.engine.on_snapshot(vec![daily("a", 8, 0)]).await;
    w.clock.set(utc(10, 21, 8, 0));
    w.engine.on_fired(&rid("a")).await;
    w.alarms.clear_ops().await;

    // WHEN: the platform delivers the same firing again
    let outcome = w.engine.on_fired(&rid("a")).await;

    // THEN: tomorrow's alarm is untouched
    assert_eq!(outcome, FiredOutcome::Ignored);
    assert!(w.alarms.ops().await.is_empty());
    assert_eq!(
        w.engine.snapshot().scheduled.get(&rid("a")).copied(),
        Some(utc(10, 22, 8, 0))
    );
}

#[tokio::test]
async fn given_failed_marker_write_when_retried_then_store_eventually_updated() {
    // GIVEN: a fired one-shot and a store failing once
    let mut w = world();
    let once = ReminderPreference::new(8, 0, Repetition::Once, "Pill").with_id("pill");
    w.store.seed(&user(), vec![once.clone()]).await;
    w.engine.on_snapshot(vec![once]).await;
    w.clock.set(utc(10, 21, 8, 0));
    w.engine.on_fired(&rid("pill")).await;
    w.store.fail_next_writes(1);

    // WHEN
    let first = w.engine.mark_fired(&rid("pill")).await;
    let second = w.engine.mark_fired(&rid("pill")).await;

    // THEN
    assert!(first.is_err_and(|e| e.is_transient()));
    assert!(second.is_ok());
    assert!(w.store.get(&user(), &rid("pill")).await.unwrap().fired);
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAILURE BEHAVIORS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn given_exact_alarms_denied_when_scheduling_then_falls_back_to_inexact() {
    // GIVEN
    let mut w = world();
    w.alarms.deny_exact(true);

    // WHEN
    let report = w.engine.on_snapshot(vec![daily("a", 8, 0)]).await;

    // THEN
    assert!(report.all_succeeded());
    let pending = w.alarms.pending_for(&rid("a")).await.unwrap();
    assert_eq!(pending.precision, AlarmPrecision::Inexact);
    assert_eq!(
        w.engine.status(&rid("a")),
        Some(ScheduleStatus::Scheduled {
            at: utc(10, 21, 8, 0),
            precision: AlarmPrecision::Inexact,
        })
    );
}

#[tokio::test]
async fn given_fallback_disabled_when_exact_denied_then_reported_failed() {
    // GIVEN
    let mut w = world_with(EngineConfig::default().with_inexact_fallback(false));
    w.alarms.deny_exact(true);

    // WHEN
    let report = w.engine.on_snapshot(vec![daily("a", 8, 0)]).await;

    // THEN
    assert_eq!(report.actions_failed.len(), 1);
    assert!(!report.has_transient_failures());
    assert!(w.engine.status(&rid("a")).is_some_and(|s| s.is_failed()));
    assert!(w.engine.snapshot().scheduled.is_empty());
}

#[tokio::test]
async fn given_scheduled_reminder_when_reschedule_fails_then_held_instant_kept() {
    // GIVEN: "a" held at 08:00
    let mut w = world();
    w.engine.on_snapshot(vec![daily("a", 8, 0)]).await;
    w.alarms.deny_all(true);

    // WHEN: it is moved to 09:00 but the platform refuses
    let report = w.engine.on_snapshot(vec![daily("a", 9, 0)]).await;

    // THEN
    assert_eq!(report.actions_failed.len(), 1);
    assert_eq!(
        w.engine.snapshot().scheduled.get(&rid("a")).copied(),
        Some(utc(10, 21, 8, 0))
    );
    assert!(w.engine.status(&rid("a")).is_some_and(|s| s.is_failed()));

    // AND: the next pass after recovery converges
    w.alarms.deny_all(false);
    w.engine.reconcile().await;
    assert_eq!(
        w.alarms.pending_for(&rid("a")).await.unwrap().at,
        utc(10, 21, 9, 0)
    );
}

#[tokio::test]
async fn given_failed_reschedule_when_reverted_to_held_instant_then_alarm_registered_again() {
    // GIVEN: "a" held at 08:00, then a refused move to 09:00 that already
    // cancelled the platform alarm
    let mut w = world();
    w.engine.on_snapshot(vec![daily("a", 8, 0)]).await;
    w.alarms.deny_all(true);
    w.engine.on_snapshot(vec![daily("a", 9, 0)]).await;
    assert!(w.alarms.pending_for(&rid("a")).await.is_none());
    w.alarms.deny_all(false);

    // WHEN: the user reverts to 08:00
    let report = w.engine.on_snapshot(vec![daily("a", 8, 0)]).await;

    // THEN: the engine re-registers instead of trusting its map
    assert!(!report.converged());
    assert!(report.all_succeeded());
    assert_eq!(
        w.alarms.pending_for(&rid("a")).await.unwrap().at,
        utc(10, 21, 8, 0)
    );
    assert!(w.engine.status(&rid("a")).is_some_and(|s| s.is_scheduled()));
}

#[tokio::test]
async fn given_weekly_without_days_when_snapshot_then_reported_invalid() {
    // GIVEN
    let mut w = world();
    let broken = ReminderPreference::new(
        8,
        0,
        Repetition::Weekly {
            days: DaySet::empty(),
        },
        "Broken",
    )
    .with_id("broken");

    // WHEN
    let report = w.engine.on_snapshot(vec![broken, daily("ok", 9, 0)]).await;

    // THEN: only the valid one is armed, the other is reported
    assert_eq!(report.desired_count, 1);
    assert!(w.alarms.pending_for(&rid("broken")).await.is_none());
    assert!(matches!(
        w.engine.status(&rid("broken")),
        Some(ScheduleStatus::Invalid { .. })
    ));
}

#[tokio::test]
async fn given_hanging_alarm_port_when_scheduling_then_times_out_as_transient_failure() {
    // GIVEN
    let mut w = world_with(EngineConfig::default().with_alarm_timeout_ms(50));
    w.alarms.hang(true);

    // WHEN
    let report = w.engine.on_snapshot(vec![daily("a", 8, 0)]).await;

    // THEN
    assert_eq!(report.actions_failed.len(), 1);
    assert!(report.has_transient_failures());
    let failure = &report.actions_failed[0];
    assert!(failure.reason.contains("alarm cancel"));
    assert!(w.engine.snapshot().scheduled.is_empty());
}

#[tokio::test]
async fn given_store_deleted_reminder_when_marking_fired_then_treated_as_done() {
    // GIVEN
    let w = world();

    // WHEN
    let result = w.engine.mark_fired(&rid("gone")).await;

    // THEN
    assert!(result.is_ok());
}

// ═══════════════════════════════════════════════════════════════════════════════
// SIGN-OUT BEHAVIORS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn given_scheduled_reminders_when_sign_out_then_all_cancelled_and_state_cleared() {
    // GIVEN
    let mut w = world();
    w.engine
        .on_snapshot(vec![daily("a", 8, 0), daily("b", 9, 0)])
        .await;

    // WHEN
    let report = w.engine.sign_out().await;

    // THEN
    assert_eq!(report.cancelled, vec![rid("a"), rid("b")]);
    assert!(w.alarms.pending().await.is_empty());
    assert!(w.engine.snapshot().scheduled.is_empty());

    // AND: a later pass has nothing to work with
    let after = w.engine.reconcile().await;
    assert_eq!(after.desired_count, 0);
}
