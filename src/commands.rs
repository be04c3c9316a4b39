//! Command execution logic.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc, Weekday};
use chrono_tz::Tz;
use itertools::Itertools;
use serde::Serialize;
use tracing::{info, warn};

use mealnudge_reminders::{
    EngineConfig, EnginePorts, InMemoryPreferenceStore, LifecycleController, LifecycleState,
    ManualClock, NextFire, RecordingAlarmPort, ReconciliationEngine, ReminderId,
    ReminderPreference, Repetition, ScheduleStatus, SystemClock, TokioAlarmPort, UserId,
    next_fire_instant, parse_timezone,
};

use crate::cli::{Commands, RepeatKind};

/// Execute a CLI command.
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Next {
            hour,
            minute,
            repeat,
            days,
            fired,
            tz,
            at,
        } => cmd_next(hour, minute, repeat, &days, fired, tz.as_deref(), at.as_deref()),
        Commands::Plan {
            reminders,
            config,
            tz,
            at,
        } => cmd_plan(&reminders, config.as_deref(), tz.as_deref(), at.as_deref()).await,
        Commands::Run {
            reminders,
            config,
            user,
        } => cmd_run(&reminders, config.as_deref(), user).await,
    }
}

fn cmd_next(
    hour: u8,
    minute: u8,
    repeat: RepeatKind,
    days: &[String],
    fired: bool,
    tz: Option<&str>,
    at: Option<&str>,
) -> Result<()> {
    let repetition = build_repetition(repeat, days)?;
    let reminder = ReminderPreference::new(hour, minute, repetition, "").with_fired(fired);
    let timezone = tz.map_or(Ok(Tz::UTC), parse_timezone)?;
    let now = resolve_now(at)?;

    let next = next_fire_instant(&reminder, now, timezone)
        .context("Reminder cannot be scheduled")?;
    println!("{}", describe_next(next, timezone));
    Ok(())
}

async fn cmd_plan(
    reminders: &Path,
    config: Option<&Path>,
    tz: Option<&str>,
    at: Option<&str>,
) -> Result<()> {
    let reminders = load_reminders(reminders)?;
    let config = load_config(config)?;
    let timezone = match tz {
        Some(name) => parse_timezone(name)?,
        None => config.timezone()?,
    };
    let now = resolve_now(at)?;

    let plan = build_plan(reminders, config, timezone, now).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&plan).context("Failed to render plan")?
    );
    Ok(())
}

async fn cmd_run(reminders: &Path, config: Option<&Path>, user: String) -> Result<()> {
    let reminders = load_reminders(reminders)?;
    let config = load_config(config)?;
    let user_id = UserId::new(user);

    let store = Arc::new(InMemoryPreferenceStore::new());
    let seeded = store.seed(&user_id, reminders).await;
    info!(user = %user_id, count = seeded.len(), "Seeded reminders");

    let (alarms, mut fired) = TokioAlarmPort::new();
    let ports = EnginePorts {
        store: store.clone(),
        alarms: Arc::new(alarms),
        clock: Arc::new(SystemClock),
    };
    let attach_limit = config.store_timeout();
    let controller = LifecycleController::new(ports, config)?;

    controller.sign_in(user_id.clone()).await?;
    controller
        .wait_for_state(LifecycleState::Active, attach_limit)
        .await
        .context("Session did not become active")?;

    let schedule = controller.schedule_snapshot().await?;
    for (id, at) in schedule.scheduled_sorted() {
        info!(id = %id, at = %at.with_timezone(&schedule.timezone), "Alarm armed");
    }

    info!("Delivering reminders, press Ctrl-C to stop");
    loop {
        tokio::select! {
            maybe_id = fired.recv() => {
                let Some(id) = maybe_id else {
                    warn!("Alarm channel closed");
                    break;
                };
                if let Some(reminder) = store.get(&user_id, &id).await {
                    info!(
                        id = %id,
                        category = %reminder.category,
                        "Reminder due: {}",
                        reminder.message
                    );
                }
                if let Err(e) = controller.on_alarm_fired(id).await {
                    warn!(error = %e, "Failed to hand firing to the engine");
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted");
                break;
            }
        }
    }

    let report = controller.sign_out().await?;
    info!(
        cancelled = report.cancelled.len(),
        failed = report.failed.len(),
        "Signed out"
    );
    Ok(())
}

/// One reminder's row in a plan.
#[derive(Debug, Serialize)]
pub struct PlannedReminder {
    pub id: ReminderId,
    pub message: String,
    pub schedule: Option<ScheduleStatus>,
    /// Fire instant rendered in the plan's timezone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<String>,
}

/// Output of a single reconciliation pass.
#[derive(Debug, Serialize)]
pub struct Plan {
    pub timezone: String,
    pub evaluated_at: DateTime<Utc>,
    pub armed: usize,
    pub failed: usize,
    pub reminders: Vec<PlannedReminder>,
}

/// Reconcile `reminders` against an empty alarm set at `now`.
///
/// Reminders without an id get a positional one so they show up in the plan.
pub async fn build_plan(
    reminders: Vec<ReminderPreference>,
    config: EngineConfig,
    timezone: Tz,
    now: DateTime<Utc>,
) -> Plan {
    let reminders = reminders
        .into_iter()
        .enumerate()
        .map(|(n, reminder)| {
            if reminder.id.is_empty() {
                reminder.with_id(ReminderId::new(format!("reminder-{}", n + 1)))
            } else {
                reminder
            }
        })
        .collect_vec();

    let ports = EnginePorts {
        store: Arc::new(InMemoryPreferenceStore::new()),
        alarms: Arc::new(RecordingAlarmPort::new()),
        clock: Arc::new(ManualClock::new(now)),
    };
    let mut engine = ReconciliationEngine::new(UserId::new("plan"), ports, timezone, config);
    let report = engine.on_snapshot(reminders.clone()).await;

    let rows = reminders
        .into_iter()
        .map(|reminder| {
            let schedule = engine.status(&reminder.id);
            let local = match &schedule {
                Some(ScheduleStatus::Scheduled { at, .. }) => {
                    Some(at.with_timezone(&timezone).to_rfc3339())
                }
                _ => None,
            };
            PlannedReminder {
                id: reminder.id,
                message: reminder.message,
                schedule,
                local,
            }
        })
        .sorted_by(|a, b| a.id.cmp(&b.id))
        .collect_vec();

    Plan {
        timezone: timezone.name().to_string(),
        evaluated_at: now,
        armed: report.scheduled_count,
        failed: report.actions_failed.len(),
        reminders: rows,
    }
}

fn build_repetition(repeat: RepeatKind, days: &[String]) -> Result<Repetition> {
    match repeat {
        RepeatKind::Once => Ok(Repetition::Once),
        RepeatKind::Daily => Ok(Repetition::Daily),
        RepeatKind::Weekly => {
            let days = days
                .iter()
                .map(|day| {
                    day.trim()
                        .parse::<Weekday>()
                        .map_err(|_| anyhow!("Unknown weekday '{day}'"))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Repetition::weekly(days))
        }
    }
}

fn describe_next(next: NextFire, timezone: Tz) -> String {
    match next {
        NextFire::At(at) => format!(
            "{} ({} {})",
            at.to_rfc3339(),
            at.with_timezone(&timezone).format("%Y-%m-%d %H:%M %Z"),
            timezone.name()
        ),
        NextFire::Terminal => "terminal".to_string(),
    }
}

fn resolve_now(at: Option<&str>) -> Result<DateTime<Utc>> {
    at.map_or_else(
        || Ok(Utc::now()),
        |raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|at| at.with_timezone(&Utc))
                .with_context(|| format!("Invalid RFC 3339 instant '{raw}'"))
        },
    )
}

fn load_reminders(path: &Path) -> Result<Vec<ReminderPreference>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read reminders from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse reminders in {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}
