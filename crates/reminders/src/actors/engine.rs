//! Engine actor: the single consumer of snapshots, firings and signals.

use std::time::Duration;

use chrono_tz::Tz;
use mealnudge_core::{Error, Result};
use ractor::concurrency::JoinHandle;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef, MessagingErr};
use tracing::{debug, error, info, warn};

use super::messages::EngineMessage;
use crate::config::EngineConfig;
use crate::engine::{EnginePorts, EngineSnapshot, ReconciliationEngine, Registrations};
use crate::model::{ReminderId, UserId};
use crate::retry::calculate_backoff;
use crate::types::{FiredOutcome, ReconcileReport, ScheduleStatus, SignOutReport, SystemSignal};

pub struct EngineActorDef;

/// Arguments for spawning one user's engine.
pub struct EngineArguments {
    pub user_id: UserId,
    pub ports: EnginePorts,
    pub timezone: Tz,
    pub config: EngineConfig,
    /// Where to publish possibly registered ids, for cleanup after a kill.
    pub registrations: Option<Registrations>,
}

pub struct EngineState {
    engine: ReconciliationEngine,
    /// A delayed `RetryReconcile` is already on its way.
    retry_pending: bool,
}

impl Actor for EngineActorDef {
    type Msg = EngineMessage;
    type State = EngineState;
    type Arguments = EngineArguments;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> std::result::Result<Self::State, ActorProcessingErr> {
        info!(user_id = %args.user_id, timezone = %args.timezone, "Engine actor starting");
        let engine =
            ReconciliationEngine::new(args.user_id, args.ports, args.timezone, args.config);
        let engine = match args.registrations {
            Some(registrations) => engine.with_registrations(registrations),
            None => engine,
        };
        Ok(EngineState {
            engine,
            retry_pending: false,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        match message {
            EngineMessage::Snapshot { reminders } => {
                debug!(reminders = reminders.len(), "Snapshot received");
                let report = state.engine.on_snapshot(reminders).await;
                Self::schedule_retry(&myself, state, &report, 0);
            }

            EngineMessage::Fired { id } => match state.engine.on_fired(&id).await {
                FiredOutcome::Ignored => {}
                FiredOutcome::MarkFired { id } => {
                    Self::persist_fired(&myself, state, id, 0).await;
                }
                FiredOutcome::Rescheduled(report) => {
                    Self::schedule_retry(&myself, state, &report, 0);
                }
            },

            EngineMessage::Signal(signal) => {
                let timezone = match signal {
                    SystemSignal::BootCompleted => None,
                    SystemSignal::TimezoneChanged(tz) => Some(tz),
                };
                let report = state.engine.on_boot_or_timezone_change(timezone).await;
                Self::schedule_retry(&myself, state, &report, 0);
            }

            EngineMessage::RetryReconcile { attempt } => {
                state.retry_pending = false;
                let report = state.engine.reconcile().await;
                Self::schedule_retry(&myself, state, &report, attempt);
            }

            EngineMessage::RetryMarkFired { id, attempt } => {
                Self::persist_fired(&myself, state, id, attempt).await;
            }

            EngineMessage::SignOut { reply } => {
                let report = state.engine.sign_out().await;
                if reply.send(report).is_err() {
                    warn!("Sign-out caller went away before the reply");
                }
                myself.stop(Some("signed out".to_string()));
            }

            EngineMessage::GetSchedule { reply } => {
                let _ = reply.send(state.engine.snapshot());
            }

            EngineMessage::GetStatus { id, reply } => {
                let _ = reply.send(state.engine.status(&id));
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        info!(user_id = %state.engine.user_id(), "Engine actor stopped");
        Ok(())
    }
}

impl EngineActorDef {
    /// Queue a delayed pass if transient failures are left and the budget
    /// allows it.
    fn schedule_retry(
        myself: &ActorRef<EngineMessage>,
        state: &mut EngineState,
        report: &ReconcileReport,
        attempt: u32,
    ) {
        if !report.has_transient_failures() || state.retry_pending {
            return;
        }
        let config = state.engine.config();
        if attempt >= config.reconcile_retry_attempts {
            warn!(attempt, "Giving up on transient alarm failures until the next event");
            return;
        }

        let delay = calculate_backoff(
            attempt,
            config.retry_base_backoff_ms,
            config.retry_max_backoff_ms,
        );
        info!(attempt = attempt + 1, delay_ms = delay.as_millis(), "Scheduling reconcile retry");
        state.retry_pending = true;
        send_later(
            myself,
            delay,
            EngineMessage::RetryReconcile {
                attempt: attempt + 1,
            },
        );
    }

    /// Write the fired marker; on a transient failure try again later
    /// through the mailbox.
    async fn persist_fired(
        myself: &ActorRef<EngineMessage>,
        state: &EngineState,
        id: ReminderId,
        attempt: u32,
    ) {
        let Err(e) = state.engine.mark_fired(&id).await else {
            return;
        };

        let config = state.engine.config();
        let next = attempt + 1;
        if e.is_transient() && next < config.mark_fired_max_attempts {
            let delay = calculate_backoff(
                attempt,
                config.retry_base_backoff_ms,
                config.retry_max_backoff_ms,
            );
            warn!(
                reminder_id = %id,
                error = %e,
                attempt = next,
                "Fired marker write failed, retrying"
            );
            send_later(myself, delay, EngineMessage::RetryMarkFired { id, attempt: next });
        } else {
            error!(reminder_id = %id, error = %e, attempts = next, "Giving up on fired marker");
        }
    }
}

/// Deliver `message` to `target` after `delay` without blocking its mailbox.
fn send_later(target: &ActorRef<EngineMessage>, delay: Duration, message: EngineMessage) {
    let target = target.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if target.send_message(message).is_err() {
            debug!("Engine stopped before a delayed message arrived");
        }
    });
}

/// Spawn an engine actor for one signed-in user.
///
/// # Errors
///
/// Returns `Error::ActorUnavailable` if the actor fails to start.
pub async fn spawn_engine(
    args: EngineArguments,
) -> Result<(ActorRef<EngineMessage>, JoinHandle<()>)> {
    Actor::spawn(None, EngineActorDef, args)
        .await
        .map_err(|e| Error::actor_unavailable(format!("Failed to spawn engine: {e}")))
}

fn settle_call<T>(
    result: std::result::Result<CallResult<T>, MessagingErr<EngineMessage>>,
    operation: &str,
    limit: Duration,
) -> Result<T> {
    match result {
        Ok(CallResult::Success(value)) => Ok(value),
        Ok(CallResult::Timeout) => Err(Error::timeout(operation, limit)),
        Ok(CallResult::SenderError) => Err(Error::actor_unavailable(format!(
            "{operation}: engine dropped the reply"
        ))),
        Err(e) => Err(Error::actor_unavailable(format!("{operation}: {e}"))),
    }
}

/// Ask the engine for its schedule map and statuses.
///
/// # Errors
///
/// Returns `Error::Timeout` or `Error::ActorUnavailable`.
pub async fn request_schedule(
    engine: &ActorRef<EngineMessage>,
    limit: Duration,
) -> Result<EngineSnapshot> {
    let result = engine
        .call(|reply| EngineMessage::GetSchedule { reply }, Some(limit))
        .await;
    settle_call(result, "get schedule", limit)
}

/// Ask the engine for one reminder's status.
///
/// # Errors
///
/// Returns `Error::Timeout` or `Error::ActorUnavailable`.
pub async fn request_status(
    engine: &ActorRef<EngineMessage>,
    id: ReminderId,
    limit: Duration,
) -> Result<Option<ScheduleStatus>> {
    let result = engine
        .call(|reply| EngineMessage::GetStatus { id, reply }, Some(limit))
        .await;
    settle_call(result, "get status", limit)
}

/// Ask the engine to cancel everything and stop.
///
/// # Errors
///
/// Returns `Error::Timeout` or `Error::ActorUnavailable`.
pub async fn request_sign_out(
    engine: &ActorRef<EngineMessage>,
    limit: Duration,
) -> Result<SignOutReport> {
    let result = engine
        .call(|reply| EngineMessage::SignOut { reply }, Some(limit))
        .await;
    settle_call(result, "sign out", limit)
}
