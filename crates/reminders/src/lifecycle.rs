//! Sign-in/sign-out lifecycle around the engine actor.
//!
//! `SignedOut -> Attaching -> Active -> Detaching -> SignedOut`. Sign-in
//! spawns a fresh engine for the user and subscribes it to the user's
//! snapshots; the first snapshot makes the session `Active`. Sign-out
//! unsubscribes first, then lets the engine cancel every alarm it holds
//! before it stops.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use futures::StreamExt;
use im::HashSet;
use mealnudge_core::{Error, Result, ResultExt};
use ractor::ActorRef;
use ractor::concurrency::JoinHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info, warn};

use crate::actors::{
    EngineArguments, EngineMessage, request_schedule, request_sign_out, request_status,
    spawn_engine,
};
use crate::config::EngineConfig;
use crate::engine::{EnginePorts, EngineSnapshot};
use crate::model::{ReminderId, UserId};
use crate::retry::with_timeout;
use crate::types::{ScheduleStatus, SignOutReport, SystemSignal};

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    SignedOut,
    /// Engine spawned, waiting for the first snapshot.
    Attaching,
    Active,
    /// Tearing down; new events are dropped.
    Detaching,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignedOut => write!(f, "signed_out"),
            Self::Attaching => write!(f, "attaching"),
            Self::Active => write!(f, "active"),
            Self::Detaching => write!(f, "detaching"),
        }
    }
}

struct Session {
    user_id: UserId,
    engine: ActorRef<EngineMessage>,
    engine_handle: JoinHandle<()>,
    forwarder: tokio::task::JoinHandle<()>,
    /// Ids the engine may have registered; read after a kill.
    registrations: watch::Receiver<HashSet<ReminderId>>,
}

/// Owns the per-user engine and routes platform events to it.
pub struct LifecycleController {
    ports: EnginePorts,
    config: EngineConfig,
    timezone: RwLock<Tz>,
    state: Arc<watch::Sender<LifecycleState>>,
    session: Mutex<Option<Session>>,
}

impl LifecycleController {
    /// Create a signed-out controller.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the configuration doesn't validate.
    pub fn new(ports: EnginePorts, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let timezone = config.timezone()?;
        let (state, _) = watch::channel(LifecycleState::SignedOut);
        Ok(Self {
            ports,
            config,
            timezone: RwLock::new(timezone),
            state: Arc::new(state),
            session: Mutex::new(None),
        })
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch phase changes.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Wait until the controller reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` if `target` isn't reached within `limit`.
    pub async fn wait_for_state(&self, target: LifecycleState, limit: Duration) -> Result<()> {
        let mut receiver = self.state.subscribe();
        with_timeout("wait for lifecycle state", limit, async move {
            receiver
                .wait_for(|state| *state == target)
                .await
                .map(|_| ())
                .map_err(|_| Error::ChannelClosed)
        })
        .await
    }

    pub async fn timezone(&self) -> Tz {
        *self.timezone.read().await
    }

    pub async fn user_id(&self) -> Option<UserId> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.user_id.clone())
    }

    /// Start a session for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` unless signed out, and the spawn or
    /// subscription error otherwise. A failed sign-in leaves the controller
    /// signed out.
    pub async fn sign_in(&self, user_id: UserId) -> Result<()> {
        let mut session = self.session.lock().await;
        self.transition(LifecycleState::SignedOut, LifecycleState::Attaching)?;
        info!(user_id = %user_id, "Signing in");

        let attached = self.attach(user_id).await.inspect_error(|e| {
            warn!(error = %e, "Sign-in failed");
            self.state.send_replace(LifecycleState::SignedOut);
        })?;
        *session = Some(attached);
        Ok(())
    }

    async fn attach(&self, user_id: UserId) -> Result<Session> {
        let timezone = self.timezone().await;
        let (registry, registrations) = watch::channel(HashSet::new());
        let (engine, engine_handle) = spawn_engine(EngineArguments {
            user_id: user_id.clone(),
            ports: self.ports.clone(),
            timezone,
            config: self.config.clone(),
            registrations: Some(registry),
        })
        .await?;

        let subscription = with_timeout(
            "open snapshot stream",
            self.config.store_timeout(),
            self.ports.store.stream_preferences(&user_id),
        )
        .await;
        let mut snapshots = match subscription {
            Ok(stream) => stream,
            Err(e) => {
                engine.stop(Some("subscription failed".to_string()));
                return Err(e);
            }
        };

        let state = Arc::clone(&self.state);
        let target = engine.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(reminders) = snapshots.next().await {
                state.send_if_modified(|current| {
                    if *current == LifecycleState::Attaching {
                        *current = LifecycleState::Active;
                        true
                    } else {
                        false
                    }
                });
                if target
                    .send_message(EngineMessage::Snapshot { reminders })
                    .is_err()
                {
                    break;
                }
            }
            debug!("Snapshot forwarding ended");
        });

        Ok(Session {
            user_id,
            engine,
            engine_handle,
            forwarder,
            registrations,
        })
    }

    /// End the current session. A no-op when already signed out.
    ///
    /// The subscription is dropped before the engine cancels its alarms, so
    /// no snapshot can re-arm anything afterwards. An engine that doesn't
    /// drain within `sign_out_timeout` is killed and every id it may have
    /// registered is cancelled directly. The controller ends up signed out
    /// either way.
    ///
    /// # Errors
    ///
    /// Returns the engine's error when it had to be killed and some of its
    /// alarms could not be cancelled afterwards.
    pub async fn sign_out(&self) -> Result<SignOutReport> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.take() else {
            debug!("Sign-out while signed out");
            return Ok(SignOutReport::default());
        };

        self.state.send_replace(LifecycleState::Detaching);
        info!(user_id = %session.user_id, "Signing out");
        session.forwarder.abort();

        let limit = self.config.sign_out_timeout();
        let drained = request_sign_out(&session.engine, limit).await;
        if drained.is_err() {
            session.engine.kill();
        }
        if tokio::time::timeout(limit, session.engine_handle).await.is_err() {
            warn!(user_id = %session.user_id, "Engine did not stop in time");
        }

        let result = match drained {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(
                    user_id = %session.user_id,
                    error = %e,
                    "Engine not drained, cancelling its alarms directly"
                );
                let report = self.cancel_leftovers(&session.registrations).await;
                if report.failed.is_empty() {
                    Ok(report)
                } else {
                    Err(e)
                }
            }
        };

        self.state.send_replace(LifecycleState::SignedOut);
        info!(user_id = %session.user_id, "Signed out");
        result
    }

    async fn cancel_leftovers(
        &self,
        registrations: &watch::Receiver<HashSet<ReminderId>>,
    ) -> SignOutReport {
        let ids: BTreeSet<ReminderId> = registrations.borrow().iter().cloned().collect();
        let mut report = SignOutReport::default();
        for id in ids {
            let cancel = self.ports.alarms.cancel(&id);
            match with_timeout("alarm cancel", self.config.alarm_timeout(), cancel).await {
                Ok(()) => report.cancelled.push(id),
                Err(e) => {
                    warn!(reminder_id = %id, error = %e, "Leftover alarm could not be cancelled");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        report
    }

    /// Route a boot or timezone signal to the engine.
    ///
    /// A timezone change is remembered for later sessions. While attaching
    /// the signal still reaches the engine, ahead of its first snapshot.
    /// Signals while signed out or detaching are dropped; the next sign-in
    /// derives everything afresh.
    ///
    /// # Errors
    ///
    /// Returns `Error::ActorUnavailable` if the engine is gone.
    pub async fn on_system_signal(&self, signal: SystemSignal) -> Result<()> {
        if let SystemSignal::TimezoneChanged(timezone) = signal {
            *self.timezone.write().await = timezone;
        }
        if !matches!(
            self.state(),
            LifecycleState::Attaching | LifecycleState::Active
        ) {
            debug!(signal = ?signal, state = %self.state(), "Dropping signal without a session");
            return Ok(());
        }
        let Some(engine) = self.engine().await else {
            return Ok(());
        };
        engine
            .send_message(EngineMessage::Signal(signal))
            .map_err(|e| Error::actor_unavailable(e.to_string()))
    }

    /// Route a delivered alarm to the engine.
    ///
    /// # Errors
    ///
    /// Returns `Error::ActorUnavailable` if the engine is gone.
    pub async fn on_alarm_fired(&self, id: ReminderId) -> Result<()> {
        let Some(engine) = self.engine().await else {
            debug!(reminder_id = %id, "Alarm fired with no session");
            return Ok(());
        };
        engine
            .send_message(EngineMessage::Fired { id })
            .map_err(|e| Error::actor_unavailable(e.to_string()))
    }

    /// # Errors
    ///
    /// Returns `Error::ActorUnavailable` when signed out.
    pub async fn schedule_snapshot(&self) -> Result<EngineSnapshot> {
        let engine = self.require_engine().await?;
        request_schedule(&engine, self.config.store_timeout()).await
    }

    /// # Errors
    ///
    /// Returns `Error::ActorUnavailable` when signed out.
    pub async fn status(&self, id: &ReminderId) -> Result<Option<ScheduleStatus>> {
        let engine = self.require_engine().await?;
        request_status(&engine, id.clone(), self.config.store_timeout()).await
    }

    async fn engine(&self) -> Option<ActorRef<EngineMessage>> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.engine.clone())
    }

    async fn require_engine(&self) -> Result<ActorRef<EngineMessage>> {
        self.engine()
            .await
            .ok_or_else(|| Error::actor_unavailable("no active session"))
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        let mut moved = false;
        self.state.send_if_modified(|current| {
            if *current == from {
                *current = to;
                moved = true;
            }
            moved
        });
        if moved {
            Ok(())
        } else {
            Err(Error::invalid_transition(self.state().to_string(), to.to_string()))
        }
    }
}
