//! In-process alarm facility on tokio timers.
//!
//! Each registration is a sleeping task. When it wakes it pushes the reminder
//! id onto an unbounded channel, which the caller drains and forwards to the
//! engine. Registrations die with the process, like platform alarms die with
//! a reboot.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mealnudge_core::{Error, Result};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::alarm::{AlarmPort, AlarmPrecision};
use crate::clock::{Clock, SystemClock};
use crate::model::ReminderId;

/// Receives the id of every alarm that fires.
pub type FiredReceiver = mpsc::UnboundedReceiver<ReminderId>;

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

type Timers = Arc<Mutex<HashMap<ReminderId, Timer>>>;

pub struct TokioAlarmPort {
    timers: Timers,
    fired_tx: mpsc::UnboundedSender<ReminderId>,
    clock: Arc<dyn Clock>,
    generation: AtomicU64,
}

impl TokioAlarmPort {
    /// Create a port on the wall clock, plus the receiver for firings.
    pub fn new() -> (Self, FiredReceiver) {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a port that measures delays against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> (Self, FiredReceiver) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let port = Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            fired_tx,
            clock,
            generation: AtomicU64::new(0),
        };
        (port, fired_rx)
    }

    /// Number of registrations still waiting to fire.
    pub async fn pending_count(&self) -> usize {
        self.timers.lock().await.len()
    }
}

#[async_trait]
impl AlarmPort for TokioAlarmPort {
    async fn schedule(
        &self,
        id: &ReminderId,
        at: DateTime<Utc>,
        payload: &str,
        precision: AlarmPrecision,
    ) -> Result<()> {
        if self.fired_tx.is_closed() {
            return Err(Error::alarm_unavailable("fired receiver dropped"));
        }

        let delay = (at - self.clock.now()).to_std().unwrap_or_default();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let timers = Arc::clone(&self.timers);
        let fired_tx = self.fired_tx.clone();
        let fired_id = id.clone();
        let payload = payload.to_string();

        // Held across spawn and insert so a zero-delay timer finds its own entry.
        let mut registered = self.timers.lock().await;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut timers = timers.lock().await;
                if !timers
                    .get(&fired_id)
                    .is_some_and(|t| t.generation == generation)
                {
                    debug!(reminder_id = %fired_id, "Superseded timer woke up");
                    return;
                }
                timers.remove(&fired_id);
            }
            info!(reminder_id = %fired_id, payload = %payload, "Alarm fired");
            let _ = fired_tx.send(fired_id);
        });
        if let Some(previous) = registered.insert(id.clone(), Timer { generation, handle }) {
            previous.handle.abort();
        }
        drop(registered);

        debug!(reminder_id = %id, at = %at, precision = %precision, "Alarm registered");
        Ok(())
    }

    async fn cancel(&self, id: &ReminderId) -> Result<()> {
        if let Some(timer) = self.timers.lock().await.remove(id) {
            timer.handle.abort();
            debug!(reminder_id = %id, "Alarm cancelled");
        }
        Ok(())
    }

    fn supports_inexact(&self) -> bool {
        true
    }
}
