//! Supervisor controller: owns at most one running probe session.
//!
//! The controller is a small state machine over a single slot:
//!
//! - `Idle`: no probe running
//! - `Active`: a session task is streaming samples to the panel
//! - `Stopping`: a teardown is in flight; every `stop` caller awaits the
//!   same [`PendingStop`] and no new probe is spawned until it resolves
//!
//! The slot mutex is never held across an await.

use crate::config::{ProbeConfig, ShutdownConfig};
use crate::panel::{format_label, Panel};
use crate::session::{ProbeSession, SessionId, SessionReport};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared handle to the current or most recent stop operation.
pub type PendingStop = Shared<BoxFuture<'static, StopOutcome>>;

/// What a `stop` caller observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    Idle,
    /// The session was torn down.
    Stopped(SessionReport),
    /// The session task panicked or was aborted before reporting.
    Aborted(SessionId),
}

enum Slot {
    Idle,
    Active {
        id: SessionId,
        token: CancellationToken,
        task: JoinHandle<SessionReport>,
    },
    Stopping {
        id: SessionId,
        pending: PendingStop,
    },
}

struct State {
    slot: Slot,
    last_stop: Option<PendingStop>,
    next_id: u64,
}

struct Inner {
    panel: Arc<dyn Panel>,
    bounds: ShutdownConfig,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The session task finished without being stopped.
    fn session_ended(&self, id: SessionId) {
        let mut state = self.lock();
        if matches!(state.slot, Slot::Active { id: active, .. } if active == id) {
            tracing::debug!(session = %id, "controller idle after probe exit");
            state.slot = Slot::Idle;
        }
    }

    fn stop_finished(&self, id: SessionId) {
        let mut state = self.lock();
        if matches!(state.slot, Slot::Stopping { id: stopping, .. } if stopping == id) {
            state.slot = Slot::Idle;
        }
    }
}

/// Idempotent start/stop/restart over a single probe session.
///
/// Cheap to clone; clones share the same slot.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    pub fn new(panel: Arc<dyn Panel>, bounds: ShutdownConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                panel,
                bounds,
                state: Mutex::new(State {
                    slot: Slot::Idle,
                    last_stop: None,
                    next_id: 1,
                }),
            }),
        }
    }

    /// The running session, if any.
    #[cfg(test)]
    pub fn active_session(&self) -> Option<SessionId> {
        match self.inner.lock().slot {
            Slot::Active { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Spawn a probe for `probe` unless one is already running.
    ///
    /// Returns the active session id, or `None` if the probe failed to spawn.
    /// If a stop is in flight, waits for it to finish first.
    pub async fn start(&self, probe: &ProbeConfig) -> Option<SessionId> {
        loop {
            let pending = {
                let mut state = self.inner.lock();
                let pending = match &state.slot {
                    Slot::Active { id, .. } => {
                        tracing::debug!(session = %id, "probe already running, start ignored");
                        return Some(*id);
                    }
                    Slot::Stopping { pending, .. } => Some(pending.clone()),
                    Slot::Idle => None,
                };
                match pending {
                    Some(pending) => pending,
                    None => return self.spawn_session(&mut state, probe),
                }
            };
            tracing::debug!("start waiting for pending stop");
            pending.await;
        }
    }

    fn spawn_session(&self, state: &mut State, probe: &ProbeConfig) -> Option<SessionId> {
        let id = SessionId(state.next_id);
        state.next_id += 1;

        let session = match ProbeSession::open(id, probe, self.inner.bounds) {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(session = %id, host = %probe.host, error = %e, "failed to start probe");
                return None;
            }
        };

        let token = session.cancel_token();
        let inner = Arc::clone(&self.inner);
        let panel = Arc::clone(&self.inner.panel);
        let title = probe.title.clone();
        let task = tokio::spawn(async move {
            let report = session
                .run(|sample| panel.set_label(&format_label(&title, sample)))
                .await;
            inner.session_ended(id);
            report
        });

        tracing::info!(session = %id, host = %probe.host, "probe session active");
        state.slot = Slot::Active { id, token, task };
        state.last_stop = None;
        Some(id)
    }

    /// Cancel the running session and wait for its teardown.
    ///
    /// Concurrent callers share one teardown and observe the same outcome.
    /// Once idle, returns the outcome of the most recent stop.
    pub async fn stop(&self) -> StopOutcome {
        let pending = {
            let mut state = self.inner.lock();
            match std::mem::replace(&mut state.slot, Slot::Idle) {
                Slot::Idle => match &state.last_stop {
                    Some(last) => last.clone(),
                    None => return StopOutcome::Idle,
                },
                Slot::Stopping { id, pending } => {
                    tracing::debug!(session = %id, "stop already in flight, joining it");
                    state.slot = Slot::Stopping {
                        id,
                        pending: pending.clone(),
                    };
                    pending
                }
                Slot::Active { id, token, task } => {
                    tracing::info!(session = %id, "stopping probe session");
                    token.cancel();
                    let pending = self.teardown(id, task);
                    state.slot = Slot::Stopping {
                        id,
                        pending: pending.clone(),
                    };
                    state.last_stop = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Stop the current session, then start one for `probe`.
    pub async fn restart(&self, probe: &ProbeConfig) -> Option<SessionId> {
        let outcome = self.stop().await;
        tracing::debug!(?outcome, "restarting probe");
        self.start(probe).await
    }

    /// Await the session task in its own task, so teardown completes even if
    /// every stop caller goes away.
    fn teardown(&self, id: SessionId, task: JoinHandle<SessionReport>) -> PendingStop {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let outcome = match task.await {
                Ok(report) => StopOutcome::Stopped(report),
                Err(e) => {
                    tracing::error!(session = %id, error = %e, "probe session task failed");
                    StopOutcome::Aborted(id)
                }
            };
            inner.stop_finished(id);
            outcome
        });

        async move { handle.await.unwrap_or(StopOutcome::Aborted(id)) }
            .boxed()
            .shared()
    }
}
