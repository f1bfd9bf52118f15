//! # Setup Coordinator
//!
//! Gates `main` behind a handler's one-time `setup` without blocking the
//! dispatcher. The first request that finds setup incomplete launches it on a
//! background task and gets a placeholder status back; later requests get the
//! full progress text from the [`StatusStore`] until the completion marker
//! appears.
//!
//! Rules:
//!
//! - at most one setup task per process, decided by the atomic `Idle → Running`
//!   transition of [`SetupPhaseMonitor`];
//! - a failed setup is not retried by the same process; the identity stays
//!   incomplete and every later request sees the failure in the status text;
//! - a record left "in progress" by an earlier process is stale and gets a
//!   fresh attempt, appended to the same log;
//! - once `Done` has been observed the coordinator answers from memory and
//!   never touches the store again.

use crate::{
    environment::Environment,
    error::StoreError,
    handler::LoadedHandler,
    isolation::{self, HandlerFailure},
    protocol::Payload,
    status_store::{SetupStatus, StatusStore, StatusWriter},
};
use action_common::{SetupPhase, SetupPhaseMonitor};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tokio::task::AbortHandle;

/// First line of every setup run, and the status handed to the launching request.
pub const SETUP_STARTED: &str = "Setup started.\n";

pub const SETUP_SUCCEEDED: &str = "Setup completed successfully.";

/// A rejected transition means another path (an abort) already ended the run.
fn note_transition(target: &str, result: Result<(), &'static str>) {
    if let Err(reason) = result {
        tracing::debug!("Setup phase kept, not moved to {}: {}", target, reason);
    }
}

/// Decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// Setup is done; invoke `main`.
    Ready,
    /// Setup is incomplete; answer with this status text instead of calling `main`.
    Pending(String),
}

/// Future-like handle to the background setup run.
#[derive(Debug, Clone)]
pub struct SetupHandle {
    monitor: SetupPhaseMonitor,
    store: Arc<dyn StatusStore>,
    abort: AbortHandle,
}

impl SetupHandle {
    /// Resolves with the terminal phase of the run.
    pub async fn wait(&self) -> SetupPhase {
        self.monitor.wait_for_terminal().await
    }

    pub fn is_finished(&self) -> bool {
        self.monitor.current().is_terminal()
    }

    pub fn phase(&self) -> SetupPhase {
        self.monitor.current()
    }

    /// Stops the run and records it as failed. No-op once the run has ended.
    pub fn abort(&self) {
        if self.is_finished() {
            return;
        }
        self.abort.abort();
        if self.monitor.fail("setup aborted").is_ok()
            && let Err(e) = self.store.append_progress("Setup aborted.")
        {
            tracing::warn!("Could not record setup abort: {}", e);
        }
    }
}

/// Owns the setup lifecycle for one code identity.
#[derive(Debug)]
pub struct SetupCoordinator {
    store: Arc<dyn StatusStore>,
    monitor: SetupPhaseMonitor,
    done: AtomicBool,
    handle: Mutex<Option<SetupHandle>>,
}

impl SetupCoordinator {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self {
            store,
            monitor: SetupPhaseMonitor::new(),
            done: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> SetupPhase {
        self.monitor.current()
    }

    pub fn monitor(&self) -> &SetupPhaseMonitor {
        &self.monitor
    }

    /// Handle of the run launched by this process, if any.
    pub fn handle(&self) -> Option<SetupHandle> {
        self.handle.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn remember_done(&self) -> Gate {
        if !self.done.swap(true, Ordering::AcqRel) {
            tracing::info!("Setup complete, requests now go to main");
        }
        Gate::Ready
    }

    /// Decides whether a request may call `main`, launching setup if needed.
    ///
    /// `payload` and `env` are handed to `setup` when this call launches it.
    pub fn gate(
        &self,
        handler: &LoadedHandler,
        payload: &Payload,
        env: &Environment,
    ) -> Result<Gate, StoreError> {
        if self.is_done() {
            return Ok(Gate::Ready);
        }

        let phase = self.monitor.current();
        if phase == SetupPhase::Succeeded {
            return Ok(self.remember_done());
        }

        let status = self.store.current_status()?;
        match (status, phase.is_launched()) {
            (SetupStatus::Done, _) => Ok(self.remember_done()),
            (SetupStatus::InProgress(text), true) => Ok(Gate::Pending(text)),
            (SetupStatus::NotStarted, true) => Ok(Gate::Pending(match phase {
                SetupPhase::Failed { error } => format!("{SETUP_STARTED}Setup failed: {error}\n"),
                _ => SETUP_STARTED.to_string(),
            })),
            (status, false) => {
                if let SetupStatus::InProgress(_) = status {
                    tracing::warn!(
                        "Found an unfinished setup record from an earlier process, starting a fresh attempt"
                    );
                }
                self.ensure_started(handler, payload.clone(), env.clone())?;
                Ok(Gate::Pending(SETUP_STARTED.to_string()))
            }
        }
    }

    /// Launches the background setup run unless this process already did.
    ///
    /// Returns the handle of the run, new or existing.
    pub fn ensure_started(
        &self,
        handler: &LoadedHandler,
        payload: Payload,
        env: Environment,
    ) -> Result<Option<SetupHandle>, StoreError> {
        if !self.monitor.begin() {
            return Ok(self.handle());
        }

        // Written before spawning so any later read is at least as long as the placeholder.
        if let Err(e) = self.store.append_progress(SETUP_STARTED) {
            note_transition("Failed", self.monitor.fail(e.to_string()));
            return Err(e);
        }

        let store = self.store.clone();
        let monitor = self.monitor.clone();
        let target = handler.handler().clone();
        let name = handler.name().to_string();

        let task = tokio::spawn(async move {
            let writer = StatusWriter::new(store.clone());
            let outcome = isolation::isolate(async move {
                target.setup(payload, &env, &writer).await
            })
            .await;
            let outcome = outcome.and_then(|()| store.mark_done().map_err(HandlerFailure::from));

            match outcome {
                Ok(()) => {
                    if let Err(e) = store.append_progress(SETUP_SUCCEEDED) {
                        tracing::warn!("Could not record setup success: {}", e);
                    }
                    tracing::info!("Setup for '{}' completed", name);
                    note_transition("Succeeded", monitor.succeed());
                }
                Err(failure) => {
                    let detail = failure.detail();
                    tracing::error!("Setup for '{}' failed: {}", name, detail);
                    if let Err(e) = store.append_progress(&format!("Setup failed: {detail}")) {
                        tracing::warn!("Could not record setup failure: {}", e);
                    }
                    note_transition("Failed", monitor.fail(detail));
                }
            }
        });

        let handle = SetupHandle {
            monitor: self.monitor.clone(),
            store: self.store.clone(),
            abort: task.abort_handle(),
        };
        if let Ok(mut slot) = self.handle.lock() {
            *slot = Some(handle.clone());
        }
        tracing::info!("Started setup for '{}'", handler.name());
        Ok(Some(handle))
    }
}
