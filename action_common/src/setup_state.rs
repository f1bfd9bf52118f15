//! Observable lifecycle of a handler's one-shot `setup` run.
//!
//! The phase is the single in-process source of truth for "has this process
//! already launched setup, and how did it end". It is backed by a
//! `tokio::sync::watch` channel so that waiters are notified on change instead
//! of polling.
//!
//! ```text
//! Idle ──begin()──▶ Running ──succeed()──▶ Succeeded
//!                      │
//!                      └────fail(error)───▶ Failed { error }
//! ```
//!
//! Both terminal phases are final: a process never runs setup twice.
//!
//! # Example
//!
//! ```rust
//! use action_common::setup_state::{SetupPhase, SetupPhaseMonitor};
//!
//! let monitor = SetupPhaseMonitor::new();
//! assert!(monitor.begin());
//! // A second caller loses the race and must not launch another run.
//! assert!(!monitor.begin());
//!
//! monitor.succeed().unwrap();
//! assert_eq!(monitor.current(), SetupPhase::Succeeded);
//! ```

use std::sync::Arc;
use tokio::sync::watch;

/// Phases of the setup run owned by one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupPhase {
    /// Setup has not been launched by this process.
    Idle,

    /// The background setup task is running.
    Running,

    /// Setup returned normally and the completion marker was written.
    Succeeded,

    /// Setup failed; the identity stays incomplete for this process lifetime.
    Failed { error: String },
}

impl SetupPhase {
    /// Returns true once the run has ended, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SetupPhase::Succeeded | SetupPhase::Failed { .. })
    }

    /// Returns true if a run has been launched at some point.
    pub fn is_launched(&self) -> bool {
        !matches!(self, SetupPhase::Idle)
    }
}

/// Watch-backed setup phase shared between the dispatcher and the setup task.
#[derive(Clone)]
pub struct SetupPhaseMonitor {
    sender: Arc<watch::Sender<SetupPhase>>,
    // Keeps the channel open even when nobody is subscribed.
    _receiver: watch::Receiver<SetupPhase>,
}

impl SetupPhaseMonitor {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(SetupPhase::Idle);
        Self {
            sender: Arc::new(sender),
            _receiver: receiver,
        }
    }

    /// Snapshot of the current phase.
    pub fn current(&self) -> SetupPhase {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SetupPhase> {
        self.sender.subscribe()
    }

    /// Atomically moves `Idle` to `Running`.
    ///
    /// Returns true for exactly one caller over the lifetime of the monitor;
    /// that caller owns the launch.
    pub fn begin(&self) -> bool {
        self.sender.send_if_modified(|phase| {
            if matches!(phase, SetupPhase::Idle) {
                *phase = SetupPhase::Running;
                true
            } else {
                false
            }
        })
    }

    /// Moves `Running` to `Succeeded`.
    pub fn succeed(&self) -> Result<(), &'static str> {
        let transitioned = self.sender.send_if_modified(|phase| {
            if matches!(phase, SetupPhase::Running) {
                *phase = SetupPhase::Succeeded;
                true
            } else {
                false
            }
        });
        if transitioned {
            Ok(())
        } else {
            Err("Can only succeed from Running")
        }
    }

    /// Moves `Running` to `Failed`.
    pub fn fail(&self, error: impl Into<String>) -> Result<(), &'static str> {
        let error = error.into();
        let transitioned = self.sender.send_if_modified(|phase| {
            if matches!(phase, SetupPhase::Running) {
                *phase = SetupPhase::Failed {
                    error: error.clone(),
                };
                true
            } else {
                false
            }
        });
        if transitioned {
            Ok(())
        } else {
            Err("Can only fail from Running")
        }
    }

    /// Waits for a terminal phase without polling.
    ///
    /// Resolves immediately if the run already ended. An `Idle` monitor is
    /// waited on like a running one, since a launch may still happen.
    pub async fn wait_for_terminal(&self) -> SetupPhase {
        let mut rx = self.sender.subscribe();
        loop {
            {
                let phase = rx.borrow_and_update();
                if phase.is_terminal() {
                    return phase.clone();
                }
            }
            if rx.changed().await.is_err() {
                // Sender lives in self, so this only happens during teardown.
                return self.current();
            }
        }
    }
}

impl Default for SetupPhaseMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SetupPhaseMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupPhaseMonitor")
            .field("phase", &*self.sender.borrow())
            .finish()
    }
}
