//! Shared building blocks for the action launcher.
//!
//! - **`setup_state`**: observable lifecycle of the one-shot `setup` run.

pub mod setup_state;

pub use setup_state::{SetupPhase, SetupPhaseMonitor};
