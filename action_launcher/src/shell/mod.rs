//! # Shell Module
//!
//! Entry point and CLI for the `action_launcher` binary: argument parsing,
//! bootstrap (logging, configuration, handler loading, response channel) and
//! handing control to the dispatcher.

pub mod cli;

pub use cli::{Cli, bootstrap, launch, run};
