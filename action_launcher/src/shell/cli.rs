//! # Action Launcher CLI
//!
//! Command-line definition and bootstrap. Everything that can fail before the
//! first request is read fails here, and is fatal.

use crate::{
    config::{DEBUG_VAR, LauncherConfig, env_flag_enabled},
    dispatcher::{DispatchSummary, Dispatcher},
    environment::{DEFAULT_ENV_PREFIX, Environment},
    handler::{builtin::BUILTIN_NAMES, load_handler},
    output::{DEFAULT_OUTPUT_FD, open_output_fd},
    status_store::{FileStatusStore, StatusStore},
    utils::logging::init_logging,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{io::IsTerminal, path::PathBuf, sync::Arc};
use tokio::io::{AsyncWrite, BufReader};

/// Action Launcher: hosts one action handler behind a line-oriented JSON protocol.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about,
    long_about = "action_launcher reads one JSON request per line on stdin and writes one JSON \
response per line to a dedicated descriptor (fd 3 by default).

Requests: {\"value\": {...payload...}, \"other_key\": \"side parameter\"}
Responses: {\"body\": ...} or {\"error\": \"...\"}

Examples:
  action_launcher --handler hello 3>responses.jsonl
  action_launcher --manifest ./action.json --wait-for-ack"
)]
pub struct Cli {
    /// Built-in handler to host (hello, hello-setup)
    #[arg(long)]
    pub handler: Option<String>,

    /// JSON manifest describing an external-command handler
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Descriptor responses are written to
    #[arg(long, default_value_t = DEFAULT_OUTPUT_FD)]
    pub output_fd: u32,

    /// Emit {"ok":true} before serving (also enabled by a non-empty __OW_WAIT_FOR_ACK)
    #[arg(long)]
    pub wait_for_ack: bool,

    /// Code identity keying the setup status record (defaults to __OW_CODE_HASH)
    #[arg(long)]
    pub code_hash: Option<String>,

    /// Directory holding setup status records (defaults to the system temp dir)
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Prefix for side parameters installed into the handler environment
    #[arg(long, default_value = DEFAULT_ENV_PREFIX)]
    pub env_prefix: String,

    /// Delay between progress levels of the hello-setup handler, in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub setup_step_ms: u64,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Log to a daily rolling file instead of stderr
    #[arg(long)]
    pub log_to_file: bool,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let debug = cli.debug || env_flag_enabled(std::env::var(DEBUG_VAR).ok().as_deref());
    let log_level = if debug { "debug" } else { "info" };
    init_logging(log_level, cli.log_to_file)?;

    if std::io::stdin().is_terminal() {
        tracing::warn!(
            "stdin is a terminal; action_launcher expects one JSON request per line from its host"
        );
    }

    let config = LauncherConfig::from_cli(&cli)?;
    let summary = launch(config).await?;
    tracing::info!("Served {} requests, exiting", summary.requests);
    Ok(())
}

/// Bootstraps against the real response descriptor and serves stdin.
pub async fn launch(config: LauncherConfig) -> Result<DispatchSummary> {
    let output = open_output_fd(config.output_fd)?;
    let mut dispatcher = bootstrap(&config, output)?;

    if config.wait_for_ack {
        dispatcher
            .acknowledge_ready()
            .await
            .context("Failed to acknowledge readiness")?;
    }

    let summary = dispatcher
        .run(BufReader::new(tokio::io::stdin()))
        .await
        .context("Request loop stopped")?;
    Ok(summary)
}

/// Loads the handler and wires a dispatcher writing to `output`.
pub fn bootstrap<W>(config: &LauncherConfig, output: W) -> Result<Dispatcher<W>>
where
    W: AsyncWrite + Unpin,
{
    let handler = load_handler(&config.handler, &config.handler_options).with_context(|| {
        format!(
            "Failed to load handler (built-in handlers: {})",
            BUILTIN_NAMES.join(", ")
        )
    })?;

    let store = FileStatusStore::new(&config.scratch_dir, &config.code_identity);
    if handler.capabilities().setup {
        tracing::info!(
            "Setup status for identity '{}' at {}",
            config.code_identity,
            store.log_path().display()
        );
    }
    let store: Arc<dyn StatusStore> = Arc::new(store);

    let env = Environment::from_process(config.env_prefix.as_str());
    Ok(Dispatcher::new(handler, store, env, output))
}
