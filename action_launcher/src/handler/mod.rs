//! # Handlers
//!
//! A handler is the pluggable unit the launcher hosts. It must provide `main`
//! and may provide a one-time `setup`. Which optional operations exist is
//! recorded once, at bootstrap, in a [`Capabilities`] descriptor; the
//! dispatcher never re-checks it per request.
//!
//! Bundled handlers:
//!
//! - **`builtin`**: greeting handlers, with and without setup.
//! - **`exec`**: runs external commands described by a JSON manifest.

pub mod builtin;
pub mod exec;

use crate::{environment::Environment, protocol::Payload, protocol::Response};
use crate::status_store::StatusWriter;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::{path::PathBuf, sync::Arc, time::Duration};

/// Optional operations a handler implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub setup: bool,
}

impl Capabilities {
    pub fn with_setup() -> Self {
        Self { setup: true }
    }
}

/// The handler contract.
///
/// Both operations are async. Handlers that do heavy synchronous work should
/// move it onto `tokio::task::spawn_blocking` themselves.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Read once when the handler is loaded.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn main(&self, payload: Payload, env: &Environment) -> Result<Response>;

    /// One-time preparation. Only called when [`Capabilities::setup`] is set.
    async fn setup(&self, _payload: Payload, _env: &Environment, _status: &StatusWriter) -> Result<()> {
        bail!("handler '{}' does not implement setup", self.name())
    }
}

/// A handler plus the capability descriptor taken at load time.
#[derive(Clone)]
pub struct LoadedHandler {
    handler: Arc<dyn Handler>,
    capabilities: Capabilities,
}

impl LoadedHandler {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        let capabilities = handler.capabilities();
        tracing::info!(
            "Loaded handler '{}' (setup: {})",
            handler.name(),
            capabilities.setup
        );
        Self {
            handler,
            capabilities,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn name(&self) -> &str {
        self.handler.name()
    }
}

impl std::fmt::Debug for LoadedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedHandler")
            .field("name", &self.handler.name())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Where the handler comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerSource {
    /// A handler compiled into the binary, by name.
    Builtin(String),
    /// An external-command handler described by a JSON manifest.
    Manifest(PathBuf),
}

/// Knobs for the bundled handlers.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    /// Delay between progress levels of the `hello-setup` handler.
    pub setup_step: Duration,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            setup_step: Duration::from_secs(5),
        }
    }
}

/// Loads the handler at bootstrap. Any error here is fatal for the process.
pub fn load_handler(source: &HandlerSource, options: &HandlerOptions) -> Result<LoadedHandler> {
    let handler: Arc<dyn Handler> = match source {
        HandlerSource::Builtin(name) => builtin::by_name(name, options)
            .with_context(|| format!("Unknown built-in handler '{name}'"))?,
        HandlerSource::Manifest(path) => Arc::new(
            exec::ExecHandler::from_manifest_file(path)
                .with_context(|| format!("Failed to load handler manifest {}", path.display()))?,
        ),
    };
    Ok(LoadedHandler::new(handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_builtin_records_capabilities() {
        let plain = load_handler(
            &HandlerSource::Builtin("hello".to_string()),
            &HandlerOptions::default(),
        )
        .unwrap();
        assert!(!plain.capabilities().setup);

        let gated = load_handler(
            &HandlerSource::Builtin("hello-setup".to_string()),
            &HandlerOptions::default(),
        )
        .unwrap();
        assert!(gated.capabilities().setup);
    }

    #[test]
    fn test_unknown_builtin_is_bootstrap_error() {
        let err = load_handler(
            &HandlerSource::Builtin("sentiment".to_string()),
            &HandlerOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("sentiment"));
    }

    #[test]
    fn test_missing_manifest_is_bootstrap_error() {
        let err = load_handler(
            &HandlerSource::Manifest(PathBuf::from("/definitely/not/here.json")),
            &HandlerOptions::default(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read manifest"));
    }
}
