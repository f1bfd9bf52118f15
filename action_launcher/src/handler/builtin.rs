//! Greeting handlers bundled with the launcher.
//!
//! `hello` greets `name` from the payload. `hello-setup` does the same after a
//! setup phase that reports `count` progress levels (default 10), one per
//! configured step.

use super::{Capabilities, Handler, HandlerOptions};
use crate::{
    environment::Environment,
    protocol::{Payload, Response},
    status_store::StatusWriter,
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::{sync::Arc, time::Duration};

/// Names accepted by `--handler`.
pub const BUILTIN_NAMES: &[&str] = &["hello", "hello-setup"];

pub fn by_name(name: &str, options: &HandlerOptions) -> Option<Arc<dyn Handler>> {
    match name {
        "hello" => Some(Arc::new(HelloHandler)),
        "hello-setup" => Some(Arc::new(HelloSetupHandler::new(options.setup_step))),
        _ => None,
    }
}

fn greeting(payload: &Payload) -> String {
    let name = match payload.get("name") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "world".to_string(),
    };
    format!("Hello, {name}.")
}

/// Greets without any setup.
#[derive(Debug, Default)]
pub struct HelloHandler;

#[async_trait]
impl Handler for HelloHandler {
    fn name(&self) -> &str {
        "hello"
    }

    async fn main(&self, payload: Payload, _env: &Environment) -> Result<Response> {
        Ok(Response::body(greeting(&payload)))
    }
}

/// Greets once a slow setup has finished.
#[derive(Debug)]
pub struct HelloSetupHandler {
    step: Duration,
}

impl HelloSetupHandler {
    pub fn new(step: Duration) -> Self {
        Self { step }
    }
}

fn level_count(payload: &Payload) -> u64 {
    match payload.get("count") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(10),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(10),
        _ => 10,
    }
}

#[async_trait]
impl Handler for HelloSetupHandler {
    fn name(&self) -> &str {
        "hello-setup"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::with_setup()
    }

    async fn main(&self, payload: Payload, _env: &Environment) -> Result<Response> {
        Ok(Response::body(greeting(&payload)))
    }

    async fn setup(&self, payload: Payload, _env: &Environment, status: &StatusWriter) -> Result<()> {
        let levels = level_count(&payload);
        for level in 1..levels {
            tracing::info!("setup {level}");
            status.append(format!("setup level {level}"))?;
            tokio::time::sleep(self.step).await;
        }
        Ok(())
    }
}
