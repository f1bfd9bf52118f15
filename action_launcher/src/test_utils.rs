//! Test helpers shared by unit and integration tests.
//!
//! - [`ScriptedHandler`]: a handler whose behavior is driven by the payload
//!   and whose setup is configurable, counting every call.
//! - [`CountingStatusStore`]: an in-memory store that counts reads and writes.
//! - [`FailingStatusStore`]: an in-memory store whose reads fail on demand.
//! - [`response_lines`]: decodes captured response output.
//! - [`wait_for_condition`]: polls an async condition with a timeout.

use crate::{
    environment::Environment,
    error::StoreError,
    handler::{Capabilities, Handler},
    protocol::{Payload, Response},
    status_store::{MemoryStatusStore, SetupStatus, StatusStore, StatusWriter},
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::Notify;

/// Default timeout for waiting on background work in tests.
pub const CI_DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How [`ScriptedHandler::setup`] behaves.
#[derive(Debug, Clone)]
pub enum SetupScript {
    /// Appends each step, sleeping `delay` before each one, then succeeds.
    Steps { steps: Vec<String>, delay: Duration },
    /// Appends one step, then fails with `message`.
    Fail { message: String },
    /// Blocks until the notify fires, then succeeds.
    WaitFor(Arc<Notify>),
}

/// Handler driven by its payload.
///
/// `main` looks at the payload:
///
/// - `{"panic": "msg"}` panics with `msg`;
/// - `{"fail": "msg"}` returns an error with `msg`;
/// - `{"env": "NAME"}` returns the value of `NAME` from the environment;
/// - otherwise greets `name` (default `world`).
#[derive(Debug)]
pub struct ScriptedHandler {
    setup: Option<SetupScript>,
    main_calls: AtomicUsize,
    setup_calls: AtomicUsize,
}

impl ScriptedHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    pub fn with_setup(script: SetupScript) -> Arc<Self> {
        Arc::new(Self::build(Some(script)))
    }

    fn build(setup: Option<SetupScript>) -> Self {
        Self {
            setup,
            main_calls: AtomicUsize::new(0),
            setup_calls: AtomicUsize::new(0),
        }
    }

    pub fn main_calls(&self) -> usize {
        self.main_calls.load(Ordering::SeqCst)
    }

    pub fn setup_calls(&self) -> usize {
        self.setup_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for ScriptedHandler {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            setup: self.setup.is_some(),
        }
    }

    async fn main(&self, payload: Payload, env: &Environment) -> Result<Response> {
        self.main_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(Value::String(msg)) = payload.get("panic") {
            panic!("{}", msg);
        }
        if let Some(Value::String(msg)) = payload.get("fail") {
            bail!("{}", msg);
        }
        if let Some(Value::String(name)) = payload.get("env") {
            return Ok(match env.get(name) {
                Some(value) => Response::body(value),
                None => Response::body(Value::Null),
            });
        }
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("world");
        Ok(Response::body(format!("Hello, {name}.")))
    }

    async fn setup(&self, _payload: Payload, _env: &Environment, status: &StatusWriter) -> Result<()> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        match &self.setup {
            None => bail!("no setup configured"),
            Some(SetupScript::Steps { steps, delay }) => {
                for step in steps {
                    tokio::time::sleep(*delay).await;
                    status.append(step)?;
                }
                Ok(())
            }
            Some(SetupScript::Fail { message }) => {
                status.append("preparing")?;
                bail!("{}", message)
            }
            Some(SetupScript::WaitFor(notify)) => {
                notify.notified().await;
                Ok(())
            }
        }
    }
}

/// In-memory store that counts every call.
#[derive(Debug, Clone, Default)]
pub struct CountingStatusStore {
    inner: MemoryStatusStore,
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl CountingStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl StatusStore for CountingStatusStore {
    fn current_status(&self) -> Result<SetupStatus, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.current_status()
    }

    fn append_progress(&self, text: &str) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.append_progress(text)
    }

    fn mark_done(&self) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.mark_done()
    }
}

/// In-memory store whose first reads fail with [`StoreError::Poisoned`].
#[derive(Debug, Clone, Default)]
pub struct FailingStatusStore {
    inner: MemoryStatusStore,
    failing_reads: Arc<AtomicUsize>,
}

impl FailingStatusStore {
    /// Fails the next `count` reads.
    pub fn failing(count: usize) -> Self {
        let store = Self::default();
        store.failing_reads.store(count, Ordering::SeqCst);
        store
    }
}

impl StatusStore for FailingStatusStore {
    fn current_status(&self) -> Result<SetupStatus, StoreError> {
        let claimed = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if claimed.is_ok() {
            return Err(StoreError::Poisoned);
        }
        self.inner.current_status()
    }

    fn append_progress(&self, text: &str) -> Result<(), StoreError> {
        self.inner.append_progress(text)
    }

    fn mark_done(&self) -> Result<(), StoreError> {
        self.inner.mark_done()
    }
}

/// Decodes newline-separated JSON response output.
pub fn response_lines(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap_or(Value::Null))
        .collect()
}

/// Builds a request line from a payload and side parameters.
pub fn request_line(value: Value, params: &[(&str, &str)]) -> String {
    let mut object = serde_json::Map::new();
    object.insert("value".to_string(), value);
    for (key, param) in params {
        object.insert((*key).to_string(), Value::String((*param).to_string()));
    }
    let mut line = Value::Object(object).to_string();
    line.push('\n');
    line
}

/// Wait for an async condition to become true, polling at a fixed interval.
/// Returns true if the condition succeeds within the timeout.
pub async fn wait_for_condition<F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut condition: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if condition().await {
            return true;
        }

        if start.elapsed() >= timeout {
            return false;
        }

        tokio::time::sleep(interval).await;
    }
}
