//! # Request Dispatcher
//!
//! The serialized main loop. For every input line:
//!
//! 1. decode the request (a malformed line stops the loop);
//! 2. install side parameters into the [`Environment`];
//! 3. if the handler has `setup` and it is not done, answer with the payload
//!    plus `setup_status` instead of calling `main`;
//! 4. otherwise call `main` through the fault isolation wrapper;
//! 5. flush diagnostics, then write and flush exactly one response line.
//!
//! Request N+1 is not read before the response to request N is flushed, so
//! responses come out in arrival order.

use crate::{
    environment::Environment,
    error::LauncherError,
    handler::LoadedHandler,
    isolation,
    protocol::{self, Request, Response, SETUP_STATUS_KEY},
    setup::{Gate, SetupCoordinator},
    status_store::StatusStore,
};
use serde_json::Value;
use std::{io::Write, sync::Arc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};

/// Counters reported when the control channel closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Request lines answered.
    pub requests: usize,
    /// Requests answered with a setup status instead of `main`.
    pub pending: usize,
    /// Requests answered with `{"error": ...}`.
    pub errors: usize,
}

/// Owns the handler, the environment context and the response channel.
pub struct Dispatcher<W> {
    handler: LoadedHandler,
    coordinator: Option<Arc<SetupCoordinator>>,
    env: Environment,
    output: W,
    lines_read: usize,
    summary: DispatchSummary,
}

impl<W> Dispatcher<W>
where
    W: AsyncWrite + Unpin,
{
    /// The store is only consulted when the handler declares `setup`.
    pub fn new(
        handler: LoadedHandler,
        store: Arc<dyn StatusStore>,
        env: Environment,
        output: W,
    ) -> Self {
        let coordinator = handler
            .capabilities()
            .setup
            .then(|| Arc::new(SetupCoordinator::new(store)));
        Self {
            handler,
            coordinator,
            env,
            output,
            lines_read: 0,
            summary: DispatchSummary::default(),
        }
    }

    pub fn coordinator(&self) -> Option<&Arc<SetupCoordinator>> {
        self.coordinator.as_ref()
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn summary(&self) -> DispatchSummary {
        self.summary
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Writes the readiness line.
    pub async fn acknowledge_ready(&mut self) -> Result<(), LauncherError> {
        protocol::acknowledge_ready(&mut self.output).await
    }

    /// Serves lines from `input` until end-of-stream.
    ///
    /// Returns an error on the first malformed line or when the response
    /// channel cannot be written. Before returning at end-of-stream, waits for
    /// a setup run this process started.
    pub async fn run<R>(&mut self, input: R) -> Result<DispatchSummary, LauncherError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await.map_err(LauncherError::Input)? {
            self.serve_line(&line).await?;
        }

        tracing::info!(
            "Control channel closed after {} requests ({} pending setup, {} errors)",
            self.summary.requests,
            self.summary.pending,
            self.summary.errors
        );

        if let Some(handle) = self.coordinator.as_ref().and_then(|c| c.handle())
            && !handle.is_finished()
        {
            tracing::info!("Waiting for setup to finish before exiting");
            let phase = handle.wait().await;
            tracing::info!("Setup ended: {:?}", phase);
        }

        Ok(self.summary)
    }

    /// Decodes, handles and answers one input line.
    pub async fn serve_line(&mut self, line: &str) -> Result<(), LauncherError> {
        self.lines_read += 1;
        let request = match protocol::decode_request(line, self.lines_read) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("Stopping: {}", e);
                return Err(e);
            }
        };

        let response = self.handle_request(request).await;
        self.emit(&response).await
    }

    /// Processes one decoded request and returns its response.
    pub async fn handle_request(&mut self, request: Request) -> Response {
        self.summary.requests += 1;
        let Request {
            mut payload,
            params,
        } = request;

        for (key, value) in &params {
            let name = self.env.install(key, value);
            tracing::debug!("Set {} from request parameter", name);
        }

        if let Some(coordinator) = &self.coordinator {
            match coordinator.gate(&self.handler, &payload, &self.env) {
                Ok(Gate::Ready) => {}
                Ok(Gate::Pending(status)) => {
                    self.summary.pending += 1;
                    payload.insert(SETUP_STATUS_KEY.to_string(), Value::String(status));
                    return Response::Body(Value::Object(payload));
                }
                Err(e) => {
                    tracing::error!("Could not read setup status: {}", e);
                    self.summary.errors += 1;
                    return Response::error(format!("setup status unavailable: {e}"));
                }
            }
        }

        let response = isolation::invoke_main(&self.handler, payload, &self.env).await;
        if response.is_error() {
            self.summary.errors += 1;
        }
        response
    }

    async fn emit(&mut self, response: &Response) -> Result<(), LauncherError> {
        // Diagnostics first, so the host never sees a response before its logs.
        if let Err(e) = std::io::stdout().flush() {
            tracing::debug!("stdout flush failed: {}", e);
        }
        if let Err(e) = std::io::stderr().flush() {
            tracing::debug!("stderr flush failed: {}", e);
        }
        protocol::write_response(&mut self.output, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::builtin::HelloHandler;
    use crate::status_store::MemoryStatusStore;

    fn hello_dispatcher() -> Dispatcher<Vec<u8>> {
        Dispatcher::new(
            LoadedHandler::new(Arc::new(HelloHandler)),
            Arc::new(MemoryStatusStore::new()),
            Environment::default(),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_hello_scenario() {
        let mut dispatcher = hello_dispatcher();
        let summary = dispatcher
            .run(&b"{\"value\": {\"name\": \"Ada\"}}\n"[..])
            .await
            .unwrap();

        assert_eq!(summary.requests, 1);
        assert_eq!(dispatcher.into_output(), b"{\"body\":\"Hello, Ada.\"}\n");
    }

    #[tokio::test]
    async fn test_no_setup_capability_means_no_coordinator() {
        let dispatcher = hello_dispatcher();
        assert!(dispatcher.coordinator().is_none());
    }

    #[tokio::test]
    async fn test_last_line_without_newline_is_served() {
        let mut dispatcher = hello_dispatcher();
        dispatcher
            .run(&b"{\"value\": {\"name\": \"A\"}}\n{\"value\": {\"name\": \"B\"}}"[..])
            .await
            .unwrap();

        assert_eq!(
            dispatcher.into_output(),
            b"{\"body\":\"Hello, A.\"}\n{\"body\":\"Hello, B.\"}\n"
        );
    }

    #[tokio::test]
    async fn test_malformed_line_stops_loop_after_earlier_responses() {
        let mut dispatcher = hello_dispatcher();
        let err = dispatcher
            .run(&b"{\"value\": {}}\nnot json\n{\"value\": {}}\n"[..])
            .await
            .unwrap_err();

        assert!(matches!(err, LauncherError::Protocol { line: 2, .. }));
        assert_eq!(dispatcher.summary().requests, 1);
        assert_eq!(dispatcher.into_output(), b"{\"body\":\"Hello, world.\"}\n");
    }
}
