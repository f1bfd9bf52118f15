//! Fault isolation for handler code.
//!
//! Handler futures run on their own tokio task. A returned error or a panic
//! is turned into a [`HandlerFailure`]; neither can take the dispatcher down.

use crate::{
    environment::Environment,
    handler::LoadedHandler,
    protocol::{Payload, Response},
};
use std::{any::Any, future::Future};
use tokio::task::AbortHandle;

/// Why a handler operation did not complete normally.
#[derive(Debug, thiserror::Error)]
pub enum HandlerFailure {
    #[error("{0}")]
    Failed(anyhow::Error),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler task was cancelled")]
    Cancelled,
}

impl HandlerFailure {
    /// Full description including the error chain, for logs and status records.
    pub fn detail(&self) -> String {
        match self {
            HandlerFailure::Failed(e) => format!("{e:#}"),
            other => other.to_string(),
        }
    }
}

impl From<crate::error::StoreError> for HandlerFailure {
    fn from(e: crate::error::StoreError) -> Self {
        HandlerFailure::Failed(e.into())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Aborts the wrapped task if the waiter goes away first.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs `work` on its own task and folds errors and panics into `HandlerFailure`.
///
/// Dropping the returned future (for example when an enclosing task is
/// aborted) aborts `work` as well.
pub async fn isolate<F, T>(work: F) -> Result<T, HandlerFailure>
where
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::spawn(work);
    let _guard = AbortOnDrop(task.abort_handle());
    match task.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(HandlerFailure::Failed(e)),
        Err(join) if join.is_panic() => Err(HandlerFailure::Panicked(panic_message(
            join.into_panic(),
        ))),
        Err(_) => Err(HandlerFailure::Cancelled),
    }
}

/// Invokes `main` and always produces a response.
pub async fn invoke_main(handler: &LoadedHandler, payload: Payload, env: &Environment) -> Response {
    let target = handler.handler().clone();
    let env = env.clone();
    match isolate(async move { target.main(payload, &env).await }).await {
        Ok(response) => response,
        Err(failure) => {
            tracing::error!("Handler '{}' failed: {}", handler.name(), failure.detail());
            Response::error(failure.to_string())
        }
    }
}
