//! # Action Launcher
//!
//! Invocation runtime for a single long-lived action process. The launcher
//! reads one JSON request per line on stdin, hands the payload to a pluggable
//! [`handler::Handler`], and writes exactly one JSON response line per request
//! to a dedicated output descriptor. Diagnostics go to stderr (or a log file),
//! never to the response channel.
//!
//! ## Modules
//!
//! - **`config`**: resolved runtime configuration (CLI flags plus environment).
//! - **`dispatcher`**: the serialized request loop.
//! - **`environment`**: the explicit key/value context handlers read side
//!   parameters from.
//! - **`error`**: typed errors for the library.
//! - **`handler`**: the handler contract, capability descriptor and bundled handlers.
//! - **`isolation`**: converts handler failures into error responses.
//! - **`output`**: opens the dedicated response descriptor.
//! - **`protocol`**: request decoding, responses and the readiness line.
//! - **`setup`**: the background setup coordinator.
//! - **`status_store`**: durable setup progress records.
//! - **`shell`**: binary entry point and CLI.

pub mod config;
pub mod dispatcher;
pub mod environment;
pub mod error;
pub mod handler;
pub mod isolation;
pub mod output;
pub mod protocol;
pub mod setup;
pub mod shell;
pub mod status_store;
pub mod test_utils;
pub mod utils;

pub use dispatcher::{DispatchSummary, Dispatcher};
pub use environment::Environment;
pub use error::LauncherError;
pub use handler::{Capabilities, Handler, LoadedHandler};
pub use protocol::{Payload, Response};
