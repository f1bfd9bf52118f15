use std::path::PathBuf;

/// Errors that stop the dispatcher loop.
///
/// Handler failures are never represented here: they become `{"error": ...}`
/// responses and the loop keeps going.
#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    #[error("Malformed request on line {line}: {source}")]
    Protocol {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Request on line {line} is not a JSON object (got {kind})")]
    NotAnObject { line: usize, kind: &'static str },

    #[error("Failed to read from the control channel: {0}")]
    Input(#[source] std::io::Error),

    #[error("Failed to write to the response channel: {0}")]
    Output(#[source] std::io::Error),

    #[error("Failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors raised by a [`StatusStore`](crate::status_store::StatusStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Status store I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Status store lock poisoned")]
    Poisoned,
}

/// Errors loading a handler manifest at bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Manifest '{path}' has an empty command for '{operation}'")]
    EmptyCommand { path: PathBuf, operation: &'static str },
}

/// Short name of a JSON value's type, for error messages.
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
