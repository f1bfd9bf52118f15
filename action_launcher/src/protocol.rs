//! # Line Protocol
//!
//! The host writes one JSON object per line to stdin and reads one JSON
//! object per line from the dedicated output descriptor.
//!
//! ## Requests
//!
//! The reserved key `value` carries the payload for the handler. Every other
//! top-level key is a side parameter that ends up in the
//! [`Environment`](crate::environment::Environment).
//!
//! ```json
//! {"value": {"name": "Ada"}, "hf_token": "abc"}
//! ```
//!
//! ## Responses
//!
//! Exactly one of:
//!
//! ```json
//! {"body": "Hello, Ada."}
//! {"error": "model not loaded"}
//! ```
//!
//! ## Readiness
//!
//! When the host asks for it, `{"ok":true}` is written once before the first
//! request is read.

use crate::error::{LauncherError, json_kind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Reserved request key holding the handler payload.
pub const VALUE_KEY: &str = "value";

/// Payload field added while setup is incomplete.
pub const SETUP_STATUS_KEY: &str = "setup_status";

/// Mapping handed to the handler for one invocation.
pub type Payload = Map<String, Value>;

/// Response written for every consumed request line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    Body(Value),
    Error(String),
}

impl Response {
    pub fn body(value: impl Into<Value>) -> Self {
        Response::Body(value.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    /// Interprets arbitrary handler output.
    ///
    /// A `{"body": ..}` or `{"error": "<string>"}` object is taken as-is;
    /// anything else becomes the body.
    pub fn from_handler_output(value: Value) -> Self {
        match serde_json::from_value::<Response>(value.clone()) {
            Ok(response) => response,
            Err(_) => Response::Body(value),
        }
    }

    /// Compact single-line JSON encoding, newline terminated.
    pub fn to_line(&self) -> Result<Vec<u8>, LauncherError> {
        let mut line = serde_json::to_vec(self).map_err(LauncherError::Encode)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// One decoded request line.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub payload: Payload,
    /// Side parameters in arrival order.
    pub params: Vec<(String, Value)>,
}

/// Decodes one request line. `line_number` is 1-based and only used for errors.
pub fn decode_request(line: &str, line_number: usize) -> Result<Request, LauncherError> {
    let parsed: Value = serde_json::from_str(line).map_err(|source| LauncherError::Protocol {
        line: line_number,
        source,
    })?;

    let Value::Object(fields) = parsed else {
        return Err(LauncherError::NotAnObject {
            line: line_number,
            kind: json_kind(&parsed),
        });
    };

    let mut payload = Payload::new();
    let mut params = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        if key == VALUE_KEY {
            payload = payload_from_value(value);
        } else {
            params.push((key, value));
        }
    }

    Ok(Request { payload, params })
}

fn payload_from_value(value: Value) -> Payload {
    match value {
        Value::Null => Payload::new(),
        Value::Object(map) => map,
        other => {
            let mut payload = Payload::new();
            payload.insert(VALUE_KEY.to_string(), other);
            payload
        }
    }
}

/// Writes one response line and flushes it.
pub async fn write_response<W>(out: &mut W, response: &Response) -> Result<(), LauncherError>
where
    W: AsyncWrite + Unpin,
{
    let line = response.to_line()?;
    out.write_all(&line).await.map_err(LauncherError::Output)?;
    out.flush().await.map_err(LauncherError::Output)
}

/// Emits the readiness line. Any failure here is fatal for the process.
pub async fn acknowledge_ready<W>(out: &mut W) -> Result<(), LauncherError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(&serde_json::json!({ "ok": true }))
        .map_err(LauncherError::Encode)?;
    line.push(b'\n');
    out.write_all(&line).await.map_err(LauncherError::Output)?;
    out.flush().await.map_err(LauncherError::Output)?;
    tracing::debug!("Readiness acknowledged");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_splits_value_and_params() {
        let request =
            decode_request(r#"{"value": {"name": "Ada"}, "hf_token": "abc"}"#, 1).unwrap();

        assert_eq!(request.payload.get("name"), Some(&json!("Ada")));
        assert_eq!(
            request.params,
            vec![("hf_token".to_string(), json!("abc"))]
        );
    }

    #[test]
    fn test_missing_or_null_value_is_empty_payload() {
        assert!(decode_request(r#"{"hf_token": "abc"}"#, 1)
            .unwrap()
            .payload
            .is_empty());
        assert!(decode_request(r#"{"value": null}"#, 1)
            .unwrap()
            .payload
            .is_empty());
    }

    #[test]
    fn test_scalar_value_wrapped() {
        let request = decode_request(r#"{"value": 42}"#, 1).unwrap();
        assert_eq!(request.payload.get("value"), Some(&json!(42)));
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let err = decode_request("{not json", 7).unwrap_err();
        assert!(matches!(err, LauncherError::Protocol { line: 7, .. }));
    }

    #[test]
    fn test_non_object_line_rejected() {
        let err = decode_request("[1, 2]", 3).unwrap_err();
        assert!(matches!(
            err,
            LauncherError::NotAnObject {
                line: 3,
                kind: "array"
            }
        ));
    }

    #[test]
    fn test_response_encoding() {
        let line = Response::body("Hello, Ada.").to_line().unwrap();
        assert_eq!(line, b"{\"body\":\"Hello, Ada.\"}\n");

        let line = Response::error("boom").to_line().unwrap();
        assert_eq!(line, b"{\"error\":\"boom\"}\n");
    }

    #[test]
    fn test_from_handler_output() {
        assert_eq!(
            Response::from_handler_output(json!({"body": [1, 2]})),
            Response::body(json!([1, 2]))
        );
        assert_eq!(
            Response::from_handler_output(json!({"error": "bad input"})),
            Response::error("bad input")
        );
        assert_eq!(
            Response::from_handler_output(json!({"label": "POSITIVE"})),
            Response::body(json!({"label": "POSITIVE"}))
        );
    }

    #[tokio::test]
    async fn test_acknowledge_ready_writes_single_line() {
        let mut out = Vec::new();
        acknowledge_ready(&mut out).await.unwrap();
        assert_eq!(out, b"{\"ok\":true}\n");
    }
}
