//! Error types for the SQL Tools service host.
//!
//! Errors fall into three layers: [`ParseError`] for a single malformed frame,
//! [`ChannelError`] for the byte transport, and [`HostError`] for everything the
//! dispatcher and service host report to their callers. [`RpcError`] is the
//! error object carried on the wire inside a ResponseError.

use crate::constants::{INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error object carried by a JSON-RPC ResponseError.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    /// Numeric error code.
    #[serde(default)]
    pub code: i64,

    /// Human readable description.
    pub message: String,

    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create an error with an explicit code.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Error sent back for a request naming an unregistered method.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// Error sent back when request params do not match the handler's shape.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    /// Error sent back for a structurally invalid request.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    /// Error sent back when a handler fails.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    /// Attach structured data to the error.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Convert a handler failure into a wire error.
    ///
    /// An `RpcError` or `HostError` inside the `anyhow::Error` keeps its own
    /// mapping; anything else becomes an internal error with the full context
    /// chain as its message.
    pub fn from_handler_error(err: &anyhow::Error) -> Self {
        if let Some(rpc) = err.downcast_ref::<RpcError>() {
            return rpc.clone();
        }
        if let Some(host) = err.downcast_ref::<HostError>() {
            return Self::from(host);
        }
        Self::internal(format!("{err:#}"))
    }
}

/// A frame that could not be interpreted as a JSON-RPC message.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload is not valid JSON.
    #[error("message is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// The payload is valid JSON but not an object.
    #[error("message is not a JSON object")]
    NotAnObject,

    /// A field required for the message shape is absent.
    #[error("message is missing required field '{0}'")]
    MissingField(&'static str),

    /// A field is present but holds an unusable value.
    #[error("field '{field}' has an invalid value: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Failures of the framed byte transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The peer closed the stream on a frame boundary.
    #[error("channel closed")]
    Closed,

    /// Reading or writing the underlying stream failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The header block ended without a Content-Length header.
    #[error("frame is missing the Content-Length header")]
    MissingContentLength,

    /// A header line could not be interpreted.
    #[error("invalid frame header: {0}")]
    InvalidHeader(String),

    /// The announced payload is larger than the configured limit.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge {
        /// Announced payload size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// An outbound message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The frame was intact but its payload was not a valid message.
    #[error("malformed message: {0}")]
    Parse(#[from] ParseError),
}

impl ChannelError {
    /// Whether the reader can skip this frame and keep going.
    ///
    /// Only parse failures leave the framing intact; every other error means
    /// the byte stream can no longer be trusted.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse(_))
    }
}

/// Errors reported by the dispatcher and the service host.
#[derive(Debug, Error)]
pub enum HostError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A handler for the method already exists and overriding was not allowed.
    #[error("a {kind} handler is already registered for '{method}'")]
    HandlerAlreadyRegistered {
        /// `"request"` or `"event"`.
        kind: &'static str,
        /// The contested method name.
        method: String,
    },

    /// `start` was called on a host that already owns a channel.
    #[error("host has already been started")]
    AlreadyStarted,

    /// The lifecycle does not allow the requested step.
    #[error("cannot move from {from} to {to}")]
    InvalidTransition {
        /// State the host was in.
        from: &'static str,
        /// State that was requested.
        to: &'static str,
    },

    /// The channel is gone; no further messages can be exchanged.
    #[error("connection closed")]
    ConnectionClosed,

    /// A terminal reply was already sent for this request.
    #[error("a response was already sent for request {id}")]
    ResponseAlreadySent {
        /// The request id.
        id: String,
    },

    /// The peer answered an outgoing request with a ResponseError.
    #[error("remote error: {0}")]
    Remote(RpcError),

    /// A payload could not be converted to or from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport failure.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HostError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error means the connection is unusable.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Channel(e) => !e.is_recoverable(),
            _ => false,
        }
    }
}

impl From<&HostError> for RpcError {
    fn from(e: &HostError) -> Self {
        match e {
            HostError::Remote(rpc) => rpc.clone(),
            HostError::Serialization(err) => RpcError::invalid_params(err.to_string()),
            HostError::Channel(ChannelError::Parse(err)) => {
                RpcError::invalid_request(err.to_string())
            }
            other => RpcError::internal(other.to_string()),
        }
    }
}

/// Convert HostError to the wire error for protocol responses.
impl From<HostError> for RpcError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::Remote(rpc) => rpc,
            other => RpcError::from(&other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_serialization_omits_empty_data() {
        let err = RpcError::method_not_found("bogus/op");
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["code"], METHOD_NOT_FOUND);
        assert_eq!(json["message"], "Method not found: bogus/op");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_rpc_error_tolerates_missing_code() {
        let err: RpcError = serde_json::from_str(r#"{"message":"boom"}"#).unwrap();
        assert_eq!(err.code, 0);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_handler_error_keeps_rpc_code() {
        let err = anyhow::Error::new(RpcError::invalid_params("bad owner uri"));
        let rpc = RpcError::from_handler_error(&err);
        assert_eq!(rpc.code, INVALID_PARAMS);
        assert_eq!(rpc.message, "bad owner uri");
    }

    #[test]
    fn test_handler_error_includes_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("failed to connect");
        let rpc = RpcError::from_handler_error(&err);
        assert_eq!(rpc.code, INTERNAL_ERROR);
        assert_eq!(rpc.message, "failed to connect: connection refused");
    }

    #[test]
    fn test_only_parse_errors_are_recoverable() {
        assert!(ChannelError::Parse(ParseError::NotAnObject).is_recoverable());
        assert!(!ChannelError::Closed.is_recoverable());
        assert!(!ChannelError::MissingContentLength.is_recoverable());
    }

    #[test]
    fn test_connection_errors() {
        assert!(HostError::ConnectionClosed.is_connection_error());
        assert!(HostError::Channel(ChannelError::Closed).is_connection_error());
        assert!(!HostError::config("x").is_connection_error());
    }

    #[test]
    fn test_remote_error_round_trips_to_wire() {
        let remote = RpcError::new(42, "nope");
        let wire: RpcError = HostError::Remote(remote.clone()).into();
        assert_eq!(wire, remote);
    }
}
