//! Typed method descriptors and the built-in lifecycle contracts.

use crate::constants::{EXIT_METHOD, INITIALIZE_METHOD, SHUTDOWN_METHOD, VERSION_METHOD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// Names a request method and fixes its params and result types.
pub struct RequestType<P, R> {
    method: &'static str,
    _types: PhantomData<fn(P) -> R>,
}

impl<P, R> RequestType<P, R> {
    /// Describe a request method.
    pub const fn new(method: &'static str) -> Self {
        Self {
            method,
            _types: PhantomData,
        }
    }

    /// Method name on the wire.
    pub const fn method(&self) -> &'static str {
        self.method
    }
}

impl<P, R> Clone for RequestType<P, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, R> Copy for RequestType<P, R> {}

impl<P, R> fmt::Debug for RequestType<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestType")
            .field("method", &self.method)
            .finish()
    }
}

/// Names an event method and fixes its params type.
pub struct EventType<P> {
    method: &'static str,
    _types: PhantomData<fn(P)>,
}

impl<P> EventType<P> {
    /// Describe an event method.
    pub const fn new(method: &'static str) -> Self {
        Self {
            method,
            _types: PhantomData,
        }
    }

    /// Method name on the wire.
    pub const fn method(&self) -> &'static str {
        self.method
    }
}

impl<P> Clone for EventType<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for EventType<P> {}

impl<P> fmt::Debug for EventType<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventType")
            .field("method", &self.method)
            .finish()
    }
}

// =============================================================================
// Lifecycle contracts
// =============================================================================

/// `initialize`: handshake opening a session.
pub const INITIALIZE_REQUEST: RequestType<InitializeParams, InitializeResult> =
    RequestType::new(INITIALIZE_METHOD);

/// `shutdown`: asks the service to release its resources. Params are ignored.
pub const SHUTDOWN_REQUEST: RequestType<Value, ()> = RequestType::new(SHUTDOWN_METHOD);

/// `exit`: terminates the session.
pub const EXIT_EVENT: EventType<Value> = EventType::new(EXIT_METHOD);

/// `version`: reports the service version string.
pub const VERSION_REQUEST: RequestType<Value, String> = RequestType::new(VERSION_METHOD);

/// Params of the `initialize` request.
///
/// Only the fields the host itself looks at are typed; client capabilities
/// stay raw for feature services to inspect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeParams {
    /// Process id of the client, if it reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<i64>,

    /// Deprecated workspace root path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_path: Option<String>,

    /// Workspace root uri.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_uri: Option<String>,

    /// Client capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,

    /// Service-specific options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<Value>,

    /// Requested trace level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Features this service offers.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
}

/// How document changes are synchronised.
///
/// Serialized as the numeric LSP kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TextDocumentSyncKind {
    /// Documents are not synchronised.
    None,
    /// The full text is sent on every change.
    Full,
    /// Only the changed ranges are sent.
    Incremental,
}

impl From<TextDocumentSyncKind> for u8 {
    fn from(kind: TextDocumentSyncKind) -> Self {
        match kind {
            TextDocumentSyncKind::None => 0,
            TextDocumentSyncKind::Full => 1,
            TextDocumentSyncKind::Incremental => 2,
        }
    }
}

impl TryFrom<u8> for TextDocumentSyncKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Full),
            2 => Ok(Self::Incremental),
            other => Err(format!("unknown text document sync kind {other}")),
        }
    }
}

/// Completion support advertised by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionOptions {
    /// Whether completion items can be resolved lazily.
    pub resolve_provider: bool,
    /// Characters that trigger completion.
    pub trigger_characters: Vec<String>,
}

/// Capabilities advertised in the `initialize` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_document_sync: Option<TextDocumentSyncKind>,
    pub hover_provider: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_provider: Option<CompletionOptions>,
    pub definition_provider: bool,
    pub document_formatting_provider: bool,
    pub document_range_formatting_provider: bool,
    /// Free-form capabilities of feature services.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_method_names() {
        assert_eq!(INITIALIZE_REQUEST.method(), "initialize");
        assert_eq!(SHUTDOWN_REQUEST.method(), "shutdown");
        assert_eq!(EXIT_EVENT.method(), "exit");
        assert_eq!(VERSION_REQUEST.method(), "version");
    }

    #[test]
    fn test_initialize_params_accepts_partial_input() {
        let params: InitializeParams = serde_json::from_value(json!({
            "processId": 4242,
            "rootUri": "file:///work",
            "capabilities": {"textDocument": {}}
        }))
        .unwrap();

        assert_eq!(params.process_id, Some(4242));
        assert_eq!(params.root_uri.as_deref(), Some("file:///work"));
        assert!(params.root_path.is_none());
        assert!(params.capabilities.is_some());
    }

    #[test]
    fn test_default_result_has_capabilities_object() {
        let json = serde_json::to_value(InitializeResult::default()).unwrap();
        assert!(json["capabilities"].is_object());
        assert_eq!(json["capabilities"]["hoverProvider"], false);
    }

    #[test]
    fn test_sync_kind_is_numeric() {
        let caps = ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncKind::Incremental),
            ..ServerCapabilities::default()
        };
        let json = serde_json::to_value(&caps).unwrap();
        assert_eq!(json["textDocumentSync"], 2);

        let back: ServerCapabilities = serde_json::from_value(json).unwrap();
        assert_eq!(back, caps);
    }

    #[test]
    fn test_unknown_sync_kind_is_rejected() {
        let result: Result<ServerCapabilities, _> =
            serde_json::from_value(json!({"textDocumentSync": 9}));
        assert!(result.is_err());
    }
}
