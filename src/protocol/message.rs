//! JSON-RPC message model and wire codec.
//!
//! A [`Message`] keeps its payload as an untyped [`serde_json::Value`] until a
//! handler asks for a concrete shape through [`Message::typed_contents`], so the
//! dispatcher can route by method name without knowing parameter types.

use crate::constants::JSONRPC_VERSION;
use crate::error::{HostError, ParseError, RpcError};
use crate::protocol::contracts::{EventType, RequestType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Correlation token of a request.
///
/// Ids generated by this host are strings. Numeric ids sent by a peer are kept
/// as numbers so replies echo them in their original form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String id.
    String(String),
    /// Numeric id.
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

/// Discriminant of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Correlated call expecting one reply.
    Request,
    /// Successful reply.
    Response,
    /// Failed reply.
    ResponseError,
    /// Fire-and-forget notification.
    Event,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Request => write!(f, "request"),
            MessageKind::Response => write!(f, "response"),
            MessageKind::ResponseError => write!(f, "response_error"),
            MessageKind::Event => write!(f, "event"),
        }
    }
}

/// One JSON-RPC unit.
///
/// `contents` holds `params` for requests and events, `result` for responses
/// and the `error` object for response errors. `None` stands for an absent or
/// `null` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Correlated call.
    Request {
        /// Correlation id.
        id: RequestId,
        /// Method name.
        method: String,
        /// Raw params.
        contents: Option<Value>,
    },
    /// Successful reply to a request.
    Response {
        /// Id of the answered request.
        id: RequestId,
        /// Raw result.
        contents: Option<Value>,
    },
    /// Failed reply to a request.
    ResponseError {
        /// Id of the answered request.
        id: RequestId,
        /// Raw error object.
        contents: Option<Value>,
    },
    /// Notification without correlation.
    Event {
        /// Method name.
        method: String,
        /// Raw params.
        contents: Option<Value>,
    },
}

impl Message {
    /// Build a request for `request_type`.
    pub fn request<P: Serialize, R>(
        request_type: &RequestType<P, R>,
        id: impl Into<RequestId>,
        params: &P,
    ) -> Result<Self, HostError> {
        Ok(Message::Request {
            id: id.into(),
            method: request_type.method().to_string(),
            contents: to_contents(params)?,
        })
    }

    /// Build a successful response.
    pub fn response<R: Serialize>(id: impl Into<RequestId>, result: &R) -> Result<Self, HostError> {
        Ok(Message::Response {
            id: id.into(),
            contents: to_contents(result)?,
        })
    }

    /// Build an error response.
    pub fn response_error(id: impl Into<RequestId>, error: &RpcError) -> Result<Self, HostError> {
        Ok(Message::ResponseError {
            id: id.into(),
            contents: to_contents(error)?,
        })
    }

    /// Build an event for `event_type`.
    pub fn event<P: Serialize>(event_type: &EventType<P>, params: &P) -> Result<Self, HostError> {
        Ok(Message::Event {
            method: event_type.method().to_string(),
            contents: to_contents(params)?,
        })
    }

    /// Discriminant of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Request { .. } => MessageKind::Request,
            Message::Response { .. } => MessageKind::Response,
            Message::ResponseError { .. } => MessageKind::ResponseError,
            Message::Event { .. } => MessageKind::Event,
        }
    }

    /// Correlation id, absent for events.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request { id, .. }
            | Message::Response { id, .. }
            | Message::ResponseError { id, .. } => Some(id),
            Message::Event { .. } => None,
        }
    }

    /// Method name, absent for responses.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request { method, .. } | Message::Event { method, .. } => Some(method),
            Message::Response { .. } | Message::ResponseError { .. } => None,
        }
    }

    /// Raw untyped payload.
    pub fn contents(&self) -> Option<&Value> {
        match self {
            Message::Request { contents, .. }
            | Message::Response { contents, .. }
            | Message::ResponseError { contents, .. }
            | Message::Event { contents, .. } => contents.as_ref(),
        }
    }

    /// Resolve the payload into a concrete shape.
    ///
    /// An empty payload yields `T::default()`.
    pub fn typed_contents<T: DeserializeOwned + Default>(&self) -> Result<T, HostError> {
        match self.contents() {
            None => Ok(T::default()),
            Some(value) => Ok(T::deserialize(value)?),
        }
    }

    /// Error object of a response error.
    ///
    /// Returns `None` for other kinds. A malformed error object is reported
    /// as an internal error so the caller still learns the request failed.
    pub fn rpc_error(&self) -> Option<RpcError> {
        let Message::ResponseError { contents, .. } = self else {
            return None;
        };
        let parsed = contents
            .as_ref()
            .and_then(|value| RpcError::deserialize(value).ok());
        Some(parsed.unwrap_or_else(|| RpcError::internal("peer sent a malformed error object")))
    }

    /// Parse a raw frame payload.
    ///
    /// Field selection order: `jsonrpc` must be `"2.0"`; with an `id`, a
    /// `result` key means Response, then an `error` key means ResponseError,
    /// otherwise `method` is required for a Request. Without an `id` the frame
    /// must carry a `method` and is an Event.
    pub fn deserialize(raw: &[u8]) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_slice(raw).map_err(ParseError::InvalidJson)?;
        let Value::Object(mut fields) = value else {
            return Err(ParseError::NotAnObject);
        };

        match fields.get("jsonrpc") {
            None => return Err(ParseError::MissingField("jsonrpc")),
            Some(Value::String(version)) if version == JSONRPC_VERSION => {}
            Some(other) => {
                return Err(ParseError::InvalidField {
                    field: "jsonrpc",
                    reason: format!("expected \"{JSONRPC_VERSION}\", found {other}"),
                })
            }
        }

        let id = fields.remove("id").map(parse_id).transpose()?;

        let Some(id) = id else {
            let method = take_method(&mut fields)?;
            return Ok(Message::Event {
                method,
                contents: non_null(fields.remove("params")),
            });
        };

        if let Some(result) = fields.remove("result") {
            return Ok(Message::Response {
                id,
                contents: non_null(Some(result)),
            });
        }

        if let Some(error) = fields.remove("error") {
            return Ok(Message::ResponseError {
                id,
                contents: non_null(Some(error)),
            });
        }

        let method = take_method(&mut fields)?;
        Ok(Message::Request {
            id,
            method,
            contents: non_null(fields.remove("params")),
        })
    }

    /// Encode this message as a JSON payload.
    ///
    /// Only the fields relevant to the discriminant are emitted. Responses
    /// always carry `result`, which is `null` when empty.
    pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        let envelope = match self {
            Message::Request {
                id,
                method,
                contents,
            } => Envelope {
                id: Some(id),
                method: Some(method),
                params: contents.as_ref(),
                ..Envelope::default()
            },
            Message::Response { id, contents } => Envelope {
                id: Some(id),
                result: Some(contents.as_ref()),
                ..Envelope::default()
            },
            Message::ResponseError { id, contents } => Envelope {
                id: Some(id),
                error: Some(contents.as_ref()),
                ..Envelope::default()
            },
            Message::Event { method, contents } => Envelope {
                method: Some(method),
                params: contents.as_ref(),
                ..Envelope::default()
            },
        };
        serde_json::to_vec(&envelope)
    }
}

/// Wire layout shared by all message kinds.
#[derive(Serialize)]
struct Envelope<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Option<&'a Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Option<&'a Value>>,
}

impl Default for Envelope<'_> {
    fn default() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }
}

fn to_contents<T: Serialize + ?Sized>(value: &T) -> Result<Option<Value>, HostError> {
    Ok(non_null(Some(serde_json::to_value(value)?)))
}

fn non_null(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}

fn parse_id(value: Value) -> Result<RequestId, ParseError> {
    match value {
        Value::String(s) => Ok(RequestId::String(s)),
        Value::Number(n) => n.as_i64().map(RequestId::Number).ok_or(ParseError::InvalidField {
            field: "id",
            reason: format!("numeric id {n} is not an integer"),
        }),
        other => Err(ParseError::InvalidField {
            field: "id",
            reason: format!("expected a string or integer, found {other}"),
        }),
    }
}

fn take_method(fields: &mut Map<String, Value>) -> Result<String, ParseError> {
    match fields.remove("method") {
        None => Err(ParseError::MissingField("method")),
        Some(Value::String(method)) => Ok(method),
        Some(other) => Err(ParseError::InvalidField {
            field: "method",
            reason: format!("expected a string, found {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ConnectParams {
        owner_uri: String,
        timeout: Option<u32>,
    }

    const CONNECT: RequestType<ConnectParams, bool> = RequestType::new("connection/connect");
    const COMPLETE: EventType<ConnectParams> = EventType::new("connection/complete");

    fn parse(raw: Value) -> Result<Message, ParseError> {
        Message::deserialize(raw.to_string().as_bytes())
    }

    fn params() -> ConnectParams {
        ConnectParams {
            owner_uri: "file:///query.sql".to_string(),
            timeout: Some(15),
        }
    }

    #[test]
    fn test_round_trip_preserves_every_kind() {
        let messages = vec![
            Message::request(&CONNECT, "7", &params()).unwrap(),
            Message::response("7", &true).unwrap(),
            Message::response_error("7", &RpcError::internal("login failed")).unwrap(),
            Message::event(&COMPLETE, &params()).unwrap(),
        ];

        for message in messages {
            let raw = message.serialize().unwrap();
            let decoded = Message::deserialize(&raw).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_id_and_result_is_response() {
        let message = parse(json!({"jsonrpc": "2.0", "id": "1", "result": {"ok": true}})).unwrap();
        assert_eq!(message.kind(), MessageKind::Response);
        assert_eq!(message.id(), Some(&RequestId::from("1")));
    }

    #[test]
    fn test_null_result_is_still_response() {
        let message = parse(json!({"jsonrpc": "2.0", "id": "2", "result": null})).unwrap();
        assert_eq!(message.kind(), MessageKind::Response);
        assert_eq!(message.contents(), None);
    }

    #[test]
    fn test_result_wins_over_method() {
        let message = parse(json!({
            "jsonrpc": "2.0", "id": "3", "method": "x", "result": 1
        }))
        .unwrap();
        assert_eq!(message.kind(), MessageKind::Response);
    }

    #[test]
    fn test_id_and_error_is_response_error() {
        let message = parse(json!({
            "jsonrpc": "2.0", "id": "4", "error": {"code": -32601, "message": "nope"}
        }))
        .unwrap();
        assert_eq!(message.kind(), MessageKind::ResponseError);
        let error = message.rpc_error().unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "nope");
    }

    #[test]
    fn test_id_and_method_is_request() {
        let message = parse(json!({
            "jsonrpc": "2.0", "id": 5, "method": "query/execute", "params": {"ownerUri": "a"}
        }))
        .unwrap();
        assert_eq!(message.kind(), MessageKind::Request);
        assert_eq!(message.id(), Some(&RequestId::Number(5)));
        assert_eq!(message.method(), Some("query/execute"));
    }

    #[test]
    fn test_method_without_id_is_event() {
        let message = parse(json!({"jsonrpc": "2.0", "method": "exit"})).unwrap();
        assert_eq!(message.kind(), MessageKind::Event);
        assert_eq!(message.id(), None);
        assert_eq!(message.contents(), None);
    }

    #[test]
    fn test_missing_version_always_fails() {
        let frames = [
            json!({"id": "1", "result": 1}),
            json!({"id": "1", "error": {"code": 1, "message": "x"}}),
            json!({"id": "1", "method": "initialize"}),
            json!({"method": "exit"}),
        ];
        for frame in frames {
            assert!(matches!(
                parse(frame),
                Err(ParseError::MissingField("jsonrpc"))
            ));
        }
    }

    #[test]
    fn test_wrong_version_fails() {
        let result = parse(json!({"jsonrpc": "1.0", "method": "exit"}));
        assert!(matches!(
            result,
            Err(ParseError::InvalidField { field: "jsonrpc", .. })
        ));
    }

    #[test]
    fn test_missing_method_fails() {
        assert!(matches!(
            parse(json!({"jsonrpc": "2.0", "id": "1"})),
            Err(ParseError::MissingField("method"))
        ));
        assert!(matches!(
            parse(json!({"jsonrpc": "2.0", "params": {}})),
            Err(ParseError::MissingField("method"))
        ));
    }

    #[test]
    fn test_non_object_and_bad_json_fail() {
        assert!(matches!(
            Message::deserialize(b"[1,2]"),
            Err(ParseError::NotAnObject)
        ));
        assert!(matches!(
            Message::deserialize(b"{\"jsonrpc\":"),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_fractional_id_is_rejected() {
        let result = parse(json!({"jsonrpc": "2.0", "id": 1.5, "method": "x"}));
        assert!(matches!(result, Err(ParseError::InvalidField { field: "id", .. })));
    }

    #[test]
    fn test_serialize_emits_only_relevant_fields() {
        let event = Message::event(&EventType::<()>::new("exit"), &()).unwrap();
        let json: Value = serde_json::from_slice(&event.serialize().unwrap()).unwrap();
        assert_eq!(json, json!({"jsonrpc": "2.0", "method": "exit"}));

        let response = Message::response("2", &()).unwrap();
        let json: Value = serde_json::from_slice(&response.serialize().unwrap()).unwrap();
        assert_eq!(json, json!({"jsonrpc": "2.0", "id": "2", "result": null}));
    }

    #[test]
    fn test_typed_contents_is_lazy_and_defaults_when_empty() {
        let message = parse(json!({
            "jsonrpc": "2.0", "id": "1", "method": "connection/connect",
            "params": {"ownerUri": "file:///a.sql"}
        }))
        .unwrap();
        let typed: ConnectParams = message.typed_contents().unwrap();
        assert_eq!(typed.owner_uri, "file:///a.sql");
        assert_eq!(typed.timeout, None);

        let empty = parse(json!({"jsonrpc": "2.0", "id": "1", "method": "connection/connect"}))
            .unwrap();
        let typed: ConnectParams = empty.typed_contents().unwrap();
        assert_eq!(typed, ConnectParams::default());
    }

    #[test]
    fn test_typed_contents_reports_shape_mismatch() {
        let message = parse(json!({
            "jsonrpc": "2.0", "id": "1", "method": "connection/connect", "params": [1]
        }))
        .unwrap();
        let result: Result<ConnectParams, _> = message.typed_contents();
        assert!(matches!(result, Err(HostError::Serialization(_))));
    }

    #[test]
    fn test_numeric_id_round_trips_as_number() {
        let response = Message::response(RequestId::Number(12), &"ok").unwrap();
        let json: Value = serde_json::from_slice(&response.serialize().unwrap()).unwrap();
        assert_eq!(json["id"], json!(12));
    }
}
