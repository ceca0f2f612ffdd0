//! JSON-RPC protocol model: messages, typed contracts and handler contexts.

pub mod context;
pub mod contracts;
pub mod message;

pub use context::{EventContext, MessageSender, RequestContext};
pub use contracts::{
    CompletionOptions, EventType, InitializeParams, InitializeResult, RequestType,
    ServerCapabilities, TextDocumentSyncKind, EXIT_EVENT, INITIALIZE_REQUEST, SHUTDOWN_REQUEST,
    VERSION_REQUEST,
};
pub use message::{Message, MessageKind, RequestId};
