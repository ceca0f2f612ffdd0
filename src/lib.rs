//! # SQL Tools Service Host
//!
//! The JSON-RPC hosting layer of the SQL Tools Service: a long-running
//! process that talks to an editor client over stdio using LSP-style framed
//! JSON-RPC 2.0 messages.
//!
//! This crate provides:
//! - **Transport**: `Content-Length` framed messages over any async byte stream
//! - **Dispatch**: typed request and event handlers, concurrent execution,
//!   correlation of outgoing requests with their replies
//! - **Lifecycle**: the `initialize` / `shutdown` / `exit` handshake with
//!   pluggable initialize and shutdown tasks
//!
//! ## Architecture
//!
//! A [`ServiceHost`] wraps a [`JsonRpcHost`]. Feature services register their
//! methods on the host and hook into the session lifecycle through the
//! service host; the binary wires it to stdin/stdout.

pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
mod handlers;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod telemetry;
pub mod transport;

pub use config::HostConfig;
pub use dispatcher::JsonRpcHost;
pub use error::{ChannelError, HostError, ParseError, RpcError};
pub use protocol::{
    EventContext, EventType, InitializeParams, InitializeResult, Message, MessageKind,
    RequestContext, RequestId, RequestType, ServerCapabilities,
};
pub use server::ServiceHost;
pub use state::HostState;
pub use transport::Channel;
