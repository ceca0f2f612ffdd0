//! Centralized constants for the SQL Tools service host.
//!
//! This module contains the protocol markers, error codes and default values
//! used throughout the codebase, making them easy to find, understand, and modify.

use std::time::Duration;

// =============================================================================
// Protocol Constants
// =============================================================================

/// JSON-RPC protocol version marker carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Header carrying the payload length of a frame.
pub const CONTENT_LENGTH_HEADER: &str = "Content-Length";

/// Separator between the header block and the payload.
pub const HEADER_TERMINATOR: &str = "\r\n\r\n";

// =============================================================================
// Built-in Method Names
// =============================================================================

/// Initialize handshake request.
pub const INITIALIZE_METHOD: &str = "initialize";

/// Shutdown handshake request.
pub const SHUTDOWN_METHOD: &str = "shutdown";

/// Exit notification that terminates the read loop.
pub const EXIT_METHOD: &str = "exit";

/// Service version request.
pub const VERSION_METHOD: &str = "version";

// =============================================================================
// JSON-RPC Error Codes
// =============================================================================

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;

/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;

/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;

/// Internal error raised while handling a request.
pub const INTERNAL_ERROR: i64 = -32603;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default time the shutdown handshake waits for shutdown tasks, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 120;

/// Default shutdown timeout as Duration.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS);

// =============================================================================
// Transport Constants
// =============================================================================

/// Default upper bound for a single frame payload (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Initial capacity of the frame read buffer.
pub const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Longest accepted header line, terminator included.
pub const MAX_HEADER_LINE_LENGTH: usize = 8 * 1024;
