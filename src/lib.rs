//! nano-gateway - Multi-transport JSON-RPC 2.0 gateway fronting an
//! on-device inference runtime
//!
//! This crate accepts JSON-RPC 2.0 requests over five wire encodings
//! (stdio, TCP, UDP, HTTP, WebSocket), dispatches them through a bounded
//! worker pool onto a native inference runtime contract, and streams
//! generated output back through whichever transport originated the call.
//!
//! # Architecture
//!
//! - **Protocol Layer** (`protocol`): JSON-RPC 2.0 wire types and the
//!   layered error taxonomy every other module maps into.
//! - **Transport Layer** (`transport`): stdio/TCP/UDP/HTTP/WebSocket
//!   adapters behind one narrow `Transport` trait.
//! - **Handle Pool** (`handles`): slot allocator for live native model
//!   handles.
//! - **Queue Layer** (`queue`): bounded lock-free request/response rings.
//! - **Native Runtime Contract** (`native`): the async trait the
//!   dispatcher calls through; binding a concrete accelerator library is
//!   out of scope.
//! - **Operation Dispatcher** (`dispatch`): the static method table and
//!   per-method handlers.
//! - **Streaming** (`streaming`): the single process-wide streaming
//!   context and callback fan-out.
//! - **HTTP Chunk Buffer** (`http_buffer`): poll-based delivery for the
//!   HTTP transport.
//! - **Recovery** (`recovery`): per-transport failure classification and
//!   exponential-backoff restart.
//! - **Worker Pool** (`worker`): the concurrent consumers draining the
//!   request queue.
//! - **Gateway** (`gateway`): the composition root wiring every subsystem
//!   together.
//!
//! ## Quick Start
//!
//! ```rust
//! use nano_gateway::protocol::{JsonRpcRequest, JsonRpcMessageTrait, RequestId};
//! use serde_json::json;
//!
//! let request = JsonRpcRequest::new(
//!     "is_running",
//!     Some(json!({"handle_id": 1})),
//!     RequestId::new_string("req-001")
//! );
//!
//! let json = request.to_json().unwrap();
//! let parsed = JsonRpcRequest::from_json(&json).unwrap();
//! assert_eq!(request, parsed);
//! ```

pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod handles;
pub mod http_buffer;
pub mod native;
pub mod protocol;
pub mod queue;
pub mod recovery;
pub mod streaming;
pub mod transport;
pub mod worker;

pub use config::GatewayConfig;
pub use gateway::Gateway;
pub use protocol::{
    GatewayError, HandleError, JsonRpcError, JsonRpcMessage, JsonRpcMessageTrait,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, NativeErrorKind, RecoveryError,
    RequestId,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the crate version as a string
///
/// # Examples
///
/// ```rust
/// println!("nano-gateway version: {}", nano_gateway::version());
/// ```
pub fn version() -> &'static str {
    VERSION
}
