//! Transport Abstraction Layer (spec §6.3)
//!
//! The gateway fronts five wire encodings behind one narrow trait:
//! stdio, TCP, UDP, HTTP (poll-based), and WebSocket. Each concrete
//! adapter lives in its own submodule; this module only defines the
//! shared `Transport` contract, the `TransportKind` discriminant the
//! streaming context and recovery supervisor key on, and the manager
//! that owns every active transport and dispatches stream chunks to
//! whichever one the streaming context names (spec §4.6).

pub mod error;
pub mod http;
pub mod stdio;
pub mod tcp;
pub mod udp;
pub mod websocket;

pub use error::TransportError;

use async_trait::async_trait;
use std::time::Duration;

/// Which wire encoding a transport instance speaks. Doubles as the key
/// the streaming context (`streaming::StreamingManager`) and recovery
/// supervisor (`recovery::RecoverySupervisor`) use to route back to a
/// concrete adapter, so its variants are fixed to the five named in
/// spec §1 rather than left open for future transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Stdio,
    Tcp,
    Udp,
    Http,
    WebSocket,
}

impl TransportKind {
    pub fn as_recovery_type(self) -> crate::recovery::TransportType {
        match self {
            Self::Stdio => crate::recovery::TransportType::Stdio,
            Self::Tcp => crate::recovery::TransportType::Tcp,
            Self::Udp => crate::recovery::TransportType::Udp,
            Self::Http => crate::recovery::TransportType::Http,
            Self::WebSocket => crate::recovery::TransportType::WebSocket,
        }
    }
}

/// The contract every concrete transport adapter implements (spec §6.3):
/// `init`, raw send/receive, connection lifecycle, and shutdown. Kept
/// deliberately narrow — framing and dispatch live above this layer.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn init(&self) -> Result<(), TransportError>;

    /// Writes `bytes` to the wire, returning the number of bytes sent.
    async fn send_raw(&self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Blocks up to `timeout` for the next inbound frame, or returns
    /// zero bytes read on a timeout (spec §6.3 `recv_raw(buffer,
    /// timeout_ms)`).
    async fn recv_raw(&self, buffer: &mut Vec<u8>, timeout: Duration) -> Result<usize, TransportError>;

    async fn connect(&self) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
    fn is_connected(&self) -> bool;

    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// Push-capable delivery for a single stream chunk, implemented
/// per-adapter (stdio/TCP/UDP/WebSocket write directly; HTTP instead
/// appends to [`crate::http_buffer::HttpBufferManager`] since it has no
/// open connection to push through — spec §4.6).
#[async_trait]
pub trait StreamSender: Send + Sync {
    async fn send_stream_chunk(&self, chunk: &crate::streaming::StreamChunk) -> Result<(), TransportError>;
}
