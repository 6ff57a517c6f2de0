//! HTTP Transport
//!
//! HTTP is poll-based (spec §4.7), not a persistent duplex stream: a
//! client POSTs a request, then separately polls for streamed chunks
//! accumulated in [`crate::http_buffer::HttpBufferManager`]. There is no
//! long-lived connection for `send_raw`/`recv_raw` to operate on — those
//! two are not meaningful here and return `TransportError::Closed`; the
//! actual request/response and poll routes are plain `axum` handlers
//! wired up by the gateway, not driven through this trait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Transport, TransportError, TransportKind};

pub struct HttpTransport {
    ready: AtomicBool,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn init(&self) -> Result<(), TransportError> {
        self.ready.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn send_raw(&self, _bytes: &[u8]) -> Result<usize, TransportError> {
        Err(TransportError::other(
            "HTTP transport is poll-based; use the chunk-buffer poll route instead of send_raw",
        ))
    }

    async fn recv_raw(&self, _buffer: &mut Vec<u8>, _timeout: Duration) -> Result<usize, TransportError> {
        Err(TransportError::other(
            "HTTP transport is poll-based; requests arrive through the axum route, not recv_raw",
        ))
    }

    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.ready.store(false, Ordering::Relaxed);
        Ok(())
    }
}
