//! UDP Transport
//!
//! Datagram-framed: one JSON-RPC message per packet, no line delimiter
//! needed. The peer address is learned from the first received packet and
//! reused for subsequent sends, since the gateway answers whoever last
//! spoke rather than brokering multiple simultaneous UDP peers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use super::{Transport, TransportError, TransportKind};

pub struct UdpTransport {
    bind_addr: SocketAddr,
    socket: Mutex<Option<UdpSocket>>,
    peer: Mutex<Option<SocketAddr>>,
    connected: AtomicBool,
}

impl UdpTransport {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            socket: Mutex::new(None),
            peer: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    async fn init(&self) -> Result<(), TransportError> {
        let socket = UdpSocket::bind(self.bind_addr).await?;
        *self.socket.lock().await = Some(socket);
        Ok(())
    }

    async fn send_raw(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        let socket_guard = self.socket.lock().await;
        let socket = socket_guard.as_ref().ok_or_else(TransportError::closed)?;
        let peer = self.peer.lock().await.ok_or_else(TransportError::closed)?;
        let sent = socket.send_to(bytes, peer).await?;
        Ok(sent)
    }

    async fn recv_raw(&self, buffer: &mut Vec<u8>, timeout: Duration) -> Result<usize, TransportError> {
        let socket_guard = self.socket.lock().await;
        let socket = socket_guard.as_ref().ok_or_else(TransportError::closed)?;
        let mut scratch = vec![0u8; 64 * 1024];
        match tokio::time::timeout(timeout, socket.recv_from(&mut scratch)).await {
            Ok(Ok((n, from))) => {
                *self.peer.lock().await = Some(from);
                buffer.extend_from_slice(&scratch[..n]);
                Ok(n)
            }
            Ok(Err(e)) => Err(TransportError::from(e)),
            Err(_) => Ok(0),
        }
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        *self.peer.lock().await = None;
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.disconnect().await?;
        *self.socket.lock().await = None;
        Ok(())
    }
}
