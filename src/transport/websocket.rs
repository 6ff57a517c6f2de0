//! WebSocket Transport
//!
//! One accepted `axum` websocket upgrade, split into a receive channel fed
//! by a background forwarding task and a direct sink handle for sends.
//! `axum::extract::ws` is the teacher's own stack choice for its HTTP
//! surface (`tower-http`/`axum` already in the dependency set), reused
//! here rather than pulling in a second websocket crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};

use super::{Transport, TransportError, TransportKind};

pub struct WebSocketTransport {
    outbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    inbound: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    connected: AtomicBool,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            outbound: Mutex::new(None),
            inbound: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Wires an accepted socket to this transport, spawning the task that
    /// pumps inbound text/binary frames into the `inbound` channel and
    /// outbound payloads from the `outbound` channel onto the socket.
    pub async fn bind(&self, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(64);
        let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(64);

        tokio::spawn(async move {
            while let Some(bytes) = out_rx.recv().await {
                if sink.send(Message::Text(String::from_utf8_lossy(&bytes).into_owned().into())).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                let bytes = match msg {
                    Message::Text(t) => t.into_bytes(),
                    Message::Binary(b) => b.to_vec(),
                    Message::Close(_) => break,
                    _ => continue,
                };
                if in_tx.send(bytes).await.is_err() {
                    break;
                }
            }
        });

        *self.outbound.lock().await = Some(out_tx);
        *self.inbound.lock().await = Some(in_rx);
        self.connected.store(true, Ordering::Relaxed);
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn init(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_raw(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        let guard = self.outbound.lock().await;
        let tx = guard.as_ref().ok_or_else(TransportError::closed)?;
        tx.send(bytes.to_vec())
            .await
            .map_err(|_| TransportError::closed())?;
        Ok(bytes.len())
    }

    async fn recv_raw(&self, buffer: &mut Vec<u8>, timeout: Duration) -> Result<usize, TransportError> {
        let mut guard = self.inbound.lock().await;
        let rx = guard.as_mut().ok_or_else(TransportError::closed)?;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(bytes)) => {
                let n = bytes.len();
                buffer.extend_from_slice(&bytes);
                Ok(n)
            }
            Ok(None) => Err(TransportError::closed()),
            Err(_) => Ok(0),
        }
    }

    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        *self.outbound.lock().await = None;
        *self.inbound.lock().await = None;
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.disconnect().await
    }
}
