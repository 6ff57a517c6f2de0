//! TCP Transport
//!
//! One accepted connection at a time, framed the same way as
//! [`super::stdio::StdioTransport`] (newline-delimited JSON) since the
//! wire payload is identical JSON-RPC text regardless of carrier.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use super::{Transport, TransportError, TransportKind};

pub struct TcpTransport {
    bind_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    stream: Mutex<Option<(BufReader<tokio::net::tcp::OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf)>>,
    connected: AtomicBool,
}

impl TcpTransport {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            listener: Mutex::new(None),
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    async fn init(&self) -> Result<(), TransportError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        *self.listener.lock().await = Some(listener);
        Ok(())
    }

    async fn send_raw(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut guard = self.stream.lock().await;
        let (_, writer) = guard.as_mut().ok_or_else(TransportError::closed)?;
        writer.write_all(bytes).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(bytes.len() + 1)
    }

    async fn recv_raw(&self, buffer: &mut Vec<u8>, timeout: Duration) -> Result<usize, TransportError> {
        let mut guard = self.stream.lock().await;
        let (reader, _) = guard.as_mut().ok_or_else(TransportError::closed)?;
        let mut line = String::new();
        match tokio::time::timeout(timeout, reader.read_line(&mut line)).await {
            Ok(Ok(0)) => Err(TransportError::closed()),
            Ok(Ok(n)) => {
                buffer.extend_from_slice(line.trim_end_matches('\n').as_bytes());
                Ok(n)
            }
            Ok(Err(e)) => Err(TransportError::from(e)),
            Err(_) => Ok(0),
        }
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let listener_guard = self.listener.lock().await;
        let listener = listener_guard.as_ref().ok_or_else(TransportError::closed)?;
        let (socket, _peer) = listener.accept().await?;
        let (read_half, write_half) = socket.into_split();
        *self.stream.lock().await = Some((BufReader::new(read_half), write_half));
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        *self.stream.lock().await = None;
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.disconnect().await?;
        *self.listener.lock().await = None;
        Ok(())
    }
}

