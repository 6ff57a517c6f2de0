//! STDIO Transport
//!
//! Newline-delimited JSON over the process's own stdin/stdout, grounded in
//! the teacher's `transport::stdio::StdioTransport` (same framing, same
//! `BufReader<Stdin>` + `Stdout` pairing), stripped of the teacher's buffer
//! pooling machinery since a single long-lived process stream never needs
//! per-message allocation reuse here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;

use super::{Transport, TransportError, TransportKind};

pub struct StdioTransport {
    reader: Mutex<BufReader<Stdin>>,
    writer: Mutex<Stdout>,
    connected: AtomicBool,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            reader: Mutex::new(BufReader::new(tokio::io::stdin())),
            writer: Mutex::new(tokio::io::stdout()),
            connected: AtomicBool::new(false),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn init(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_raw(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(bytes.len() + 1)
    }

    async fn recv_raw(&self, buffer: &mut Vec<u8>, timeout: Duration) -> Result<usize, TransportError> {
        let mut reader = self.reader.lock().await;
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
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
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
