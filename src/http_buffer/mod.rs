//! HTTP chunk buffer — converts push-stream output into a polled stream
//! for clients that cannot maintain a long-lived connection (spec §4.7).
//!
//! Grounded directly in the teacher's `correlation::manager::CorrelationManager`:
//! a `DashMap` keyed by request id plus a background reaper task sharing
//! the same table, generalized here from request/response correlation to
//! fragment accumulation. Field names follow
//! `original_source/src/lib/protocol/http_buffer_manager.h`'s
//! `http_buffer_t` (`chunks`, `chunk_count`, `created_timestamp`,
//! `last_access`, `completed`, `in_use`).

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::protocol::errors::JsonRpcError;
use crate::streaming::StreamChunk;

fn now_ms() -> u64 {
    chrono::Utc::now()
        .timestamp_millis()
        .try_into()
        .unwrap_or(0)
}

/// Accumulator for one request-id's worth of streamed chunks.
pub struct HttpBuffer {
    /// Comma-joined JSON fragments (`{...},{...}`), wrapped in `[...]` by
    /// the poll handler — preserved verbatim for wire compatibility per
    /// spec §9's open question.
    fragments: String,
    chunk_count: u32,
    created_ms: u64,
    last_access_ms: AtomicU64,
    completed: bool,
    in_use: bool,
}

impl HttpBuffer {
    fn new() -> Self {
        let created = now_ms();
        Self {
            fragments: String::new(),
            chunk_count: 0,
            created_ms: created,
            last_access_ms: AtomicU64::new(created),
            completed: false,
            in_use: false,
        }
    }

    fn touch(&self) {
        self.last_access_ms.store(now_ms(), Ordering::Relaxed);
    }
}

/// Manages the table of live HTTP chunk buffers, one reaper task, and the
/// growth/eviction rules of spec §4.7.
pub struct HttpBufferManager {
    buffers: DashMap<String, HttpBuffer>,
    max_buffers: usize,
    max_chunk_size: usize,
    buffer_timeout_ms: u64,
    cleanup_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HttpBufferManager {
    pub fn new(max_buffers: usize, max_chunk_size: usize, buffer_timeout_ms: u64) -> Self {
        Self {
            buffers: DashMap::new(),
            max_buffers,
            max_chunk_size,
            buffer_timeout_ms,
            cleanup_task: std::sync::Mutex::new(None),
        }
    }

    /// Allocates or reuses a slot keyed by request-id (spec §4.7 `create`).
    pub fn create(&self, request_id: &str) -> Result<(), JsonRpcError> {
        if self.buffers.contains_key(request_id) {
            return Ok(());
        }
        if self.buffers.len() >= self.max_buffers {
            return Err(JsonRpcError::internal_error(
                "HTTP chunk buffer table is full",
            ));
        }
        self.buffers.insert(request_id.to_string(), HttpBuffer::new());
        Ok(())
    }

    /// Appends `chunk`'s JSON text to the buffer's fragment accumulator.
    /// Growth doubles up to `max_chunk_size`; further appends past the
    /// ceiling are rejected (spec §4.7 "Capacity").
    pub fn append(&self, request_id: &str, chunk: &StreamChunk) -> Result<(), JsonRpcError> {
        let mut buffer = self
            .buffers
            .get_mut(request_id)
            .ok_or_else(|| JsonRpcError::stream_not_found(request_id))?;

        let fragment = serde_json::to_string(chunk)
            .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;

        let additional = fragment.len() + usize::from(!buffer.fragments.is_empty());
        if buffer.fragments.len() + additional > self.max_chunk_size {
            return Err(JsonRpcError::internal_error(
                "HTTP chunk buffer exceeded its maximum size",
            ));
        }

        if !buffer.fragments.is_empty() {
            buffer.fragments.push(',');
        }
        buffer.fragments.push_str(&fragment);
        buffer.chunk_count += 1;
        if chunk.is_terminal() {
            buffer.completed = true;
        }
        buffer.touch();
        Ok(())
    }

    /// Returns the concatenated fragments wrapped in `[...]`. Deletes the
    /// buffer if `clear_after_read` is requested or it is already
    /// completed (spec §4.7 `poll`).
    pub fn poll(&self, request_id: &str, clear_after_read: bool) -> Result<PollResult, JsonRpcError> {
        let (text, chunk_count, completed) = {
            let mut buffer = self
                .buffers
                .get_mut(request_id)
                .ok_or_else(|| JsonRpcError::stream_not_found(request_id))?;
            buffer.touch();
            (
                format!("[{}]", buffer.fragments),
                buffer.chunk_count,
                buffer.completed,
            )
        };

        if clear_after_read || completed {
            self.buffers.remove(request_id);
        }

        Ok(if chunk_count == 0 {
            PollResult::Waiting
        } else {
            PollResult::Data {
                chunks_json: text,
                completed,
            }
        })
    }

    /// Forced cleanup (spec §4.7 `remove`).
    pub fn remove(&self, request_id: &str) {
        self.buffers.remove(request_id);
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Evicts any buffer whose `last_access_ms` is older than the
    /// configured timeout, regardless of completion (spec §4.7
    /// "Eviction").
    pub fn evict_expired(&self) -> usize {
        let now = now_ms();
        let timeout = self.buffer_timeout_ms;
        let expired: Vec<String> = self
            .buffers
            .iter()
            .filter(|entry| {
                now.saturating_sub(entry.value().last_access_ms.load(Ordering::Relaxed)) > timeout
            })
            .map(|entry| entry.key().clone())
            .collect();
        let count = expired.len();
        for key in expired {
            self.buffers.remove(&key);
        }
        count
    }

    /// Starts the background reaper, mirroring the teacher's
    /// `CorrelationManager::start_cleanup_task` shape (an owned `Arc`
    /// looping on `tokio::time::interval` until shutdown).
    pub fn start_reaper(self: &std::sync::Arc<Self>, interval: std::time::Duration) {
        let manager = std::sync::Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let evicted = manager.evict_expired();
                if evicted > 0 {
                    tracing::debug!(evicted, "http chunk buffer reaper swept expired buffers");
                }
            }
        });
        if let Ok(mut slot) = self.cleanup_task.lock() {
            *slot = Some(handle);
        }
    }

    pub fn stop_reaper(&self) {
        if let Ok(mut slot) = self.cleanup_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

pub enum PollResult {
    Waiting,
    Data { chunks_json: String, completed: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_poll_before_any_append_reports_waiting() {
        let manager = HttpBufferManager::new(100, 64 * 1024, 60_000);
        manager.create("req-1").unwrap();
        match manager.poll("req-1", false).unwrap() {
            PollResult::Waiting => {}
            PollResult::Data { .. } => panic!("expected waiting"),
        }
    }

    #[test]
    fn append_then_poll_returns_wrapped_fragments() {
        let manager = HttpBufferManager::new(100, 64 * 1024, 60_000);
        manager.create("req-1").unwrap();
        manager
            .append("req-1", &StreamChunk::normal(1, 0, "hi".to_string()))
            .unwrap();
        manager
            .append("req-1", &StreamChunk::finish(1, 1))
            .unwrap();

        match manager.poll("req-1", false).unwrap() {
            PollResult::Data {
                chunks_json,
                completed,
            } => {
                assert!(chunks_json.starts_with('['));
                assert!(chunks_json.ends_with(']'));
                assert!(chunks_json.contains("},{"));
                assert!(completed);
            }
            PollResult::Waiting => panic!("expected data"),
        }
    }

    #[test]
    fn buffer_removed_after_completed_poll() {
        let manager = HttpBufferManager::new(100, 64 * 1024, 60_000);
        manager.create("req-1").unwrap();
        manager
            .append("req-1", &StreamChunk::finish(1, 0))
            .unwrap();
        manager.poll("req-1", false).unwrap();
        let err = manager.poll("req-1", false).unwrap_err();
        assert_eq!(err.error_code(), JsonRpcError::STREAM_NOT_FOUND);
    }

    #[test]
    fn append_past_max_chunk_size_is_rejected() {
        let manager = HttpBufferManager::new(100, 16, 60_000);
        manager.create("req-1").unwrap();
        let err = manager
            .append("req-1", &StreamChunk::normal(1, 0, "way too long a delta".to_string()))
            .unwrap_err();
        assert_eq!(err.error_code(), JsonRpcError::INTERNAL_ERROR);
    }

    #[test]
    fn create_past_max_buffers_fails() {
        let manager = HttpBufferManager::new(1, 64 * 1024, 60_000);
        manager.create("req-1").unwrap();
        assert!(manager.create("req-2").is_err());
    }

    #[test]
    fn evict_expired_removes_stale_buffers_regardless_of_completion() {
        let manager = HttpBufferManager::new(100, 64 * 1024, 0);
        manager.create("req-1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(manager.evict_expired(), 1);
        assert_eq!(manager.buffer_count(), 0);
    }
}
