//! Worker pool (spec §4.3) — N concurrent consumers draining the request
//! queue, dispatching through [`crate::dispatch`], and pushing formatted
//! JSON-RPC responses onto the response queue.
//!
//! The source models each worker as a real OS thread (spec §5
//! "Scheduling model: parallel OS threads, not cooperative"). This crate
//! runs on a multi-thread `tokio` runtime throughout, so a worker here is
//! a `tokio::task` rather than a `std::thread` — the same
//! across-OS-thread parallelism the spec asks for, just scheduled by
//! tokio's work-stealing executor instead of hand-rolled thread spawns,
//! consistent with every other subsystem in this crate already being
//! built on `async`/`NativeRuntime`'s async trait.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::dispatch::{self, DispatchContextErased};
use crate::protocol::errors::{GatewayError, JsonRpcError};
use crate::queue::{QueueItem, RequestQueue, ResponseQueue};

fn now_ms() -> u64 {
    chrono::Utc::now()
        .timestamp_millis()
        .try_into()
        .unwrap_or(0)
}

/// Builds the per-call [`DispatchContextErased`] for a queued item. The
/// gateway supplies one of these per worker pool; every dispatch call
/// gets a fresh context carrying that item's transport/request identity.
pub trait DispatchContextFactory: Send + Sync {
    fn build(&self, item: &QueueItem) -> DispatchContextErased;
}

/// N concurrent consumers of the request queue (spec §4.3).
pub struct WorkerPool {
    request_timeout_ms: u64,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    responses_dropped: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Spawns `worker_count` loops, each polling `requests` and pushing
    /// formatted results onto `responses` (spec §4.3 steps 1-6).
    pub fn spawn(
        worker_count: usize,
        request_timeout_ms: u64,
        requests: Arc<RequestQueue>,
        responses: Arc<ResponseQueue>,
        context_factory: Arc<dyn DispatchContextFactory>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let responses_dropped = Arc::new(AtomicU64::new(0));

        let handles = (0..worker_count)
            .map(|worker_index| {
                let requests = Arc::clone(&requests);
                let responses = Arc::clone(&responses);
                let context_factory = Arc::clone(&context_factory);
                let running = Arc::clone(&running);
                let dropped = Arc::clone(&responses_dropped);
                tokio::spawn(async move {
                    worker_loop(
                        worker_index,
                        requests,
                        responses,
                        context_factory,
                        running,
                        request_timeout_ms,
                        dropped,
                    )
                    .await;
                })
            })
            .collect();

        Self {
            request_timeout_ms,
            running,
            handles,
            responses_dropped,
        }
    }

    /// Clears the running flag and waits up to 3s for workers to drain
    /// (spec §4.3 "Shutdown"). Any worker still mid-call when the
    /// deadline passes is abandoned, not forcibly killed — tokio tasks
    /// cannot be pre-empted mid-`.await`, only detached.
    pub async fn shutdown(mut self) {
        self.running.store(false, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        let mut remaining = std::mem::take(&mut self.handles);
        while !remaining.is_empty() && tokio::time::Instant::now() < deadline {
            remaining.retain(|h| !h.is_finished());
            if !remaining.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        for handle in remaining {
            handle.abort();
        }
    }

    pub fn request_timeout_ms(&self) -> u64 {
        self.request_timeout_ms
    }

    pub fn responses_dropped(&self) -> u64 {
        self.responses_dropped.load(Ordering::Relaxed)
    }
}

async fn worker_loop(
    _worker_index: usize,
    requests: Arc<RequestQueue>,
    responses: Arc<ResponseQueue>,
    context_factory: Arc<dyn DispatchContextFactory>,
    running: Arc<AtomicBool>,
    request_timeout_ms: u64,
    responses_dropped: Arc<AtomicU64>,
) {
    while running.load(Ordering::Relaxed) {
        let Some(item) = requests.pop() else {
            tokio::time::sleep(Duration::from_millis(1)).await;
            continue;
        };

        let response_payload = if now_ms().saturating_sub(item.enqueue_timestamp_ms) > request_timeout_ms {
            format_response(item.request_id, Err(JsonRpcError::internal_error(
                "request exceeded its queue timeout",
            )))
        } else {
            let ctx = context_factory.build(&item);
            let params: Value = serde_json::from_slice(&item.payload).unwrap_or(Value::Null);
            let result = dispatch::dispatch(&item.method, &params, &ctx).await;
            format_response(item.request_id, result.map_err(JsonRpcError::from))
        };

        let out = QueueItem {
            request_id: item.request_id,
            handle_id: item.handle_id,
            method: item.method,
            payload: response_payload,
            enqueue_timestamp_ms: now_ms(),
        };

        // Block-with-retry under backpressure (spec §4.3 step 5), but
        // stop retrying once shutdown has been requested so the worker
        // can still exit promptly.
        loop {
            match responses.push(out.clone()) {
                Ok(()) => break,
                Err(_full) => {
                    if !running.load(Ordering::Relaxed) {
                        responses_dropped.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        }
    }
}

fn format_response(request_id: u32, result: Result<Value, JsonRpcError>) -> Vec<u8> {
    let body = match result {
        Ok(value) => json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "result": value,
        }),
        Err(err) => json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "error": { "code": err.error_code(), "message": err.to_string() },
        }),
    };
    serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec())
}
