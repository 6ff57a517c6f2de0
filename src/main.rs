//! nano-gateway binary entry point.
//!
//! Wires a [`Gateway`] to the stdio transport and runs its
//! read-frame/enqueue and drain-response/write loops (spec §2.2, §9).
//! Binding a concrete accelerator runtime over FFI is out of scope (spec
//! §6.2); this entry point runs [`NullRuntime`] until a real
//! implementation is plugged in.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use nano_gateway::config::GatewayConfig;
use nano_gateway::gateway::Gateway;
use nano_gateway::handles::HandleId;
use nano_gateway::native::{NativeRuntime, NullRuntime};
use nano_gateway::protocol::errors::JsonRpcError;
use nano_gateway::protocol::{parse_frame, Frame, JsonRpcMessage, RequestId};
use nano_gateway::queue::QueueItem;
use nano_gateway::transport::stdio::StdioTransport;
use nano_gateway::transport::Transport;

fn now_ms() -> u64 {
    chrono::Utc::now()
        .timestamp_millis()
        .try_into()
        .unwrap_or(0)
}

/// Tracks the original client-chosen `id` for one in-flight request, plus
/// (for batch members) where its eventual response belongs in the
/// reassembled array (spec §4.8 batch law).
struct Pending {
    original_id: RequestId,
    /// The shared batch slots plus this request's position within the
    /// original batch array (spec §4.8 "response is a JSON array of
    /// responses in the same order").
    batch: Option<(Arc<BatchState>, usize)>,
}

/// Shared state for one still-collecting batch response.
struct BatchState {
    slots: Mutex<Vec<Option<Value>>>,
    remaining: AtomicUsize,
}

/// Routes internal numeric request ids back to the client-facing
/// JSON-RPC `id`, mirroring the teacher's correlation-table pattern
/// (`correlation::manager::CorrelationManager`) at the wire boundary
/// this gateway's internal queues deliberately don't carry.
type PendingTable = Arc<DashMap<u32, Pending>>;

async fn read_loop(
    stdio: Arc<StdioTransport>,
    requests: Arc<nano_gateway::queue::RequestQueue>,
    pending: PendingTable,
    next_id: Arc<AtomicU32>,
) {
    loop {
        let mut buffer = Vec::new();
        match stdio.recv_raw(&mut buffer, Duration::from_secs(3600)).await {
            Ok(0) => continue,
            Ok(_) => {
                if let Some(parse_error_response) =
                    enqueue_frame(&buffer, &requests, &pending, &next_id)
                {
                    if let Err(err) = write_value(&stdio, &parse_error_response).await {
                        tracing::warn!(%err, "failed to write parse error response");
                    }
                }
            }
            Err(err) => {
                tracing::info!(%err, "stdio transport closed, stopping read loop");
                break;
            }
        }
    }
}

/// Parses and enqueues one inbound frame. Returns `Some(response)` when the
/// frame itself could not be parsed — spec §4.8 requires a `-32700` parse
/// error with a `null` id be written back rather than the frame being
/// silently dropped (the client would otherwise hang waiting for a reply).
fn enqueue_frame(
    bytes: &[u8],
    requests: &Arc<nano_gateway::queue::RequestQueue>,
    pending: &PendingTable,
    next_id: &Arc<AtomicU32>,
) -> Option<Value> {
    let frame = match parse_frame(bytes) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(%err, "dropping unparseable frame");
            let parse_error = JsonRpcError::parse_error(err.to_string());
            return Some(json!({
                "jsonrpc": "2.0",
                "id": Value::Null,
                "error": { "code": parse_error.error_code(), "message": parse_error.to_string() },
            }));
        }
    };

    let messages: Vec<JsonRpcMessage> = match frame {
        Frame::Single(m) => vec![m],
        Frame::Batch(ms) => ms,
    };

    let request_positions: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| matches!(m, JsonRpcMessage::Request(_)))
        .map(|(i, _)| i)
        .collect();
    let batch_state = if request_positions.len() > 1 {
        Some(Arc::new(BatchState {
            slots: Mutex::new(vec![None; request_positions.len()]),
            remaining: AtomicUsize::new(request_positions.len()),
        }))
    } else {
        None
    };

    let mut slot_index = 0usize;
    for message in messages {
        let request = match message {
            JsonRpcMessage::Request(r) => r,
            // Notifications are dispatched for effect but never produce a
            // reply (spec §4.8); without a pending entry the write loop
            // silently drops whatever the worker formats for them.
            JsonRpcMessage::Notification(_) | JsonRpcMessage::Response(_) => continue,
        };

        let internal_id = next_id.fetch_add(1, Ordering::Relaxed);
        let batch = batch_state.as_ref().map(|b| {
            let state = Arc::clone(b);
            let index = slot_index;
            slot_index += 1;
            (state, index)
        });

        pending.insert(
            internal_id,
            Pending {
                original_id: request.id.clone(),
                batch,
            },
        );

        let handle_id = request
            .params
            .as_ref()
            .and_then(|p| p.get("handle_id"))
            .and_then(Value::as_u64)
            .map(|id| HandleId(id as u32))
            .unwrap_or(HandleId::INVALID);

        let payload = match serde_json::to_vec(&request.params.unwrap_or(Value::Null)) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(%err, "failed to re-serialize request params");
                continue;
            }
        };

        let item = QueueItem {
            request_id: internal_id,
            handle_id,
            method: request.method,
            payload,
            enqueue_timestamp_ms: now_ms(),
        };

        if let Err(_full) = requests.push(item) {
            tracing::warn!("request queue is full, dropping inbound request");
            pending.remove(&internal_id);
        }
    }

    None
}

async fn write_loop(
    stdio: Arc<StdioTransport>,
    responses: Arc<nano_gateway::queue::ResponseQueue>,
    pending: PendingTable,
) {
    loop {
        let Some(item) = responses.pop() else {
            tokio::time::sleep(Duration::from_millis(1)).await;
            continue;
        };

        let Some((_, entry)) = pending.remove(&item.request_id) else {
            // No pending entry: this was a notification's formatted
            // reply, which spec §4.8 says to elide.
            continue;
        };

        let mut body: Value = match serde_json::from_slice(&item.payload) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(%err, "worker produced a non-JSON response payload");
                continue;
            }
        };
        if let Some(map) = body.as_object_mut() {
            map.insert(
                "id".to_string(),
                serde_json::to_value(&entry.original_id).unwrap_or(Value::Null),
            );
        }

        let Some((state, index)) = entry.batch else {
            if let Err(err) = write_value(&stdio, &body).await {
                tracing::warn!(%err, "failed to write response");
            }
            continue;
        };

        // Part of a batch: stash this response at its original position
        // and flush the whole array only once every member has arrived,
        // preserving request order (spec §4.8 "response is a JSON array
        // of responses in the same order").
        let ready = {
            let mut slots = state.slots.lock();
            slots[index] = Some(body);
            state.remaining.fetch_sub(1, Ordering::Relaxed) == 1
        };
        if ready {
            let collected: Vec<Value> = state.slots.lock().iter().filter_map(Clone::clone).collect();
            if let Err(err) = write_value(&stdio, &Value::Array(collected)).await {
                tracing::warn!(%err, "failed to write batch response");
            }
        }
    }
}

async fn write_value(stdio: &Arc<StdioTransport>, value: &Value) -> Result<(), String> {
    let bytes = serde_json::to_vec(value).map_err(|e| e.to_string())?;
    stdio.send_raw(&bytes).await.map_err(|e| e.to_string())?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = GatewayConfig::default();
    let runtime: Arc<dyn NativeRuntime> = Arc::new(NullRuntime::default());
    let mut gateway = Gateway::new(config, runtime);

    let stdio = Arc::new(StdioTransport::new());
    gateway.register_transport(Arc::clone(&stdio) as Arc<dyn Transport>);

    if let Err(err) = stdio.init().await {
        tracing::error!(%err, "failed to initialize stdio transport");
        return;
    }
    if let Err(err) = stdio.connect().await {
        tracing::error!(%err, "failed to connect stdio transport");
        return;
    }

    gateway.start();

    let pending: PendingTable = Arc::new(DashMap::new());
    let next_id = Arc::new(AtomicU32::new(1));

    let reader = tokio::spawn(read_loop(
        Arc::clone(&stdio),
        Arc::clone(&gateway.requests),
        Arc::clone(&pending),
        next_id,
    ));
    let writer = tokio::spawn(write_loop(
        Arc::clone(&stdio),
        Arc::clone(&gateway.responses),
        pending,
    ));

    let _ = reader.await;
    writer.abort();
    gateway.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use nano_gateway::queue::RequestQueue;

    #[test]
    fn malformed_json_produces_a_parse_error_response_with_a_null_id() {
        let requests = Arc::new(RequestQueue::new(8));
        let pending: PendingTable = Arc::new(DashMap::new());
        let next_id = Arc::new(AtomicU32::new(1));

        let response = enqueue_frame(b"{bad json", &requests, &pending, &next_id)
            .expect("a malformed frame must produce an immediate parse error response");

        assert_eq!(response["jsonrpc"], "2.0");
        assert_eq!(response["id"], Value::Null);
        assert_eq!(response["error"]["code"], JsonRpcError::PARSE_ERROR);
        assert_eq!(requests.size(), 0);
    }

    #[test]
    fn well_formed_request_enqueues_and_returns_no_immediate_response() {
        let requests = Arc::new(RequestQueue::new(8));
        let pending: PendingTable = Arc::new(DashMap::new());
        let next_id = Arc::new(AtomicU32::new(1));

        let frame = br#"{"jsonrpc":"2.0","id":1,"method":"is_running","params":{"handle_id":1}}"#;
        let response = enqueue_frame(frame, &requests, &pending, &next_id);

        assert!(response.is_none());
        assert_eq!(requests.size(), 1);
        assert_eq!(pending.len(), 1);
    }
}
