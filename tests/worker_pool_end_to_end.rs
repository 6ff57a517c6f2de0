//! Worker pool draining the request queue end-to-end through the real
//! dispatcher, plus the request-queue-at-capacity boundary behavior.

use std::sync::Arc;

use serde_json::json;

use nano_gateway::dispatch::DispatchContextErased;
use nano_gateway::handles::{HandleId, HandlePool};
use nano_gateway::native::{CallbackSink, NullRuntime};
use nano_gateway::queue::{QueueItem, RequestQueue, ResponseQueue};
use nano_gateway::streaming::{ChunkDelivery, StreamChunk, StreamInstaller, StreamingManager};
use nano_gateway::transport::TransportKind;
use nano_gateway::worker::{DispatchContextFactory, WorkerPool};

struct NoopDelivery;

impl ChunkDelivery for NoopDelivery {
    fn deliver(&self, _transport_kind: TransportKind, _chunk: StreamChunk) {}
}

struct TestContextFactory {
    handles: Arc<HandlePool>,
    runtime: Arc<NullRuntime>,
    streaming: Arc<StreamingManager<NoopDelivery>>,
}

impl DispatchContextFactory for TestContextFactory {
    fn build(&self, item: &QueueItem) -> DispatchContextErased {
        let callback_sink: Arc<dyn CallbackSink> = self.streaming.clone();
        DispatchContextErased {
            handles: self.handles.clone(),
            runtime: self.runtime.clone(),
            streaming: self.streaming.clone() as Arc<dyn StreamInstaller>,
            callback_sink,
            transport_kind: TransportKind::Stdio,
            request_id: item.request_id,
        }
    }
}

#[tokio::test]
async fn worker_pool_drains_requests_and_produces_correlated_responses() {
    let handles = Arc::new(HandlePool::new(4));
    let handle_id = handles.create("/model.bin", 1).unwrap();

    let requests = Arc::new(RequestQueue::new(8));
    let responses = Arc::new(ResponseQueue::new(8));
    let factory: Arc<dyn DispatchContextFactory> = Arc::new(TestContextFactory {
        handles: handles.clone(),
        runtime: Arc::new(NullRuntime::default()),
        streaming: Arc::new(StreamingManager::new(NoopDelivery)),
    });

    let pool = WorkerPool::spawn(2, 5_000, requests.clone(), responses.clone(), factory);

    requests
        .push(QueueItem {
            request_id: 1,
            handle_id,
            method: "is_running".to_string(),
            payload: serde_json::to_vec(&json!({"handle_id": handle_id.0})).unwrap(),
            enqueue_timestamp_ms: 0,
        })
        .unwrap();

    let response = loop {
        if let Some(item) = responses.pop() {
            break item;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    };

    assert_eq!(response.request_id, 1);
    let body: serde_json::Value = serde_json::from_slice(&response.payload).unwrap();
    assert_eq!(body["result"]["is_running"], json!(false));

    pool.shutdown().await;
}

#[test]
fn request_queue_at_capacity_rejects_push_and_state_is_unchanged() {
    let requests = RequestQueue::new(1);
    let item = |id: u32| QueueItem {
        request_id: id,
        handle_id: HandleId::INVALID,
        method: "is_running".to_string(),
        payload: vec![],
        enqueue_timestamp_ms: 0,
    };

    requests.push(item(1)).unwrap();
    let rejected = requests.push(item(2));
    assert!(rejected.is_err());
    assert_eq!(requests.size(), 1);
    assert!(requests.is_full());
}
