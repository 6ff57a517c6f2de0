//! Gateway — top-level wiring of every subsystem (spec §3).
//!
//! This is the concrete side of the trait-object indirections
//! `streaming::ChunkDelivery`, `streaming::StreamInstaller`,
//! `recovery::TransportRestarter`, and `worker::DispatchContextFactory`
//! exist to avoid: the lower-level modules stay decoupled from
//! `transport`/`http_buffer` concretely, and this module is where they
//! finally meet, mirroring the teacher's own top-level
//! `integration`-style composition root.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::GatewayConfig;
use crate::dispatch::DispatchContextErased;
use crate::handles::HandlePool;
use crate::http_buffer::HttpBufferManager;
use crate::native::{CallbackSink, NativeRuntime};
use crate::queue::{QueueItem, RequestQueue, ResponseQueue};
use crate::recovery::{FailureType, RecoverySupervisor, RestartFuture, TransportRestarter, TransportType};
use crate::streaming::{ChunkDelivery, StreamChunk, StreamInstaller, StreamingManager};
use crate::transport::{Transport, TransportKind};
use crate::worker::{DispatchContextFactory, WorkerPool};

/// Every transport adapter this gateway instance has brought up, keyed by
/// kind. Shared between the chunk fan-out and the recovery restarter so
/// both act on the same live set.
type TransportRegistry = Arc<DashMap<TransportKind, Arc<dyn Transport>>>;

/// Fans a stream chunk out to whichever transport the streaming context
/// names, or the HTTP chunk buffer for the poll-based transport (spec
/// §4.6).
pub struct TransportFanOut {
    transports: TransportRegistry,
    http_buffers: Arc<HttpBufferManager>,
}

impl ChunkDelivery for TransportFanOut {
    fn deliver(&self, transport_kind: TransportKind, chunk: StreamChunk) {
        if transport_kind == TransportKind::Http {
            let request_id = chunk.request_id.to_string();
            let _ = self.http_buffers.create(&request_id);
            if let Err(err) = self.http_buffers.append(&request_id, &chunk) {
                tracing::warn!(%request_id, %err, "failed to append stream chunk to HTTP buffer");
            }
            return;
        }

        let Some(transport) = self.transports.get(&transport_kind) else {
            tracing::warn!(?transport_kind, "no transport registered for stream chunk delivery");
            return;
        };
        let transport = Arc::clone(transport.value());
        let bytes = match serde_json::to_vec(&chunk) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(%err, "failed to serialize stream chunk");
                return;
            }
        };
        tokio::spawn(async move {
            if let Err(err) = transport.send_raw(&bytes).await {
                tracing::warn!(%err, "failed to deliver stream chunk to transport");
            }
        });
    }
}

/// Restarts a transport by re-running its `connect`/`disconnect` sequence
/// (spec §4.9).
pub struct TransportRestartAdapter {
    transports: TransportRegistry,
}

impl TransportRestarter for TransportRestartAdapter {
    fn restart(&self, transport_type: TransportType) -> RestartFuture {
        let kind = match transport_type {
            TransportType::Stdio => TransportKind::Stdio,
            TransportType::Tcp => TransportKind::Tcp,
            TransportType::Udp => TransportKind::Udp,
            TransportType::Http => TransportKind::Http,
            TransportType::WebSocket => TransportKind::WebSocket,
        };
        let transports = Arc::clone(&self.transports);
        Box::pin(async move {
            let Some(transport) = transports.get(&kind).map(|e| Arc::clone(e.value())) else {
                return Err(format!("no transport registered for {kind:?}"));
            };
            transport.disconnect().await.map_err(|e| e.to_string())?;
            transport.connect().await.map_err(|e| e.to_string())?;
            Ok(())
        })
    }
}

/// Wires [`StreamingManager`] as both the sink the native callback is
/// handed at `init`/`lora_init` time and the object-safe handle dispatch
/// holds to install/query streaming state.
type GatewayStreamingManager = StreamingManager<TransportFanOut>;

/// Owns every long-lived subsystem and the background tasks that keep
/// them running (spec §3's pipeline diagram).
pub struct Gateway {
    pub config: GatewayConfig,
    pub handles: Arc<HandlePool>,
    pub requests: Arc<RequestQueue>,
    pub responses: Arc<ResponseQueue>,
    pub streaming: Arc<GatewayStreamingManager>,
    pub http_buffers: Arc<HttpBufferManager>,
    pub recovery: Arc<RecoverySupervisor<TransportRestartAdapter>>,
    pub runtime: Arc<dyn NativeRuntime>,
    transports: TransportRegistry,
    workers: Option<WorkerPool>,
}

struct GatewayDispatchContextFactory {
    handles: Arc<HandlePool>,
    runtime: Arc<dyn NativeRuntime>,
    streaming: Arc<GatewayStreamingManager>,
}

impl DispatchContextFactory for GatewayDispatchContextFactory {
    fn build(&self, item: &QueueItem) -> DispatchContextErased {
        DispatchContextErased {
            handles: Arc::clone(&self.handles),
            runtime: Arc::clone(&self.runtime),
            streaming: Arc::clone(&self.streaming) as Arc<dyn StreamInstaller>,
            callback_sink: Arc::clone(&self.streaming) as Arc<dyn CallbackSink>,
            // The queue item does not yet carry which transport
            // originated it; §4.6 routes stream delivery off the
            // streaming context's own `transport_kind`, installed by
            // the `run`/`run_async` handler's call to `streaming.install`
            // at dispatch time, so a placeholder here is never consulted
            // for chunk delivery.
            transport_kind: TransportKind::Stdio,
            request_id: item.request_id,
        }
    }
}

impl Gateway {
    pub fn new(config: GatewayConfig, runtime: Arc<dyn NativeRuntime>) -> Self {
        let handles = Arc::new(HandlePool::new(config.max_handles));
        let requests = Arc::new(RequestQueue::new(config.queue_size));
        let responses = Arc::new(ResponseQueue::new(config.queue_size));
        let http_buffers = Arc::new(HttpBufferManager::new(
            config.http_max_buffers,
            config.http_max_chunk_size,
            config.http_buffer_timeout_secs * 1000,
        ));

        let transports: TransportRegistry = Arc::new(DashMap::new());

        let fan_out = TransportFanOut {
            transports: Arc::clone(&transports),
            http_buffers: Arc::clone(&http_buffers),
        };
        let streaming = Arc::new(StreamingManager::new(fan_out));

        let restarter = Arc::new(TransportRestartAdapter {
            transports: Arc::clone(&transports),
        });
        let recovery = Arc::new(RecoverySupervisor::new(restarter));

        Self {
            config,
            handles,
            requests,
            responses,
            streaming,
            http_buffers,
            recovery,
            runtime,
            transports,
            workers: None,
        }
    }

    /// Registers a transport adapter so the stream fan-out and recovery
    /// supervisor can reach it by [`TransportKind`].
    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        self.transports.insert(transport.kind(), transport);
    }

    /// Starts the HTTP chunk buffer reaper and the worker pool (spec
    /// §4.3, §4.7).
    pub fn start(&mut self) {
        self.http_buffers
            .start_reaper(self.config.http_cleanup_interval());

        let factory: Arc<dyn DispatchContextFactory> = Arc::new(GatewayDispatchContextFactory {
            handles: Arc::clone(&self.handles),
            runtime: Arc::clone(&self.runtime),
            streaming: Arc::clone(&self.streaming),
        });

        self.workers = Some(WorkerPool::spawn(
            self.config.worker_count,
            self.config.request_timeout_ms,
            Arc::clone(&self.requests),
            Arc::clone(&self.responses),
            factory,
        ));
    }

    pub async fn shutdown(&mut self) {
        if let Some(workers) = self.workers.take() {
            workers.shutdown().await;
        }
        self.http_buffers.stop_reaper();
    }

    /// A transport calls this on any I/O failure (spec §4.9 "Trigger").
    pub fn report_transport_failure(
        &self,
        kind: TransportKind,
        failure: FailureType,
        message: impl Into<String>,
    ) {
        self.recovery
            .report_failure(kind.as_recovery_type(), failure, message);
    }
}
