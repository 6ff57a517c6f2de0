//! Streaming context and callback fan-out (spec §4.5–§4.6)
//!
//! The native runtime is single-session per handle and, by construction,
//! single-session globally across this gateway (spec §4.5 "At-most-one
//! rule"): only one `run`/`run_async` is ever in flight at a time. That
//! lets the streaming context live in a single process-wide slot rather
//! than the original's per-session table (`original_source/src/lib/core/
//! stream_manager.h`'s `stream_manager_session_t` array) — a
//! simplification the spec calls out explicitly, mirrored here with the
//! teacher's atomic-flag coordination style (`Arc<AtomicBool>` in
//! `correlation::manager`) generalized to a short-held `parking_lot::Mutex`
//! around the whole context, since the callback's only obligation is to
//! read it once and never hold it across a transport write.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::handles::HandleId;
use crate::native::{CallbackInvocation, CallbackSink, CallbackState};
use crate::protocol::errors::NativeErrorKind;
use crate::transport::TransportKind;

/// One delta of generated output, bound to the request that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub request_id: u32,
    pub seq: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StreamChunkError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunkError {
    pub message: String,
}

impl StreamChunk {
    pub fn normal(request_id: u32, seq: u32, delta: String) -> Self {
        Self {
            request_id,
            seq,
            delta: Some(delta),
            end: None,
            error: None,
        }
    }

    pub fn finish(request_id: u32, seq: u32) -> Self {
        Self {
            request_id,
            seq,
            delta: None,
            end: Some(true),
            error: None,
        }
    }

    pub fn error(request_id: u32, seq: u32, message: String) -> Self {
        Self {
            request_id,
            seq,
            delta: None,
            end: None,
            error: Some(StreamChunkError { message }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.end.unwrap_or(false) || self.error.is_some()
    }
}

/// Per-inference binding of the native callback to a transport/request
/// identity (spec §3, §4.5).
struct StreamingContext {
    handle_id: HandleId,
    request_id: u32,
    transport_kind: TransportKind,
    sequence: AtomicU32,
}

/// The single process-wide streaming-context slot plus the entry point
/// the native callback drives on every invocation.
pub struct StreamingManager<D: ChunkDelivery> {
    slot: Mutex<Option<Arc<StreamingContext>>>,
    delivery: D,
}

/// Abstraction over "somewhere a stream chunk can go": a push transport's
/// `send_stream_chunk`, or the HTTP chunk buffer for poll transports
/// (spec §4.6). Kept generic so `streaming` does not depend on
/// `transport` or `http_buffer` concretely, avoiding a cyclic module
/// dependency — the gateway wires a concrete `D` at construction time.
pub trait ChunkDelivery: Send + Sync {
    fn deliver(&self, transport_kind: TransportKind, chunk: StreamChunk);
}

/// Object-safe view of [`StreamingManager`] the dispatcher holds, so
/// `dispatch::DispatchContextErased` does not need to be generic over the
/// concrete `ChunkDelivery` implementation.
pub trait StreamInstaller: Send + Sync {
    fn install(&self, handle_id: HandleId, request_id: u32, transport_kind: TransportKind);
    fn is_active(&self) -> bool;
    fn active_handle(&self) -> Option<HandleId>;
}

impl<D: ChunkDelivery> CallbackSink for StreamingManager<D> {
    fn on_callback(&self, invocation: CallbackInvocation) {
        StreamingManager::on_callback(self, invocation)
    }
}

impl<D: ChunkDelivery> StreamInstaller for StreamingManager<D> {
    fn install(&self, handle_id: HandleId, request_id: u32, transport_kind: TransportKind) {
        StreamingManager::install(self, handle_id, request_id, transport_kind)
    }
    fn is_active(&self) -> bool {
        StreamingManager::is_active(self)
    }
    fn active_handle(&self) -> Option<HandleId> {
        StreamingManager::active_handle(self)
    }
}

impl<D: ChunkDelivery> StreamingManager<D> {
    pub fn new(delivery: D) -> Self {
        Self {
            slot: Mutex::new(None),
            delivery,
        }
    }

    /// Installs the streaming context for an about-to-start inference call.
    /// The worker must not call this while another context is active
    /// (spec §4.5 "At-most-one rule" — enforced by the worker pool
    /// serializing dispatch of `run`/`run_async`, not by this method).
    pub fn install(&self, handle_id: HandleId, request_id: u32, transport_kind: TransportKind) {
        let mut slot = self.slot.lock();
        *slot = Some(Arc::new(StreamingContext {
            handle_id,
            request_id,
            transport_kind,
            sequence: AtomicU32::new(0),
        }));
    }

    pub fn is_active(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn active_handle(&self) -> Option<HandleId> {
        self.slot.lock().as_ref().map(|ctx| ctx.handle_id)
    }

    /// Exposes the concrete delivery sink, so a composition root can reach
    /// adapter-registration methods `D` carries beyond `ChunkDelivery`
    /// itself (e.g. `gateway::TransportFanOut::register`).
    pub fn delivery_ref(&self) -> &D {
        &self.delivery
    }

    fn clear(&self) {
        *self.slot.lock() = None;
    }

    /// The native callback's single entry point. Runs on the native
    /// runtime's own thread and must never block beyond the one
    /// synchronous delivery call (spec §5).
    pub fn on_callback(&self, invocation: CallbackInvocation) {
        let ctx = {
            let slot = self.slot.lock();
            match slot.as_ref() {
                Some(ctx) if ctx.handle_id == invocation.handle_id => ctx.clone(),
                // No context installed, or it belongs to a different
                // handle than the one calling back: drop silently
                // (spec §4.5).
                _ => return,
            }
        };

        match invocation.state {
            CallbackState::Normal => {
                let seq = ctx.sequence.fetch_add(1, Ordering::SeqCst);
                let text = invocation.result.map(|r| r.text).unwrap_or_default();
                self.delivery
                    .deliver(ctx.transport_kind, StreamChunk::normal(ctx.request_id, seq, text));
            }
            CallbackState::Waiting => {
                // No chunk is emitted while the runtime is merely waiting.
            }
            CallbackState::Finish => {
                let seq = ctx.sequence.load(Ordering::SeqCst);
                self.delivery
                    .deliver(ctx.transport_kind, StreamChunk::finish(ctx.request_id, seq));
                self.clear();
            }
            CallbackState::Error => {
                let seq = ctx.sequence.load(Ordering::SeqCst);
                let message = invocation
                    .error
                    .map(describe_native_error)
                    .unwrap_or_else(|| "native inference error".to_string());
                self.delivery
                    .deliver(ctx.transport_kind, StreamChunk::error(ctx.request_id, seq, message));
                self.clear();
            }
        }
    }
}

fn describe_native_error(kind: NativeErrorKind) -> String {
    format!("{kind:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingDelivery {
        chunks: StdMutex<Vec<StreamChunk>>,
    }

    impl ChunkDelivery for &RecordingDelivery {
        fn deliver(&self, _transport_kind: TransportKind, chunk: StreamChunk) {
            self.chunks.lock().unwrap().push(chunk);
        }
    }

    #[test]
    fn chunks_for_a_request_have_strictly_increasing_seq_with_one_terminal() {
        let recorder = RecordingDelivery {
            chunks: StdMutex::new(vec![]),
        };
        let manager = StreamingManager::new(&recorder);
        manager.install(HandleId(1), 42, TransportKind::Stdio);

        for _ in 0..3 {
            manager.on_callback(CallbackInvocation {
                handle_id: HandleId(1),
                state: CallbackState::Normal,
                result: Some(crate::native::NativeResult {
                    text: "tok".to_string(),
                }),
                error: None,
            });
        }
        manager.on_callback(CallbackInvocation {
            handle_id: HandleId(1),
            state: CallbackState::Finish,
            result: None,
            error: None,
        });

        let chunks = recorder.chunks.lock().unwrap();
        assert_eq!(chunks.len(), 4);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.seq, i as u32);
        }
        assert!(chunks[..3].iter().all(|c| !c.is_terminal()));
        assert!(chunks[3].is_terminal());
        assert!(!manager.is_active());
    }

    #[test]
    fn callback_with_no_installed_context_is_dropped_silently() {
        let recorder = RecordingDelivery {
            chunks: StdMutex::new(vec![]),
        };
        let manager = StreamingManager::new(&recorder);
        manager.on_callback(CallbackInvocation {
            handle_id: HandleId(1),
            state: CallbackState::Normal,
            result: Some(crate::native::NativeResult {
                text: "orphaned".to_string(),
            }),
            error: None,
        });
        assert!(recorder.chunks.lock().unwrap().is_empty());
    }

    #[test]
    fn error_state_emits_terminal_chunk_and_clears_context() {
        let recorder = RecordingDelivery {
            chunks: StdMutex::new(vec![]),
        };
        let manager = StreamingManager::new(&recorder);
        manager.install(HandleId(1), 7, TransportKind::Tcp);
        manager.on_callback(CallbackInvocation {
            handle_id: HandleId(1),
            state: CallbackState::Error,
            result: None,
            error: Some(NativeErrorKind::Device),
        });
        let chunks = recorder.chunks.lock().unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].error.is_some());
        assert!(!manager.is_active());
    }
}
