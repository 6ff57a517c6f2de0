//! Streaming-context invariants: gapless sequence numbers, exactly one
//! terminal chunk, and the zero-NORMAL-chunk boundary case for an empty
//! prompt (testable property 2, boundary behaviors).

use std::sync::Mutex;

use nano_gateway::handles::HandleId;
use nano_gateway::native::{CallbackInvocation, CallbackState, NativeResult};
use nano_gateway::streaming::{ChunkDelivery, StreamChunk, StreamingManager};
use nano_gateway::transport::TransportKind;

struct RecordingDelivery {
    chunks: Mutex<Vec<StreamChunk>>,
}

impl ChunkDelivery for &RecordingDelivery {
    fn deliver(&self, _transport_kind: TransportKind, chunk: StreamChunk) {
        self.chunks.lock().unwrap().push(chunk);
    }
}

#[test]
fn chunk_sequence_is_gapless_with_a_single_terminal_event() {
    let recorder = RecordingDelivery {
        chunks: Mutex::new(vec![]),
    };
    let manager = StreamingManager::new(&recorder);
    manager.install(HandleId(1), 7, TransportKind::Stdio);

    for i in 0..5 {
        manager.on_callback(CallbackInvocation {
            handle_id: HandleId(1),
            state: CallbackState::Normal,
            result: Some(NativeResult {
                text: format!("tok-{i}"),
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
    assert_eq!(chunks.len(), 6);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.seq, i as u32);
    }
    let terminal_count = chunks.iter().filter(|c| c.is_terminal()).count();
    assert_eq!(terminal_count, 1);
    assert!(chunks.last().unwrap().is_terminal());
}

#[test]
fn zero_length_prompt_completes_with_a_single_finish_chunk() {
    let recorder = RecordingDelivery {
        chunks: Mutex::new(vec![]),
    };
    let manager = StreamingManager::new(&recorder);
    manager.install(HandleId(2), 11, TransportKind::Stdio);

    manager.on_callback(CallbackInvocation {
        handle_id: HandleId(2),
        state: CallbackState::Finish,
        result: None,
        error: None,
    });

    let chunks = recorder.chunks.lock().unwrap();
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].is_terminal());
    assert_eq!(chunks[0].seq, 0);
}

#[test]
fn callback_for_a_different_handle_than_installed_is_dropped_silently() {
    let recorder = RecordingDelivery {
        chunks: Mutex::new(vec![]),
    };
    let manager = StreamingManager::new(&recorder);
    manager.install(HandleId(1), 1, TransportKind::Stdio);

    manager.on_callback(CallbackInvocation {
        handle_id: HandleId(99),
        state: CallbackState::Normal,
        result: Some(NativeResult {
            text: "stray".to_string(),
        }),
        error: None,
    });

    assert!(recorder.chunks.lock().unwrap().is_empty());
    assert!(manager.is_active());
}
