//! End-to-end exercises of the operation dispatcher against the 15-method
//! table, covering the init -> run -> destroy lifecycle and the error
//! scenarios named in spec's testable-properties scenarios S1, S3, S5.

use std::io::Write;
use std::sync::Arc;

use serde_json::json;

use nano_gateway::dispatch::{dispatch, DispatchContextErased};
use nano_gateway::handles::HandlePool;
use nano_gateway::native::{CallbackSink, NullRuntime};
use nano_gateway::streaming::{ChunkDelivery, StreamChunk, StreamInstaller, StreamingManager};
use nano_gateway::transport::TransportKind;

struct NoopDelivery;

impl ChunkDelivery for NoopDelivery {
    fn deliver(&self, _transport_kind: TransportKind, _chunk: StreamChunk) {}
}

fn context() -> DispatchContextErased {
    let handles = Arc::new(HandlePool::new(4));
    let runtime = Arc::new(NullRuntime::default());
    let streaming = Arc::new(StreamingManager::new(NoopDelivery));
    let callback_sink: Arc<dyn CallbackSink> = streaming.clone();
    DispatchContextErased {
        handles,
        runtime,
        streaming: streaming as Arc<dyn StreamInstaller>,
        callback_sink,
        transport_kind: TransportKind::Stdio,
        request_id: 1,
    }
}

fn write_temp_model(name: &str, bytes: &[u8]) -> String {
    let mut path = std::env::temp_dir();
    path.push(format!("nano-gateway-test-{name}.bin"));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(bytes).unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn s1_non_streaming_init_then_run_returns_text_result() {
    let ctx = context();
    let model_path = write_temp_model("s1", &vec![0u8; 4096]);

    let init_result = dispatch(
        "init",
        &json!({"model_path": model_path, "max_context_len": 512}),
        &ctx,
    )
    .await
    .unwrap();
    let handle_id = init_result["handle_id"].as_u64().unwrap();
    assert!(handle_id > 0);

    let run_result = dispatch(
        "run",
        &json!({"handle_id": handle_id, "prompt": "hi"}),
        &ctx,
    )
    .await
    .unwrap();
    assert_eq!(run_result["text"], json!("echo: hi"));
}

#[tokio::test]
async fn s3_unknown_method_is_method_not_found() {
    let ctx = context();
    let err = dispatch("no.such", &json!({}), &ctx).await.unwrap_err();
    let wire: nano_gateway::protocol::JsonRpcError = err.into();
    assert_eq!(wire.error_code(), nano_gateway::protocol::JsonRpcError::METHOD_NOT_FOUND);
}

#[tokio::test]
async fn s5_handle_lifecycle_destroy_then_any_op_is_invalid_handle() {
    let ctx = context();
    let model_path = write_temp_model("s5", &vec![0u8; 4096]);

    let init_result = dispatch("init", &json!({"model_path": model_path}), &ctx)
        .await
        .unwrap();
    let handle_id = init_result["handle_id"].as_u64().unwrap();

    dispatch("destroy", &json!({"handle_id": handle_id}), &ctx)
        .await
        .unwrap();

    let err = dispatch("is_running", &json!({"handle_id": handle_id}), &ctx)
        .await
        .unwrap_err();
    let wire: nano_gateway::protocol::JsonRpcError = err.into();
    assert_eq!(wire.error_code(), nano_gateway::protocol::JsonRpcError::INVALID_PARAMS);

    // Identifiers are never recycled: a second init mints a fresh, larger id.
    let model_path_2 = write_temp_model("s5b", &vec![0u8; 4096]);
    let second_init = dispatch("init", &json!({"model_path": model_path_2}), &ctx)
        .await
        .unwrap();
    let second_handle_id = second_init["handle_id"].as_u64().unwrap();
    assert_ne!(second_handle_id, handle_id);
}

#[tokio::test]
async fn run_without_a_valid_handle_is_rejected_before_touching_the_runtime() {
    let ctx = context();
    let err = dispatch("run", &json!({"handle_id": 999, "prompt": "hi"}), &ctx)
        .await
        .unwrap_err();
    let wire: nano_gateway::protocol::JsonRpcError = err.into();
    assert_eq!(wire.error_code(), nano_gateway::protocol::JsonRpcError::INVALID_PARAMS);
}
