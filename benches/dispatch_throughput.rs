//! Dispatch throughput benchmarks focused on the operation dispatcher's
//! hot path: handle validation plus method-table lookup.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;

use nano_gateway::dispatch::{dispatch, DispatchContextErased};
use nano_gateway::handles::HandlePool;
use nano_gateway::native::{CallbackInvocation, CallbackSink, NullRuntime};
use nano_gateway::streaming::{ChunkDelivery, StreamInstaller, StreamingManager};
use nano_gateway::transport::TransportKind;

/// Create a simple runtime for async benchmarks.
fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create Tokio runtime")
}

struct NoopDelivery;

impl ChunkDelivery for NoopDelivery {
    fn deliver(&self, _transport_kind: TransportKind, _chunk: nano_gateway::streaming::StreamChunk) {}
}

fn context() -> DispatchContextErased {
    let handles = Arc::new(HandlePool::new(16));
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

fn benchmark_create_default_param(c: &mut Criterion) {
    let rt = create_runtime();
    let ctx = context();
    let mut group = c.benchmark_group("dispatch_create_default_param");

    group.bench_function("create_default_param", |b| {
        b.iter(|| {
            rt.block_on(async {
                let result = dispatch("createDefaultParam", &json!({}), &ctx).await.unwrap();
                black_box(result)
            })
        });
    });

    group.finish();
}

fn benchmark_handle_validated_dispatch(c: &mut Criterion) {
    let rt = create_runtime();
    let ctx = context();
    let handle_id = ctx.handles.create("/model.bin", 1).unwrap();
    let mut group = c.benchmark_group("dispatch_handle_validated");

    group.bench_function("is_running", |b| {
        b.iter(|| {
            rt.block_on(async {
                let params = json!({"handle_id": handle_id.0});
                let result = dispatch("is_running", &params, &ctx).await.unwrap();
                black_box(result)
            })
        });
    });

    group.finish();
}

fn benchmark_method_table_lookup_scaling(c: &mut Criterion) {
    let rt = create_runtime();
    let ctx = context();
    let handle_id = ctx.handles.create("/model.bin", 1).unwrap();
    let mut group = c.benchmark_group("dispatch_batch_scaling");

    for batch_size in [1, 8, 64].iter() {
        group.bench_with_input(
            BenchmarkId::new("sequential_is_running", batch_size),
            batch_size,
            |b, &count| {
                b.iter(|| {
                    rt.block_on(async {
                        for _ in 0..count {
                            let params = json!({"handle_id": handle_id.0});
                            let result = dispatch("is_running", &params, &ctx).await.unwrap();
                            black_box(result);
                        }
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_create_default_param,
    benchmark_handle_validated_dispatch,
    benchmark_method_table_lookup_scaling
);
criterion_main!(benches);
