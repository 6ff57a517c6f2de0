//! The 15 operation handlers (spec §4.4), one per native runtime entry
//! point. Each mirrors the shape of its `original_source/src/io/
//! operations/method_*.c` counterpart: validate JSON fields, call through
//! to [`crate::native::NativeRuntime`], translate the native result into
//! the JSON shape spec §4.4's table names.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::handles::HandleId;
use crate::native::NativeParams;
use crate::protocol::errors::{GatewayError, HandleError, NativeErrorKind};
use crate::transport::TransportKind;

use super::resource_check::estimate_footprint_bytes;
use super::version_check::extract_version_token;
use super::DispatchContextErased;

/// Pulls `params.handle_id` out as a [`HandleId`], grounded in
/// `original_source/src/io/operations.c`'s convention of taking the
/// handle id as the dispatcher's first positional argument rather than a
/// JSON field — generalized here since this gateway's wire format puts
/// every argument in one `params` object.
pub fn extract_handle_id(params: &Value) -> Result<HandleId, GatewayError> {
    params
        .get("handle_id")
        .and_then(Value::as_u64)
        .map(|id| HandleId(id as u32))
        .ok_or_else(|| GatewayError::InvalidParams("missing or non-numeric handle_id".to_string()))
}

fn require_str<'a>(params: &'a Value, field: &str) -> Result<&'a str, GatewayError> {
    params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidParams(format!("missing or non-string {field}")))
}

fn native_err(kind: NativeErrorKind, err: impl std::fmt::Display) -> GatewayError {
    GatewayError::native(kind, err.to_string())
}

/// Reads `file_size_bytes` MB worth of the file at `path`'s first 4 KiB
/// for the version-token scan (spec §4.4 "Version compatibility"), and
/// the file's total length for the resource-check heuristic. Missing
/// files surface as a native `File` error rather than panicking, since an
/// unreadable model path is an ordinary runtime condition here.
fn read_model_header(path: &str) -> Result<(u64, Vec<u8>), GatewayError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| native_err(NativeErrorKind::File, format!("{path}: {e}")))?;
    let header = std::fs::read(path)
        .map(|bytes| bytes.into_iter().take(4096).collect())
        .unwrap_or_default();
    Ok((metadata.len(), header))
}

pub fn create_default_param<'a>(
    _params: &'a Value,
    ctx: &'a DispatchContextErased,
) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let param = ctx
            .runtime
            .create_default_param()
            .await
            .map_err(|k| native_err(k, "createDefaultParam failed"))?;
        Ok(param)
    })
}

pub fn init<'a>(params: &'a Value, ctx: &'a DispatchContextErased) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let model_path = require_str(params, "model_path")?;
        let (file_size_bytes, _header) = read_model_header(model_path)?;

        let estimated_bytes = estimate_footprint_bytes(file_size_bytes);
        if ctx.handles.total_footprint() + estimated_bytes > available_budget_bytes() {
            return Err(GatewayError::ResourceExhausted(format!(
                "insufficient resources: need {}MB, model is {}MB",
                estimated_bytes / (1024 * 1024),
                file_size_bytes / (1024 * 1024),
            )));
        }

        let mut param = ctx
            .runtime
            .create_default_param()
            .await
            .map_err(|k| native_err(k, "createDefaultParam failed"))?;
        merge_sampler_params(&mut param, params);

        let callback: Arc<dyn crate::native::CallbackSink> = ctx.callback_sink.clone();
        let model_ref = ctx
            .runtime
            .init(model_path, &param, callback)
            .await
            .map_err(|k| native_err(k, format!("init failed for {model_path}")))?;

        let handle_id = ctx.handles.create(model_path, model_ref)?;
        ctx.handles.set_memory_footprint(handle_id, estimated_bytes);

        Ok(json!({
            "handle_id": handle_id.0,
            "system_info": {
                "ram_mb": estimated_bytes / (1024 * 1024),
                "model_size_mb": file_size_bytes / (1024 * 1024),
            }
        }))
    })
}

pub fn lora_init<'a>(params: &'a Value, ctx: &'a DispatchContextErased) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let base_model_path = require_str(params, "base_model_path")?;
        let lora_adapter_path = require_str(params, "lora_adapter_path")?;

        let (base_size_bytes, base_header) = read_model_header(base_model_path)?;
        let (lora_size_bytes, lora_header) = read_model_header(lora_adapter_path)?;

        let base_version = extract_version_token(&base_header);
        let lora_version = extract_version_token(&lora_header);
        if base_version.major != lora_version.major
            || base_version.minor != lora_version.minor
            || base_version.patch != lora_version.patch
        {
            return Err(GatewayError::LoraVersionMismatch {
                base: base_version.to_string(),
                adapter: lora_version.to_string(),
            });
        }

        let estimated_bytes =
            estimate_footprint_bytes(base_size_bytes) + estimate_footprint_bytes(lora_size_bytes);
        if ctx.handles.total_footprint() + estimated_bytes > available_budget_bytes() {
            return Err(GatewayError::ResourceExhausted(format!(
                "insufficient resources: need {}MB",
                estimated_bytes / (1024 * 1024),
            )));
        }

        let mut param = ctx
            .runtime
            .create_default_param()
            .await
            .map_err(|k| native_err(k, "createDefaultParam failed"))?;
        merge_sampler_params(&mut param, params);

        let callback: Arc<dyn crate::native::CallbackSink> = ctx.callback_sink.clone();
        let model_ref = ctx
            .runtime
            .lora_init(base_model_path, lora_adapter_path, &param, callback)
            .await
            .map_err(|k| native_err(k, "lora_init failed"))?;

        let handle_id = ctx.handles.create(base_model_path, model_ref)?;
        ctx.handles.set_memory_footprint(handle_id, estimated_bytes);

        Ok(json!({
            "handle_id": handle_id.0,
            "system_info": {
                "ram_mb": estimated_bytes / (1024 * 1024),
                "base_model_size_mb": base_size_bytes / (1024 * 1024),
                "lora_size_mb": lora_size_bytes / (1024 * 1024),
            }
        }))
    })
}

/// The worker's stand-in for a queried system memory budget; pending the
/// `native::NativeRuntime::system_info` extension point named in spec §6
/// Open Questions, this returns a generous fixed ceiling so the resource
/// check exercises its arithmetic without depending on host introspection
/// this crate does not yet own.
fn available_budget_bytes() -> u64 {
    64 * 1024 * 1024 * 1024
}

fn merge_sampler_params(param: &mut NativeParams, params: &Value) {
    if let Some(obj) = param.as_object_mut() {
        for field in ["max_context_len", "temperature", "top_p"] {
            if let Some(value) = params.get(field) {
                obj.insert(field.to_string(), value.clone());
            }
        }
    }
}

pub fn run<'a>(params: &'a Value, ctx: &'a DispatchContextErased) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let handle_id = extract_handle_id(params)?;
        let handle = ctx
            .handles
            .get(handle_id)
            .ok_or(HandleError::InvalidHandle(handle_id.0))?;

        if ctx.streaming.is_active() {
            return Err(GatewayError::native(
                NativeErrorKind::ResourceBusy,
                "another run is already in flight (at-most-one rule)",
            ));
        }

        let input = build_input(params)?;
        let infer_param = params.get("infer_param").cloned().unwrap_or(json!({}));

        ctx.streaming
            .install(handle_id, ctx.request_id, ctx.transport_kind);
        ctx.handles.mark_streaming(handle_id, true);

        let result = ctx.runtime.run(handle.model_ref, &input, &infer_param).await;

        ctx.handles.mark_streaming(handle_id, false);

        match result {
            Ok(text) => Ok(json!({ "text": text })),
            Err(kind) => Err(native_err(kind, "run failed")),
        }
    })
}

pub fn run_async<'a>(params: &'a Value, ctx: &'a DispatchContextErased) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let handle_id = extract_handle_id(params)?;
        let handle = ctx
            .handles
            .get(handle_id)
            .ok_or(HandleError::InvalidHandle(handle_id.0))?;

        if ctx.streaming.is_active() {
            return Err(GatewayError::native(
                NativeErrorKind::ResourceBusy,
                "another run is already in flight (at-most-one rule)",
            ));
        }

        let input = build_input(params)?;
        let infer_param = params.get("infer_param").cloned().unwrap_or(json!({}));

        ctx.streaming
            .install(handle_id, ctx.request_id, ctx.transport_kind);
        ctx.handles.mark_streaming(handle_id, true);

        ctx.runtime
            .run_async(handle.model_ref, &input, &infer_param)
            .await
            .map_err(|k| native_err(k, "run_async failed"))?;

        Ok(json!({ "started": true }))
    })
}

fn build_input(params: &Value) -> Result<NativeParams, GatewayError> {
    let has_input = params.get("prompt").is_some()
        || params.get("tokens").is_some()
        || params.get("embed").is_some()
        || params.get("multimodal").is_some();
    if !has_input {
        return Err(GatewayError::InvalidParams(
            "run requires one of prompt, tokens, embed, multimodal".to_string(),
        ));
    }
    Ok(params.clone())
}

pub fn is_running<'a>(params: &'a Value, ctx: &'a DispatchContextErased) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let handle_id = extract_handle_id(params)?;
        let handle = ctx
            .handles
            .get(handle_id)
            .ok_or(HandleError::InvalidHandle(handle_id.0))?;
        let running = ctx
            .runtime
            .is_running(handle.model_ref)
            .await
            .map_err(|k| native_err(k, "is_running failed"))?;
        Ok(json!({ "is_running": running }))
    })
}

pub fn abort<'a>(params: &'a Value, ctx: &'a DispatchContextErased) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let handle_id = extract_handle_id(params)?;
        let handle = ctx
            .handles
            .get(handle_id)
            .ok_or(HandleError::InvalidHandle(handle_id.0))?;
        ctx.runtime
            .abort(handle.model_ref)
            .await
            .map_err(|k| native_err(k, "abort failed"))?;
        Ok(json!({ "status": "aborted" }))
    })
}

pub fn destroy<'a>(params: &'a Value, ctx: &'a DispatchContextErased) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let handle_id = extract_handle_id(params)?;
        let handle = ctx
            .handles
            .get(handle_id)
            .ok_or(HandleError::InvalidHandle(handle_id.0))?;

        // `destroy` must not pre-empt an in-flight run (spec §4.4
        // "Tie-breaks"); `HandlePool::destroy` itself enforces this by
        // refusing while the handle is marked streaming.
        //
        // Native teardown runs before the pool slot is freed: if it fails,
        // the handle stays valid and reusable rather than leaking a slot
        // whose native instance may still hold live resources.
        ctx.runtime
            .destroy(handle.model_ref)
            .await
            .map_err(|k| native_err(k, "native destroy failed"))?;

        ctx.handles.destroy(handle_id)?;

        Ok(json!({ "status": "destroyed" }))
    })
}

pub fn load_lora<'a>(params: &'a Value, ctx: &'a DispatchContextErased) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let handle_id = extract_handle_id(params)?;
        let handle = ctx
            .handles
            .get(handle_id)
            .ok_or(HandleError::InvalidHandle(handle_id.0))?;
        let adapter = params.get("adapter").cloned().unwrap_or(json!({}));
        ctx.runtime
            .load_lora(handle.model_ref, &adapter)
            .await
            .map_err(|k| native_err(k, "load_lora failed"))?;
        Ok(json!({ "success": true }))
    })
}

pub fn load_prompt_cache<'a>(
    params: &'a Value,
    ctx: &'a DispatchContextErased,
) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let handle_id = extract_handle_id(params)?;
        let handle = ctx
            .handles
            .get(handle_id)
            .ok_or(HandleError::InvalidHandle(handle_id.0))?;
        let path = require_str(params, "path")?;
        ctx.runtime
            .load_prompt_cache(handle.model_ref, path)
            .await
            .map_err(|k| native_err(k, "load_prompt_cache failed"))?;
        Ok(json!({ "success": true }))
    })
}

pub fn release_prompt_cache<'a>(
    params: &'a Value,
    ctx: &'a DispatchContextErased,
) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let handle_id = extract_handle_id(params)?;
        let handle = ctx
            .handles
            .get(handle_id)
            .ok_or(HandleError::InvalidHandle(handle_id.0))?;
        // The native contract documents that this call may run against
        // uninitialized cache state; surface whatever it reports rather
        // than second-guessing it (spec §14 open question).
        ctx.runtime
            .release_prompt_cache(handle.model_ref)
            .await
            .map_err(|k| native_err(k, "release_prompt_cache failed"))?;
        Ok(json!({ "success": true }))
    })
}

pub fn clear_kv_cache<'a>(
    params: &'a Value,
    ctx: &'a DispatchContextErased,
) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let handle_id = extract_handle_id(params)?;
        let handle = ctx
            .handles
            .get(handle_id)
            .ok_or(HandleError::InvalidHandle(handle_id.0))?;

        let keep_system_prompt = params
            .get("keep_system_prompt")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let start_pos = parse_u64_array(params.get("start_pos"));
        let end_pos = parse_u64_array(params.get("end_pos"));

        ctx.runtime
            .clear_kv_cache(
                handle.model_ref,
                keep_system_prompt,
                start_pos.as_deref(),
                end_pos.as_deref(),
            )
            .await
            .map_err(|k| native_err(k, "clear_kv_cache failed"))?;
        Ok(json!({ "success": true }))
    })
}

fn parse_u64_array(value: Option<&Value>) -> Option<Vec<u64>> {
    value?.as_array().map(|arr| {
        arr.iter()
            .filter_map(Value::as_u64)
            .collect::<Vec<u64>>()
    })
}

pub fn get_kv_cache_size<'a>(
    params: &'a Value,
    ctx: &'a DispatchContextErased,
) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let handle_id = extract_handle_id(params)?;
        let handle = ctx
            .handles
            .get(handle_id)
            .ok_or(HandleError::InvalidHandle(handle_id.0))?;
        let sizes = ctx
            .runtime
            .get_kv_cache_size(handle.model_ref)
            .await
            .map_err(|k| native_err(k, "get_kv_cache_size failed"))?;
        Ok(json!({ "sizes": sizes }))
    })
}

pub fn set_chat_template<'a>(
    params: &'a Value,
    ctx: &'a DispatchContextErased,
) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let handle_id = extract_handle_id(params)?;
        let handle = ctx
            .handles
            .get(handle_id)
            .ok_or(HandleError::InvalidHandle(handle_id.0))?;
        let system = params.get("system").and_then(Value::as_str).unwrap_or("");
        let prefix = params.get("prefix").and_then(Value::as_str).unwrap_or("");
        let postfix = params.get("postfix").and_then(Value::as_str).unwrap_or("");
        ctx.runtime
            .set_chat_template(handle.model_ref, system, prefix, postfix)
            .await
            .map_err(|k| native_err(k, "set_chat_template failed"))?;
        Ok(json!({ "success": true }))
    })
}

pub fn set_function_tools<'a>(
    params: &'a Value,
    ctx: &'a DispatchContextErased,
) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let handle_id = extract_handle_id(params)?;
        let handle = ctx
            .handles
            .get(handle_id)
            .ok_or(HandleError::InvalidHandle(handle_id.0))?;
        let system = params.get("system").and_then(Value::as_str).unwrap_or("");
        let tools = params.get("tools").cloned().unwrap_or(json!([]));
        let response_template = params
            .get("response_template")
            .and_then(Value::as_str)
            .unwrap_or("");
        ctx.runtime
            .set_function_tools(handle.model_ref, system, &tools, response_template)
            .await
            .map_err(|k| native_err(k, "set_function_tools failed"))?;
        Ok(json!({ "success": true }))
    })
}

pub fn set_cross_attn_params<'a>(
    params: &'a Value,
    ctx: &'a DispatchContextErased,
) -> super::HandlerFuture<'a> {
    Box::pin(async move {
        let handle_id = extract_handle_id(params)?;
        let handle = ctx
            .handles
            .get(handle_id)
            .ok_or(HandleError::InvalidHandle(handle_id.0))?;
        let attn_params = params.get("params").cloned().unwrap_or(json!({}));
        ctx.runtime
            .set_cross_attn_params(handle.model_ref, &attn_params)
            .await
            .map_err(|k| native_err(k, "set_cross_attn_params failed"))?;
        Ok(json!({ "success": true }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::HandlePool;
    use crate::native::NullRuntime;
    use crate::streaming::{ChunkDelivery, StreamChunk, StreamingManager};

    struct NoopDelivery;
    impl ChunkDelivery for NoopDelivery {
        fn deliver(&self, _transport_kind: TransportKind, _chunk: StreamChunk) {}
    }

    fn test_ctx() -> DispatchContextErased {
        let streaming = Arc::new(StreamingManager::new(NoopDelivery));
        DispatchContextErased {
            handles: Arc::new(HandlePool::new(8)),
            runtime: Arc::new(NullRuntime::default()),
            callback_sink: streaming.clone(),
            streaming,
            transport_kind: TransportKind::Stdio,
            request_id: 1,
        }
    }

    #[test]
    fn extract_handle_id_rejects_missing_field() {
        let err = extract_handle_id(&json!({})).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidParams(_)));
    }

    #[test]
    fn extract_handle_id_reads_numeric_field() {
        let id = extract_handle_id(&json!({"handle_id": 7})).unwrap();
        assert_eq!(id, HandleId(7));
    }

    #[tokio::test]
    async fn run_requires_at_least_one_input_field() {
        let ctx = test_ctx();
        let handle_id = ctx.handles.create("/models/m.bin", 1).unwrap();
        let params = json!({ "handle_id": handle_id.0 });
        let err = run(&params, &ctx).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn run_echoes_prompt_through_null_runtime() {
        let ctx = test_ctx();
        let handle_id = ctx.handles.create("/models/m.bin", 1).unwrap();
        let params = json!({ "handle_id": handle_id.0, "prompt": "hi" });
        let result = run(&params, &ctx).await.unwrap();
        assert_eq!(result["text"], "echo: hi");
        assert!(!ctx.streaming.is_active());
    }

    #[tokio::test]
    async fn run_rejects_invalid_handle() {
        let ctx = test_ctx();
        let params = json!({ "handle_id": 999, "prompt": "hi" });
        let err = run(&params, &ctx).await.unwrap_err();
        assert!(matches!(err, GatewayError::Handle(HandleError::InvalidHandle(999))));
    }

    #[tokio::test]
    async fn destroy_reports_status() {
        let ctx = test_ctx();
        let handle_id = ctx.handles.create("/models/m.bin", 1).unwrap();
        let params = json!({ "handle_id": handle_id.0 });
        let result = destroy(&params, &ctx).await.unwrap();
        assert_eq!(result["status"], "destroyed");
        assert!(!ctx.handles.is_valid(handle_id));
    }

    #[tokio::test]
    async fn clear_kv_cache_accepts_absent_ranges() {
        let ctx = test_ctx();
        let handle_id = ctx.handles.create("/models/m.bin", 1).unwrap();
        let params = json!({ "handle_id": handle_id.0, "keep_system_prompt": true });
        let result = clear_kv_cache(&params, &ctx).await.unwrap();
        assert_eq!(result["success"], true);
    }
}
