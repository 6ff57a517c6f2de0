//! Native runtime contract (spec §6.2) — an external collaborator
//!
//! The on-device inference runtime is taken as an opaque black box; this
//! module defines only the Rust-side trait the dispatcher calls through
//! and the callback-state enum the native side drives. Binding a concrete
//! accelerator library via FFI is out of scope (spec §6.2); this crate
//! ships a [`NullRuntime`] test double for unit tests only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::handles::HandleId;
use crate::protocol::errors::NativeErrorKind;

/// Discriminant the native callback passes on every invocation (spec §4.5,
/// §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackState {
    Normal = 0,
    Waiting = 1,
    Finish = 2,
    Error = 3,
}

/// One token/delta emitted by the native runtime's callback.
#[derive(Debug, Clone)]
pub struct NativeResult {
    pub text: String,
}

/// A single invocation of the installed callback, already decoded from the
/// native runtime's `(Result, userdata, state)` triple (spec §6.2).
pub struct CallbackInvocation {
    pub handle_id: HandleId,
    pub state: CallbackState,
    pub result: Option<NativeResult>,
    pub error: Option<NativeErrorKind>,
}

/// Sink the native runtime's callback delivers chunks to. Implemented by
/// the streaming module so the native runtime crate stays decoupled from
/// transport concerns.
pub trait CallbackSink: Send + Sync {
    fn on_callback(&self, invocation: CallbackInvocation);
}

/// Parameters accepted by `init`/`lora_init`/`run` — left as untyped JSON
/// at this boundary since the native runtime contract (spec §6.2) takes
/// opaque `Param`/`Input`/`InferParam` structs this crate never interprets
/// beyond what the dispatcher validates.
pub type NativeParams = serde_json::Value;

/// The operations this crate consumes from the inference runtime,
/// transcribed 1:1 from spec §6.2's native contract, generalized to an
/// async trait per the teacher's `async-trait` usage at its own
/// integration boundaries.
#[async_trait::async_trait]
pub trait NativeRuntime: Send + Sync {
    async fn create_default_param(&self) -> Result<NativeParams, NativeErrorKind>;

    async fn init(
        &self,
        model_path: &str,
        param: &NativeParams,
        callback: Arc<dyn CallbackSink>,
    ) -> Result<u64, NativeErrorKind>;

    async fn lora_init(
        &self,
        base_model_path: &str,
        lora_adapter_path: &str,
        param: &NativeParams,
        callback: Arc<dyn CallbackSink>,
    ) -> Result<u64, NativeErrorKind>;

    async fn load_lora(&self, model_ref: u64, adapter: &NativeParams) -> Result<(), NativeErrorKind>;
    async fn load_prompt_cache(&self, model_ref: u64, path: &str) -> Result<(), NativeErrorKind>;
    async fn release_prompt_cache(&self, model_ref: u64) -> Result<(), NativeErrorKind>;
    async fn clear_kv_cache(
        &self,
        model_ref: u64,
        keep_system_prompt: bool,
        start_pos: Option<&[u64]>,
        end_pos: Option<&[u64]>,
    ) -> Result<(), NativeErrorKind>;
    async fn get_kv_cache_size(&self, model_ref: u64) -> Result<Vec<u64>, NativeErrorKind>;
    async fn set_chat_template(
        &self,
        model_ref: u64,
        system: &str,
        prefix: &str,
        postfix: &str,
    ) -> Result<(), NativeErrorKind>;
    async fn set_function_tools(
        &self,
        model_ref: u64,
        system: &str,
        tools: &NativeParams,
        response_template: &str,
    ) -> Result<(), NativeErrorKind>;
    async fn set_cross_attn_params(
        &self,
        model_ref: u64,
        params: &NativeParams,
    ) -> Result<(), NativeErrorKind>;

    async fn run(
        &self,
        model_ref: u64,
        input: &NativeParams,
        infer_param: &NativeParams,
    ) -> Result<String, NativeErrorKind>;

    async fn run_async(
        &self,
        model_ref: u64,
        input: &NativeParams,
        infer_param: &NativeParams,
    ) -> Result<(), NativeErrorKind>;

    async fn is_running(&self, model_ref: u64) -> Result<bool, NativeErrorKind>;
    async fn abort(&self, model_ref: u64) -> Result<(), NativeErrorKind>;
    async fn destroy(&self, model_ref: u64) -> Result<(), NativeErrorKind>;
}

/// System-info report shape produced by `init`/`lora_init`, per spec §4.4's
/// `{ handle_id, system_info }` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub total_memory_bytes: u64,
    pub available_memory_bytes: u64,
    pub estimated_footprint_bytes: u64,
}

/// A `NativeRuntime` test double that accepts every call and performs no
/// real inference. Used by unit and integration tests, and as the
/// placeholder runtime the binary entry point wires up until a concrete
/// accelerator binding is plugged in (binding one via FFI is out of scope
/// here, spec §6.2).
#[derive(Default)]
pub struct NullRuntime {
    next_ref: std::sync::atomic::AtomicU64,
}

#[async_trait::async_trait]
impl NativeRuntime for NullRuntime {
    async fn create_default_param(&self) -> Result<NativeParams, NativeErrorKind> {
        Ok(serde_json::json!({"max_context_len": 4096, "temperature": 0.8}))
    }

    async fn init(
        &self,
        _model_path: &str,
        _param: &NativeParams,
        _callback: Arc<dyn CallbackSink>,
    ) -> Result<u64, NativeErrorKind> {
        Ok(self
            .next_ref
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1)
    }

    async fn lora_init(
        &self,
        _base_model_path: &str,
        _lora_adapter_path: &str,
        _param: &NativeParams,
        _callback: Arc<dyn CallbackSink>,
    ) -> Result<u64, NativeErrorKind> {
        Ok(self
            .next_ref
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1)
    }

    async fn load_lora(&self, _model_ref: u64, _adapter: &NativeParams) -> Result<(), NativeErrorKind> {
        Ok(())
    }

    async fn load_prompt_cache(&self, _model_ref: u64, _path: &str) -> Result<(), NativeErrorKind> {
        Ok(())
    }

    async fn release_prompt_cache(&self, _model_ref: u64) -> Result<(), NativeErrorKind> {
        Ok(())
    }

    async fn clear_kv_cache(
        &self,
        _model_ref: u64,
        _keep_system_prompt: bool,
        _start_pos: Option<&[u64]>,
        _end_pos: Option<&[u64]>,
    ) -> Result<(), NativeErrorKind> {
        Ok(())
    }

    async fn get_kv_cache_size(&self, _model_ref: u64) -> Result<Vec<u64>, NativeErrorKind> {
        Ok(vec![0])
    }

    async fn set_chat_template(
        &self,
        _model_ref: u64,
        _system: &str,
        _prefix: &str,
        _postfix: &str,
    ) -> Result<(), NativeErrorKind> {
        Ok(())
    }

    async fn set_function_tools(
        &self,
        _model_ref: u64,
        _system: &str,
        _tools: &NativeParams,
        _response_template: &str,
    ) -> Result<(), NativeErrorKind> {
        Ok(())
    }

    async fn set_cross_attn_params(
        &self,
        _model_ref: u64,
        _params: &NativeParams,
    ) -> Result<(), NativeErrorKind> {
        Ok(())
    }

    async fn run(
        &self,
        _model_ref: u64,
        input: &NativeParams,
        _infer_param: &NativeParams,
    ) -> Result<String, NativeErrorKind> {
        let prompt = input.get("prompt").and_then(|p| p.as_str()).unwrap_or("");
        Ok(format!("echo: {prompt}"))
    }

    async fn run_async(
        &self,
        _model_ref: u64,
        _input: &NativeParams,
        _infer_param: &NativeParams,
    ) -> Result<(), NativeErrorKind> {
        Ok(())
    }

    async fn is_running(&self, _model_ref: u64) -> Result<bool, NativeErrorKind> {
        Ok(false)
    }

    async fn abort(&self, _model_ref: u64) -> Result<(), NativeErrorKind> {
        Ok(())
    }

    async fn destroy(&self, _model_ref: u64) -> Result<(), NativeErrorKind> {
        Ok(())
    }
}
