//! Operation dispatcher — the static method table (spec §4.4).
//!
//! Grounded in the teacher's closed-dispatch pattern (a static handler
//! table resolved by method name) and in
//! `original_source/src/io/operations.c`'s method table, generalized from
//! a `switch` over method names to a `HashMap<&'static str, HandlerFn>`
//! built once behind `std::sync::OnceLock`, the idiomatic Rust
//! replacement for a C static dispatch table.

mod methods;
mod resource_check;
mod version_check;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use serde_json::Value;

use crate::handles::HandlePool;
use crate::native::NativeRuntime;
use crate::protocol::errors::GatewayError;
use crate::streaming::StreamInstaller;
use crate::transport::TransportKind;

pub use resource_check::{estimate_footprint_bytes, ResourceTier};
pub use version_check::extract_version_token;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, GatewayError>> + Send + 'a>>;

/// Every method handler has this shape, generalized from spec §4.4's
/// `(handle_id, params_json_string, result_buffer) -> status` into an
/// async Rust signature that returns the result JSON value directly or a
/// typed [`GatewayError`].
pub type HandlerFn = for<'a> fn(&'a Value, &'a DispatchContextErased) -> HandlerFuture<'a>;

/// Type-erased context handle passed to handler functions, so the
/// `HandlerFn` signature does not need to be generic over the concrete
/// `streaming::ChunkDelivery` a gateway wires up (a static
/// `HashMap<&str, HandlerFn>` cannot hold distinct monomorphizations per
/// delivery type). The gateway constructs one of these per dispatch call.
pub struct DispatchContextErased {
    pub handles: Arc<HandlePool>,
    pub runtime: Arc<dyn NativeRuntime>,
    pub streaming: Arc<dyn StreamInstaller>,
    pub callback_sink: Arc<dyn crate::native::CallbackSink>,
    pub transport_kind: TransportKind,
    pub request_id: u32,
}

/// The 15 methods named in spec §4.4's table, 1:1 with the native
/// runtime's exported entry points.
pub const METHOD_NAMES: &[&str] = &[
    "createDefaultParam",
    "init",
    "lora_init",
    "run",
    "run_async",
    "is_running",
    "abort",
    "destroy",
    "load_lora",
    "load_prompt_cache",
    "release_prompt_cache",
    "clear_kv_cache",
    "get_kv_cache_size",
    "set_chat_template",
    "set_function_tools",
    "set_cross_attn_params",
];

fn table() -> &'static HashMap<&'static str, HandlerFn> {
    static TABLE: OnceLock<HashMap<&'static str, HandlerFn>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut m: HashMap<&'static str, HandlerFn> = HashMap::new();
        m.insert("createDefaultParam", methods::create_default_param);
        m.insert("init", methods::init);
        m.insert("lora_init", methods::lora_init);
        m.insert("run", methods::run);
        m.insert("run_async", methods::run_async);
        m.insert("is_running", methods::is_running);
        m.insert("abort", methods::abort);
        m.insert("destroy", methods::destroy);
        m.insert("load_lora", methods::load_lora);
        m.insert("load_prompt_cache", methods::load_prompt_cache);
        m.insert("release_prompt_cache", methods::release_prompt_cache);
        m.insert("clear_kv_cache", methods::clear_kv_cache);
        m.insert("get_kv_cache_size", methods::get_kv_cache_size);
        m.insert("set_chat_template", methods::set_chat_template);
        m.insert("set_function_tools", methods::set_function_tools);
        m.insert("set_cross_attn_params", methods::set_cross_attn_params);
        m
    })
}

/// Methods that do not require a pre-existing `handle_id` (spec §4.4
/// "Validation rules").
fn requires_handle(method: &str) -> bool {
    !matches!(method, "createDefaultParam" | "init" | "lora_init")
}

/// Resolve `method` in the static table and invoke it, performing the
/// handle-id validation rule common to every method but the three
/// handle-creating ones (spec §4.4).
pub async fn dispatch(
    method: &str,
    params: &Value,
    ctx: &DispatchContextErased,
) -> Result<Value, GatewayError> {
    let handler = table()
        .get(method)
        .ok_or_else(|| GatewayError::MethodNotFound(method.to_string()))?;

    if requires_handle(method) {
        let handle_id = methods::extract_handle_id(params)?;
        if !ctx.handles.is_valid(handle_id) {
            return Err(GatewayError::InvalidParams(format!(
                "invalid handle: {}",
                handle_id.0
            )));
        }
    }

    handler(params, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_spec_method_is_registered() {
        let table = table();
        for name in METHOD_NAMES {
            assert!(table.contains_key(name), "missing handler for {name}");
        }
        assert_eq!(table.len(), METHOD_NAMES.len());
    }

    #[test]
    fn handle_creating_methods_are_exempt_from_handle_validation() {
        assert!(!requires_handle("createDefaultParam"));
        assert!(!requires_handle("init"));
        assert!(!requires_handle("lora_init"));
        assert!(requires_handle("run"));
        assert!(requires_handle("destroy"));
    }
}
