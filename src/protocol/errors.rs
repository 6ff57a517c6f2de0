//! Error Taxonomy - JSON-RPC Codes, Gateway Codes, and Native-Error Mapping
//!
//! One enum per concern, each carrying its own `#[error(...)]` message and a
//! `From` conversion into the next layer up, following the teacher's
//! per-layer error hierarchy (`ProtocolError` -> ... -> `GatewayError`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON-RPC 2.0 protocol-level errors, code space `-326xx`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum JsonRpcError {
    /// Parse error (-32700): invalid JSON was received.
    #[error("Parse error: {message}")]
    ParseError { message: String },

    /// Invalid request (-32600): not a valid JSON-RPC 2.0 request object.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Method not found (-32601).
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    /// Invalid params (-32602).
    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    /// Internal error (-32603): catch-all for native/internal failures.
    #[error("Internal error: {message}")]
    InternalError { message: String },

    /// Server error with a custom application code (e.g. the gateway
    /// codes below, `-32001..-32006`).
    #[error("Server error {code}: {message}")]
    ServerError { code: i32, message: String },
}

impl JsonRpcError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const STREAM_NOT_FOUND: i32 = -32001;
    pub const NOT_INITIALIZED: i32 = -32002;
    pub const ALREADY_INITIALIZED: i32 = -32003;
    pub const INVALID_PROTOCOL_VERSION: i32 = -32004;
    pub const STREAM_EXPIRED: i32 = -32005;
    pub const STREAM_INVALID_STATE: i32 = -32006;

    /// Get the JSON-RPC error code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            JsonRpcError::ParseError { .. } => Self::PARSE_ERROR,
            JsonRpcError::InvalidRequest { .. } => Self::INVALID_REQUEST,
            JsonRpcError::MethodNotFound { .. } => Self::METHOD_NOT_FOUND,
            JsonRpcError::InvalidParams { .. } => Self::INVALID_PARAMS,
            JsonRpcError::InternalError { .. } => Self::INTERNAL_ERROR,
            JsonRpcError::ServerError { code, .. } => *code,
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    pub fn server_error(code: i32, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
        }
    }

    pub fn not_initialized(message: impl Into<String>) -> Self {
        Self::server_error(Self::NOT_INITIALIZED, message)
    }

    pub fn already_initialized(message: impl Into<String>) -> Self {
        Self::server_error(Self::ALREADY_INITIALIZED, message)
    }

    pub fn invalid_protocol_version(message: impl Into<String>) -> Self {
        Self::server_error(Self::INVALID_PROTOCOL_VERSION, message)
    }

    pub fn stream_not_found(request_id: impl std::fmt::Display) -> Self {
        Self::server_error(
            Self::STREAM_NOT_FOUND,
            format!("no stream buffer for request {request_id}"),
        )
    }

    pub fn stream_expired(request_id: impl std::fmt::Display) -> Self {
        Self::server_error(
            Self::STREAM_EXPIRED,
            format!("stream buffer for request {request_id} expired"),
        )
    }

    pub fn stream_invalid_state(message: impl Into<String>) -> Self {
        Self::server_error(Self::STREAM_INVALID_STATE, message)
    }
}

/// Convenient result type for protocol-level operations.
pub type ProtocolResult<T> = Result<T, JsonRpcError>;

impl From<serde_json::Error> for JsonRpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse_error(err.to_string())
    }
}

/// Native inference runtime error classification (spec.md §7).
///
/// These are never surfaced directly to a client; the dispatcher maps each
/// kind to a [`JsonRpcError`] via [`NativeErrorKind::to_jsonrpc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeErrorKind {
    /// Transient: the underlying call exceeded its internal deadline.
    Timeout,
    /// Transient: a network-backed resource (e.g. remote accelerator) failed.
    Network,
    /// Transient: the runtime is busy serving another call on the handle.
    ResourceBusy,
    /// Transient: the installed callback itself returned a failure.
    CallbackFailure,
    /// Terminal: caller-supplied parameter rejected by the runtime.
    InvalidParam,
    /// Terminal: referenced model file does not exist.
    ModelNotFound,
    /// Terminal: allocation failed inside the runtime.
    Memory,
    /// Terminal: no compatible accelerator device.
    Device,
    /// Terminal: context window exceeded.
    Context,
    /// Terminal: tokenizer rejected the input.
    Token,
    /// Terminal: file I/O failure reading a model/adapter/cache file.
    File,
    /// Terminal: the process lacks permission for the requested file.
    Permission,
    /// Terminal: base/adapter version mismatch.
    Version,
    /// Terminal: the runtime failed during its own initialization.
    Init,
}

impl NativeErrorKind {
    /// Whether the recovery supervisor should attempt to retry calls of
    /// this kind rather than surface it immediately as terminal.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Network | Self::ResourceBusy | Self::CallbackFailure
        )
    }

    /// Map to the JSON-RPC error code this kind surfaces as, per spec.md §7.
    pub fn to_jsonrpc(self, message: impl Into<String>) -> JsonRpcError {
        let message = message.into();
        match self {
            Self::InvalidParam => JsonRpcError::invalid_params(message),
            _ => JsonRpcError::internal_error(message),
        }
    }
}

/// Errors from the handle pool (spec.md §4.1).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandleError {
    #[error("handle pool exhausted: all slots in use")]
    Exhausted,

    #[error("invalid or unknown handle: {0}")]
    InvalidHandle(u32),

    #[error("handle {0} is busy: a streaming context is active")]
    Busy(u32),
}

impl From<HandleError> for JsonRpcError {
    fn from(err: HandleError) -> Self {
        match err {
            HandleError::Exhausted => {
                JsonRpcError::internal_error("handle pool exhausted: all slots in use")
            }
            HandleError::InvalidHandle(id) => {
                JsonRpcError::invalid_params(format!("invalid handle: {id}"))
            }
            HandleError::Busy(id) => {
                JsonRpcError::server_error(-32603, format!("handle {id} is busy (RESOURCE_BUSY)"))
            }
        }
    }
}

/// Errors surfaced by the operation dispatcher (spec.md §4.4).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error("native runtime error ({kind:?}): {message}")]
    Native {
        kind: NativeErrorKind,
        message: String,
    },

    #[error("resource check failed: {0}")]
    ResourceExhausted(String),

    #[error("incompatible LoRA adapter version: base {base}, adapter {adapter}")]
    LoraVersionMismatch { base: String, adapter: String },
}

impl GatewayError {
    pub fn native(kind: NativeErrorKind, message: impl Into<String>) -> Self {
        Self::Native {
            kind,
            message: message.into(),
        }
    }
}

impl From<GatewayError> for JsonRpcError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::MethodNotFound(m) => JsonRpcError::method_not_found(m),
            GatewayError::InvalidParams(m) => JsonRpcError::invalid_params(m),
            GatewayError::Handle(h) => h.into(),
            GatewayError::Native { kind, message } => kind.to_jsonrpc(message),
            GatewayError::ResourceExhausted(m) => JsonRpcError::internal_error(m),
            GatewayError::LoraVersionMismatch { base, adapter } => JsonRpcError::invalid_params(
                format!("incompatible LoRA adapter version: base {base}, adapter {adapter}"),
            ),
        }
    }
}

/// Errors from the recovery supervisor (spec.md §4.9). Never surfaced to a
/// client — only logged and fed back into recovery-record bookkeeping.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecoveryError {
    #[error("transport {0:?} restart failed: {1}")]
    RestartFailed(crate::recovery::TransportType, String),

    #[error("transport {0:?} exhausted retries")]
    RetriesExhausted(crate::recovery::TransportType),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_spec_table() {
        assert_eq!(JsonRpcError::PARSE_ERROR, -32700);
        assert_eq!(JsonRpcError::INVALID_REQUEST, -32600);
        assert_eq!(JsonRpcError::METHOD_NOT_FOUND, -32601);
        assert_eq!(JsonRpcError::INVALID_PARAMS, -32602);
        assert_eq!(JsonRpcError::INTERNAL_ERROR, -32603);
        assert_eq!(JsonRpcError::STREAM_NOT_FOUND, -32001);
        assert_eq!(JsonRpcError::NOT_INITIALIZED, -32002);
        assert_eq!(JsonRpcError::ALREADY_INITIALIZED, -32003);
        assert_eq!(JsonRpcError::INVALID_PROTOCOL_VERSION, -32004);
        assert_eq!(JsonRpcError::STREAM_EXPIRED, -32005);
        assert_eq!(JsonRpcError::STREAM_INVALID_STATE, -32006);
    }

    #[test]
    fn native_error_recoverability_matches_spec() {
        assert!(NativeErrorKind::Timeout.is_recoverable());
        assert!(NativeErrorKind::Network.is_recoverable());
        assert!(NativeErrorKind::ResourceBusy.is_recoverable());
        assert!(NativeErrorKind::CallbackFailure.is_recoverable());
        assert!(!NativeErrorKind::InvalidParam.is_recoverable());
        assert!(!NativeErrorKind::ModelNotFound.is_recoverable());
    }

    #[test]
    fn invalid_param_native_error_maps_to_invalid_params_code() {
        let err = NativeErrorKind::InvalidParam.to_jsonrpc("bad sampler temperature");
        assert_eq!(err.error_code(), JsonRpcError::INVALID_PARAMS);
    }

    #[test]
    fn other_native_errors_map_to_internal_error_code() {
        for kind in [
            NativeErrorKind::Timeout,
            NativeErrorKind::ModelNotFound,
            NativeErrorKind::Memory,
            NativeErrorKind::Device,
        ] {
            let err = kind.to_jsonrpc("native failure");
            assert_eq!(err.error_code(), JsonRpcError::INTERNAL_ERROR);
        }
    }

    #[test]
    fn handle_error_invalid_handle_maps_to_invalid_params() {
        let err: JsonRpcError = HandleError::InvalidHandle(7).into();
        assert_eq!(err.error_code(), JsonRpcError::INVALID_PARAMS);
    }
}
