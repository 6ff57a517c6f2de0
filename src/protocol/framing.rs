//! JSON-RPC framing — turning a raw inbound byte frame into dispatchable
//! items (spec §4.8).
//!
//! Built on the existing `JsonRpcMessage`/`JsonRpcRequest`/
//! `JsonRpcNotification` wire types: `parse_frame` validates UTF-8 (via
//! `std::str::from_utf8`, which already rejects over-long encodings and
//! lone surrogates — no custom validator needed), then accepts either a
//! single top-level object or a batch array.

use serde_json::Value;

use super::errors::JsonRpcError;
use super::message::{JsonRpcMessage, JsonRpcRequest};

/// The parsed shape of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Single(JsonRpcMessage),
    Batch(Vec<JsonRpcMessage>),
}

impl Frame {
    /// Every request in the frame, in arrival order, skipping
    /// notifications and any malformed response-shaped item a peer has
    /// no business sending us.
    pub fn requests(&self) -> Vec<&JsonRpcRequest> {
        let items: Vec<&JsonRpcMessage> = match self {
            Frame::Single(m) => vec![m],
            Frame::Batch(ms) => ms.iter().collect(),
        };
        items
            .into_iter()
            .filter_map(|m| match m {
                JsonRpcMessage::Request(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

/// Parses one inbound byte frame (spec §4.8).
///
/// A malformed UTF-8 sequence or invalid JSON surfaces as `ParseError`
/// (-32700); a syntactically valid JSON value that is neither an object
/// nor a non-empty array surfaces as `InvalidRequest` (-32600).
pub fn parse_frame(bytes: &[u8]) -> Result<Frame, JsonRpcError> {
    let text =
        std::str::from_utf8(bytes).map_err(|e| JsonRpcError::parse_error(e.to_string()))?;
    let value: Value = serde_json::from_str(text)?;

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(JsonRpcError::invalid_request("batch must not be empty"));
            }
            let messages = items
                .into_iter()
                .map(|item| serde_json::from_value::<JsonRpcMessage>(item).map_err(JsonRpcError::from))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Frame::Batch(messages))
        }
        Value::Object(_) => {
            let message: JsonRpcMessage = serde_json::from_value(value)?;
            Ok(Frame::Single(message))
        }
        _ => Err(JsonRpcError::invalid_request(
            "frame must be a JSON object or a non-empty array",
        )),
    }
}
