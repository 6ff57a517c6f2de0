//! Protocol Layer - JSON-RPC 2.0 Wire Types and Error Taxonomy
//!
//! This module holds the wire-level JSON-RPC 2.0 message types and the
//! error taxonomy that every other layer (dispatcher, transports, recovery
//! supervisor) maps into before a response reaches a client.
//!
//! ## Module Organization
//!
//! - `message`: JSON-RPC 2.0 message types with trait-based serialization
//! - `errors`: The full error taxonomy — JSON-RPC codes, gateway-specific
//!   codes, and native-runtime error mapping
//! - `framing`: Turns a raw inbound byte frame into dispatchable requests

pub mod errors;
pub mod framing;
pub mod message;

pub use errors::*;
pub use framing::{parse_frame, Frame};
pub use message::*;
