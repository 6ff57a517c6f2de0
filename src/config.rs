//! Gateway configuration
//!
//! Parsing the CLI or config file that produces a [`GatewayConfig`] is out
//! of scope for this crate (spec §1); this module only defines the typed
//! struct and the recommended defaults named throughout the spec.

use std::time::Duration;

/// Which transports are active for a given gateway instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportToggle {
    pub stdio: bool,
    pub tcp: bool,
    pub udp: bool,
    pub http: bool,
    pub websocket: bool,
}

impl Default for TransportToggle {
    fn default() -> Self {
        Self {
            stdio: true,
            tcp: false,
            udp: false,
            http: false,
            websocket: false,
        }
    }
}

/// Tunables for every subsystem in the gateway, collected into one struct
/// so a thin CLI (out of scope here) has a single place to land parsed
/// values.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum concurrently live handle slots (recommended 8).
    pub max_handles: usize,

    /// Capacity of the request and response ring buffers (recommended 1024).
    pub queue_size: usize,

    /// Number of concurrent worker tasks draining the request queue (recommended 5).
    pub worker_count: usize,

    /// Per-request timeout, measured from enqueue to pop (recommended 30s).
    pub request_timeout_ms: u64,

    /// Maximum concurrently live HTTP chunk buffers (recommended 100).
    pub http_max_buffers: usize,

    /// Growth ceiling for a single HTTP chunk buffer (recommended 64 KiB).
    pub http_max_chunk_size: usize,

    /// Reaper sweep interval for the HTTP chunk buffer table (recommended 30s).
    pub http_cleanup_interval_secs: u64,

    /// Idle eviction threshold for HTTP chunk buffers (recommended 60s).
    pub http_buffer_timeout_secs: u64,

    /// Which transports this instance serves.
    pub transports: TransportToggle,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_handles: 8,
            queue_size: 1024,
            worker_count: 5,
            request_timeout_ms: 30_000,
            http_max_buffers: 100,
            http_max_chunk_size: 64 * 1024,
            http_cleanup_interval_secs: 30,
            http_buffer_timeout_secs: 60,
            transports: TransportToggle::default(),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn http_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.http_cleanup_interval_secs)
    }

    pub fn http_buffer_timeout(&self) -> Duration {
        Duration::from_secs(self.http_buffer_timeout_secs)
    }
}
