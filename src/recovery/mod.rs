//! Recovery supervisor — per-transport failure classification and
//! exponential-backoff restart (spec §4.9).
//!
//! State enum and backoff formula transcribed unchanged from
//! `original_source/src/lib/transport/recovery.h`'s `recovery_state_t`
//! and `transport_recovery_t`. The per-transport record table reuses the
//! `DashMap` shape [`crate::http_buffer::HttpBufferManager`] establishes
//! for the same reason: one lock-free concurrent table, one background
//! task touching it.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

fn now_ms() -> u64 {
    chrono::Utc::now()
        .timestamp_millis()
        .try_into()
        .unwrap_or(0)
}

/// The five wire encodings this gateway fronts (spec §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportType {
    Stdio,
    Tcp,
    Udp,
    Http,
    WebSocket,
}

/// Failure classification reported by a transport (spec §4.9 "Trigger").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    ConnectionLost,
    Timeout,
    ResourceBusy,
    PermissionDenied,
    PortConflict,
    NetworkError,
    Unknown,
}

impl FailureType {
    /// The fixed recoverable set named in spec §4.9 — all others terminal.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::ConnectionLost | Self::Timeout | Self::ResourceBusy | Self::NetworkError
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Idle,
    Active,
    Failed,
    Success,
}

/// Exponential-backoff parameters, per transport.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_interval_ms: u64,
    pub multiplier: u32,
    pub max_interval_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_interval_ms: 500,
            multiplier: 2,
            max_interval_ms: 30_000,
        }
    }
}

impl BackoffPolicy {
    /// `min(base * multiplier^(n-1), max)` for the n-th consecutive
    /// failure, per spec §4.9.
    pub fn interval_for_attempt(&self, attempt: u32) -> u64 {
        let attempt = attempt.max(1) - 1;
        let scaled = self
            .base_interval_ms
            .saturating_mul((self.multiplier as u64).saturating_pow(attempt));
        scaled.min(self.max_interval_ms)
    }
}

/// One per transport type, process-lived (spec §3).
pub struct RecoveryRecord {
    pub transport_type: TransportType,
    pub consecutive_failure_count: u32,
    pub first_failure_ms: u64,
    pub last_failure_ms: u64,
    pub last_error_message: String,
    pub state: RecoveryState,
    pub backoff_policy: BackoffPolicy,
}

impl RecoveryRecord {
    fn new(transport_type: TransportType, backoff_policy: BackoffPolicy) -> Self {
        Self {
            transport_type,
            consecutive_failure_count: 0,
            first_failure_ms: 0,
            last_failure_ms: 0,
            last_error_message: String::new(),
            state: RecoveryState::Idle,
            backoff_policy,
        }
    }
}

pub type RestartFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// Callback the supervisor invokes to actually restart a transport. Kept
/// as a boxed closure so `recovery` stays decoupled from the concrete
/// `transport` adapter types (mirrors the `streaming::ChunkDelivery`
/// indirection used to avoid the same cyclic dependency).
pub trait TransportRestarter: Send + Sync {
    fn restart(&self, transport_type: TransportType) -> RestartFuture;
}

pub struct RecoverySupervisor<R: TransportRestarter + 'static> {
    records: DashMap<TransportType, RecoveryRecord>,
    restarter: std::sync::Arc<R>,
    total_failures: AtomicU64,
    total_recoveries: AtomicU64,
}

impl<R: TransportRestarter + 'static> RecoverySupervisor<R> {
    pub fn new(restarter: std::sync::Arc<R>) -> Self {
        Self {
            records: DashMap::new(),
            restarter,
            total_failures: AtomicU64::new(0),
            total_recoveries: AtomicU64::new(0),
        }
    }

    pub fn configure(&self, transport_type: TransportType, policy: BackoffPolicy) {
        self.records
            .entry(transport_type)
            .and_modify(|r| r.backoff_policy = policy)
            .or_insert_with(|| RecoveryRecord::new(transport_type, policy));
    }

    /// A transport calls this on failure (spec §4.9 "Trigger"). On a
    /// recoverable failure within `max_retries`, spawns a recovery task
    /// that sleeps the backoff interval, then restarts the transport.
    pub fn report_failure(
        self: &std::sync::Arc<Self>,
        transport_type: TransportType,
        failure_type: FailureType,
        message: impl Into<String>,
    ) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let message = message.into();
        let now = now_ms();

        let (attempt, policy, should_retry) = {
            let mut record = self
                .records
                .entry(transport_type)
                .or_insert_with(|| RecoveryRecord::new(transport_type, BackoffPolicy::default()));

            if record.consecutive_failure_count == 0 {
                record.first_failure_ms = now;
                record.state = RecoveryState::Active;
            }
            record.consecutive_failure_count += 1;
            record.last_failure_ms = now;
            record.last_error_message = message.clone();

            let should_retry = failure_type.is_recoverable()
                && record.consecutive_failure_count <= record.backoff_policy.max_retries;
            if !should_retry {
                record.state = RecoveryState::Failed;
            }
            (
                record.consecutive_failure_count,
                record.backoff_policy,
                should_retry,
            )
        };

        if !should_retry {
            tracing::warn!(?transport_type, ?failure_type, %message, "transport failure is terminal, not retrying");
            return;
        }

        let delay_ms = policy.interval_for_attempt(attempt);
        tracing::warn!(?transport_type, ?failure_type, attempt, delay_ms, "scheduling transport recovery");

        let supervisor = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            let result = supervisor.restarter.restart(transport_type).await;
            supervisor.on_restart_result(transport_type, result);
        });
    }

    fn on_restart_result(&self, transport_type: TransportType, result: Result<(), String>) {
        let mut record = match self.records.get_mut(&transport_type) {
            Some(r) => r,
            None => return,
        };
        match result {
            Ok(()) => {
                record.state = RecoveryState::Success;
                record.consecutive_failure_count = 0;
                self.total_recoveries.fetch_add(1, Ordering::Relaxed);
            }
            Err(message) => {
                record.last_error_message = message;
                record.state = RecoveryState::Failed;
            }
        }
    }

    /// `success -> idle` once a quiescent period passes with no further
    /// failures (spec §4.9 state machine).
    pub fn quiesce(&self, transport_type: TransportType) {
        if let Some(mut record) = self.records.get_mut(&transport_type) {
            if record.state == RecoveryState::Success {
                record.state = RecoveryState::Idle;
            }
        }
    }

    pub fn state_of(&self, transport_type: TransportType) -> Option<RecoveryState> {
        self.records.get(&transport_type).map(|r| r.state)
    }

    pub fn failure_count(&self, transport_type: TransportType) -> u32 {
        self.records
            .get(&transport_type)
            .map(|r| r.consecutive_failure_count)
            .unwrap_or(0)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    pub fn total_recoveries(&self) -> u64 {
        self.total_recoveries.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct AlwaysSucceeds {
        attempts: Arc<AtomicUsize>,
    }

    impl TransportRestarter for AlwaysSucceeds {
        fn restart(&self, _transport_type: TransportType) -> RestartFuture {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            Box::pin(async { Ok(()) })
        }
    }

    struct AlwaysFails;

    impl TransportRestarter for AlwaysFails {
        fn restart(&self, _transport_type: TransportType) -> RestartFuture {
            Box::pin(async { Err("boom".to_string()) })
        }
    }

    #[test]
    fn backoff_doubles_and_caps_at_max_interval() {
        let policy = BackoffPolicy {
            max_retries: 10,
            base_interval_ms: 100,
            multiplier: 2,
            max_interval_ms: 1000,
        };
        assert_eq!(policy.interval_for_attempt(1), 100);
        assert_eq!(policy.interval_for_attempt(2), 200);
        assert_eq!(policy.interval_for_attempt(3), 400);
        assert_eq!(policy.interval_for_attempt(5), 1000); // would be 1600, capped
    }

    #[test]
    fn terminal_failure_types_are_not_recoverable() {
        assert!(!FailureType::PermissionDenied.is_recoverable());
        assert!(!FailureType::PortConflict.is_recoverable());
        assert!(!FailureType::Unknown.is_recoverable());
        assert!(FailureType::ConnectionLost.is_recoverable());
        assert!(FailureType::Timeout.is_recoverable());
    }

    #[tokio::test]
    async fn recoverable_failure_eventually_succeeds_and_resets_counter() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let restarter = Arc::new(AlwaysSucceeds {
            attempts: attempts.clone(),
        });
        let supervisor = Arc::new(RecoverySupervisor::new(restarter));
        supervisor.configure(
            TransportType::Tcp,
            BackoffPolicy {
                max_retries: 3,
                base_interval_ms: 1,
                multiplier: 2,
                max_interval_ms: 5,
            },
        );

        supervisor.report_failure(TransportType::Tcp, FailureType::ConnectionLost, "lost");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert_eq!(supervisor.state_of(TransportType::Tcp), Some(RecoveryState::Success));
        assert_eq!(supervisor.failure_count(TransportType::Tcp), 0);
    }

    #[tokio::test]
    async fn terminal_failure_type_never_schedules_a_restart() {
        let restarter = Arc::new(AlwaysFails);
        let supervisor = Arc::new(RecoverySupervisor::new(restarter));
        supervisor.report_failure(TransportType::Udp, FailureType::PermissionDenied, "denied");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(supervisor.state_of(TransportType::Udp), Some(RecoveryState::Failed));
    }

    #[tokio::test]
    async fn retries_exhausted_marks_failed() {
        let restarter = Arc::new(AlwaysFails);
        let supervisor = Arc::new(RecoverySupervisor::new(restarter));
        supervisor.configure(
            TransportType::Http,
            BackoffPolicy {
                max_retries: 1,
                base_interval_ms: 1,
                multiplier: 1,
                max_interval_ms: 1,
            },
        );
        supervisor.report_failure(TransportType::Http, FailureType::Timeout, "t1");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        supervisor.report_failure(TransportType::Http, FailureType::Timeout, "t2");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(supervisor.state_of(TransportType::Http), Some(RecoveryState::Failed));
    }
}
