//! Handle Pool - fixed-slot registry of native model instances
//!
//! Grounded in `original_source/src/io/handle_pool.h`'s `handle_slot_t` /
//! `handle_pool_t` layout, generalized from a fixed C array behind a
//! single mutex into the equivalent Rust shape: a `parking_lot::Mutex`
//! guarding a `Vec<Option<HandleSlot>>`, per spec §4.1's explicit
//! "single pool-level mutex" requirement (the same style of coarse,
//! short-held lock the teacher uses for its `DashMap`-backed registries
//! in the correlation layer, simplified here to a plain mutex since
//! `MAX_HANDLES` is small enough that O(n) scans dominate no hot path).

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::protocol::errors::HandleError;

/// Opaque 32-bit handle identifier. `0` is reserved as "invalid".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u32);

impl HandleId {
    pub const INVALID: HandleId = HandleId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now()
        .timestamp_millis()
        .try_into()
        .unwrap_or(0)
}

/// A single occupied slot in the pool.
#[derive(Debug, Clone)]
pub struct HandleSlot {
    pub id: HandleId,
    pub model_ref: u64,
    pub active: bool,
    pub model_path: String,
    pub last_used_ms: u64,
    pub memory_footprint_bytes: u64,
    /// Set while a streaming context is bound to this handle; `destroy`
    /// refuses with `HandleError::Busy` while this is true (spec §4.4).
    pub streaming: bool,
}

/// Guard returned by [`HandlePool::get`]. Carries a cloned snapshot of the
/// slot rather than a live reference, so the pool lock is released before
/// the caller dispatches into the native runtime (spec §4.1: "holding the
/// pool lock must not cross a call into the native runtime").
#[derive(Debug, Clone)]
pub struct HandleRef {
    pub id: HandleId,
    pub model_ref: u64,
    pub model_path: String,
}

struct Inner {
    slots: Vec<Option<HandleSlot>>,
}

/// Fixed-size registry of native model instances (spec §3, §4.1).
pub struct HandlePool {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    max_handles: usize,
}

impl HandlePool {
    pub fn new(max_handles: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: (0..max_handles).map(|_| None).collect(),
            }),
            next_id: AtomicU64::new(1),
            max_handles,
        }
    }

    /// Allocate the first free slot and mint a fresh identifier. Identifiers
    /// are never reused within a process lifetime (spec §3).
    pub fn create(&self, model_path: &str, model_ref: u64) -> Result<HandleId, HandleError> {
        let mut inner = self.inner.lock();
        let free_index = inner.slots.iter().position(|s| s.is_none());
        let Some(index) = free_index else {
            return Err(HandleError::Exhausted);
        };

        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed) as u32);
        inner.slots[index] = Some(HandleSlot {
            id,
            model_ref,
            active: true,
            model_path: model_path.to_string(),
            last_used_ms: now_ms(),
            memory_footprint_bytes: 0,
            streaming: false,
        });
        Ok(id)
    }

    /// Constant-overhead-per-slot lookup; rejects inactive or unknown ids.
    pub fn get(&self, id: HandleId) -> Option<HandleRef> {
        if !id.is_valid() {
            return None;
        }
        let mut inner = self.inner.lock();
        let slot = inner
            .slots
            .iter_mut()
            .flatten()
            .find(|s| s.id == id && s.active)?;
        slot.last_used_ms = now_ms();
        Some(HandleRef {
            id: slot.id,
            model_ref: slot.model_ref,
            model_path: slot.model_path.clone(),
        })
    }

    pub fn is_valid(&self, id: HandleId) -> bool {
        if !id.is_valid() {
            return false;
        }
        let inner = self.inner.lock();
        inner.slots.iter().flatten().any(|s| s.id == id && s.active)
    }

    /// Mark the handle as currently hosting an active streaming context.
    /// Returns `false` if the handle does not exist.
    pub fn mark_streaming(&self, id: HandleId, streaming: bool) -> bool {
        let mut inner = self.inner.lock();
        match inner.slots.iter_mut().flatten().find(|s| s.id == id) {
            Some(slot) => {
                slot.streaming = streaming;
                true
            }
            None => false,
        }
    }

    pub fn set_memory_footprint(&self, id: HandleId, bytes: u64) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.iter_mut().flatten().find(|s| s.id == id) {
            slot.memory_footprint_bytes = bytes;
        }
    }

    /// Marks the slot free and zeroes its metadata. Refuses while a
    /// streaming context is active for this handle (spec §4.4).
    pub fn destroy(&self, id: HandleId) -> Result<(), HandleError> {
        let mut inner = self.inner.lock();
        let index = inner
            .slots
            .iter()
            .position(|s| matches!(s, Some(slot) if slot.id == id && slot.active));
        let Some(index) = index else {
            return Err(HandleError::InvalidHandle(id.0));
        };
        // Safety of the `as_ref().unwrap()` below: `index` was just found by
        // a predicate matching `Some(_)` under the same lock.
        if inner.slots[index].as_ref().is_some_and(|s| s.streaming) {
            return Err(HandleError::Busy(id.0));
        }
        inner.slots[index] = None;
        Ok(())
    }

    pub fn memory_footprint(&self, id: HandleId) -> Option<u64> {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .flatten()
            .find(|s| s.id == id && s.active)
            .map(|s| s.memory_footprint_bytes)
    }

    pub fn total_footprint(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .flatten()
            .map(|s| s.memory_footprint_bytes)
            .sum()
    }

    pub fn max_handles(&self) -> usize {
        self.max_handles
    }

    pub fn live_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.slots.iter().flatten().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_mints_fresh_ids_never_reused() {
        let pool = HandlePool::new(2);
        let a = pool.create("/models/a.bin", 1).unwrap();
        pool.destroy(a).unwrap();
        let b = pool.create("/models/b.bin", 2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn exhaustion_returns_error_on_max_plus_one() {
        let pool = HandlePool::new(1);
        pool.create("/models/a.bin", 1).unwrap();
        let err = pool.create("/models/b.bin", 2).unwrap_err();
        assert_eq!(err, HandleError::Exhausted);
    }

    #[test]
    fn destroy_then_destroy_fails_second_time() {
        let pool = HandlePool::new(2);
        let h = pool.create("/models/a.bin", 1).unwrap();
        pool.destroy(h).unwrap();
        let err = pool.destroy(h).unwrap_err();
        assert_eq!(err, HandleError::InvalidHandle(h.0));
    }

    #[test]
    fn destroyed_handle_is_invalid_for_all_subsequent_ops() {
        let pool = HandlePool::new(2);
        let h = pool.create("/models/a.bin", 1).unwrap();
        pool.destroy(h).unwrap();
        assert!(!pool.is_valid(h));
        assert!(pool.get(h).is_none());
    }

    #[test]
    fn destroy_refuses_while_streaming_active() {
        let pool = HandlePool::new(2);
        let h = pool.create("/models/a.bin", 1).unwrap();
        pool.mark_streaming(h, true);
        let err = pool.destroy(h).unwrap_err();
        assert_eq!(err, HandleError::Busy(h.0));
        pool.mark_streaming(h, false);
        assert!(pool.destroy(h).is_ok());
    }

    #[test]
    fn zero_is_never_a_valid_handle() {
        let pool = HandlePool::new(2);
        assert!(!pool.is_valid(HandleId::INVALID));
        assert!(pool.get(HandleId::INVALID).is_none());
    }

    #[test]
    fn total_footprint_sums_live_slots() {
        let pool = HandlePool::new(2);
        let a = pool.create("/models/a.bin", 1).unwrap();
        let b = pool.create("/models/b.bin", 2).unwrap();
        pool.set_memory_footprint(a, 100);
        pool.set_memory_footprint(b, 200);
        assert_eq!(pool.total_footprint(), 300);
    }
}
