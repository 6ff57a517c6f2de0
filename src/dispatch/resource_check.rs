//! Resource-check heuristic gating `init`/`lora_init` (spec §4.4).
//!
//! Tiers and formula transcribed from
//! `original_source/src/io/system_info.c`'s `model_analyze`: file size in
//! MB determines an overhead multiplier and a flat buffer, tiered by
//! size bucket.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceTier {
    Small,
    Medium,
    Large,
}

impl ResourceTier {
    fn for_size_mb(size_mb: u64) -> Self {
        if size_mb > 6000 {
            Self::Large
        } else if size_mb > 3000 {
            Self::Medium
        } else {
            Self::Small
        }
    }

    /// `(multiplier, overhead_mb)` per spec §4.4's `{1.2, 256MB}, {1.25,
    /// 512MB}, {1.3, 1024MB}` table (ordered small/medium/large here;
    /// the original's thresholds assign the larger multiplier to the
    /// larger bucket).
    fn multiplier_and_overhead_mb(self) -> (f64, u64) {
        match self {
            Self::Small => (1.2, 256),
            Self::Medium => (1.25, 512),
            Self::Large => (1.3, 1024),
        }
    }
}

/// Estimated resident footprint in bytes for a model file of `file_size_bytes`.
pub fn estimate_footprint_bytes(file_size_bytes: u64) -> u64 {
    let size_mb = file_size_bytes / (1024 * 1024);
    let tier = ResourceTier::for_size_mb(size_mb);
    let (multiplier, overhead_mb) = tier.multiplier_and_overhead_mb();
    let estimated_mb = (size_mb as f64 * multiplier) as u64 + overhead_mb;
    estimated_mb * 1024 * 1024
}
