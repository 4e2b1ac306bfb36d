//! Per-request instruction budget.
//!
//! The meter is shared between the dispatcher (which resets it at the
//! start of every request) and the interpreter's periodic interrupt
//! hook (which charges it). A failed charge leaves the used count
//! unchanged; the hook then aborts the running script.

use std::sync::atomic::{AtomicU64, Ordering};

/// Instruction-count meter. All operations are lock-free; the meter is
/// shared with interpreter hook callbacks via `Arc`.
#[derive(Debug)]
pub struct GasMeter {
    limit: u64,
    used: AtomicU64,
}

impl GasMeter {
    /// Create a meter with the given budget.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
        }
    }

    /// Reset the used count to zero. Called once per dispatch.
    pub fn reset(&self) {
        self.used.store(0, Ordering::Relaxed);
    }

    /// Charge `amount` units. Returns `false` (without modifying the
    /// used count) when the budget would be exceeded.
    pub fn charge(&self, amount: u64) -> bool {
        self.used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                match used.checked_add(amount) {
                    Some(v) if v <= self.limit => Some(v),
                    _ => None,
                }
            })
            .is_ok()
    }

    /// Units consumed since the last reset.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// Units remaining before the budget is hit.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used())
    }

    /// The configured budget.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// True once the budget is fully consumed.
    pub fn is_exhausted(&self) -> bool {
        self.used() >= self.limit
    }
}
