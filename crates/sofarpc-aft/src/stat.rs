//! Per-provider invocation counters.
//!
//! The hot path (every RPC completion) performs exactly one relaxed
//! `fetch_add` on a packed counter word. The cold path takes a snapshot,
//! which swaps the word to zero so each measurement cycle only sees the
//! traffic of its own window.
//!
//! Invocations live in the upper 32 bits and faults in the lower 32 bits.
//! Because both are read and reset by a single `swap`, a snapshot can never
//! observe a fault whose invocation landed in a different window, which
//! keeps `invoke_count >= fault_count` inside every snapshot. Per-window
//! counts are limited to `u32::MAX`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::dimension::InvocationStatDimension;

/// A stat is evicted once it has been idle for more than this many
/// consecutive measurement cycles.
pub const MAX_IDLE_CYCLES: u32 = 6;

const INVOKE_SHIFT: u32 = 32;
const INVOKE_UNIT: u64 = 1 << INVOKE_SHIFT;
const FAULT_MASK: u64 = (1 << INVOKE_SHIFT) - 1;

/// Live invocation counters for one provider dimension.
#[derive(Debug)]
pub struct InvocationStat {
    dimension: Arc<InvocationStatDimension>,
    window: AtomicU64,
    idle_cycles: AtomicU32,
}

impl InvocationStat {
    /// Creates an empty stat for `dimension`.
    pub fn new(dimension: InvocationStatDimension) -> Self {
        Self {
            dimension: Arc::new(dimension),
            window: AtomicU64::new(0),
            idle_cycles: AtomicU32::new(0),
        }
    }

    /// The provider this stat measures.
    pub fn dimension(&self) -> &Arc<InvocationStatDimension> {
        &self.dimension
    }

    /// Records a completed invocation that did not fail.
    ///
    /// At most `u32::MAX` invocations fit in one window; debug builds
    /// assert on overflow.
    #[inline]
    pub fn record_invocation(&self) {
        let previous = self.window.fetch_add(INVOKE_UNIT, Ordering::Relaxed);
        debug_assert_window_room(previous, false);
    }

    /// Records a failed invocation.
    ///
    /// The invocation is always counted; the fault counter only moves when
    /// the classifier judged the error relevant to fault tolerance. Both
    /// counters hold at most `u32::MAX` per window; a fault past that would
    /// carry into the invocation bits, which debug builds assert against.
    #[inline]
    pub fn record_fault(&self, classified_fault: bool) {
        let delta = if classified_fault {
            INVOKE_UNIT | 1
        } else {
            INVOKE_UNIT
        };
        let previous = self.window.fetch_add(delta, Ordering::Relaxed);
        debug_assert_window_room(previous, classified_fault);
    }

    #[cfg(test)]
    fn preload(&self, invoke_count: u64, fault_count: u64) {
        self.window
            .store((invoke_count << INVOKE_SHIFT) | fault_count, Ordering::Relaxed);
    }

    /// Invocations recorded since the last snapshot.
    pub fn invoke_count(&self) -> u64 {
        self.window.load(Ordering::Relaxed) >> INVOKE_SHIFT
    }

    /// Classified faults recorded since the last snapshot.
    pub fn fault_count(&self) -> u64 {
        self.window.load(Ordering::Relaxed) & FAULT_MASK
    }

    /// Consecutive snapshots that saw no traffic.
    pub fn idle_cycles(&self) -> u32 {
        self.idle_cycles.load(Ordering::Relaxed)
    }

    /// True once the stat has been idle for more than [`MAX_IDLE_CYCLES`].
    pub fn is_expired(&self) -> bool {
        self.idle_cycles() > MAX_IDLE_CYCLES
    }

    /// Takes this window's counts and resets the live counters.
    pub fn snapshot(&self) -> InvocationStatSnapshot {
        let packed = self.window.swap(0, Ordering::AcqRel);
        let snapshot = InvocationStatSnapshot::new(
            Arc::clone(&self.dimension),
            packed >> INVOKE_SHIFT,
            packed & FAULT_MASK,
        );

        if snapshot.invoke_count == 0 {
            self.idle_cycles.fetch_add(1, Ordering::Relaxed);
        } else {
            self.idle_cycles.store(0, Ordering::Relaxed);
        }
        snapshot
    }
}

#[inline]
fn debug_assert_window_room(previous: u64, classified_fault: bool) {
    debug_assert!(
        previous >> INVOKE_SHIFT != u64::from(u32::MAX),
        "invocation count overflowed its window"
    );
    debug_assert!(
        !classified_fault || previous & FAULT_MASK != FAULT_MASK,
        "fault count overflowed its window"
    );
}

/// Immutable counts of one measurement window.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationStatSnapshot {
    /// The provider measured.
    pub dimension: Arc<InvocationStatDimension>,
    /// Invocations in the window.
    pub invoke_count: u64,
    /// Classified faults in the window, never above `invoke_count`.
    pub fault_count: u64,
}

impl InvocationStatSnapshot {
    /// Builds a snapshot, clamping faults to the invocation count.
    pub fn new(dimension: Arc<InvocationStatDimension>, invoke_count: u64, fault_count: u64) -> Self {
        Self {
            dimension,
            invoke_count,
            fault_count: fault_count.min(invoke_count),
        }
    }

    /// `fault_count / invoke_count`, or 0 without traffic.
    pub fn fault_rate(&self) -> f64 {
        if self.invoke_count == 0 {
            0.0
        } else {
            self.fault_count as f64 / self.invoke_count as f64
        }
    }
}
