//! Preemption-disable accounting.
//!
//! Single-core only (SPEC_FULL.md §5: "There is no SMP"), so the counters
//! are plain global atomics rather than per-CPU storage: there is only one
//! CPU to disable preemption on.

use crate::arch::irq::is_local_enabled;
use core::sync::atomic::Ordering::Relaxed;
use core::sync::atomic::{AtomicBool, AtomicUsize};

static NUM_LOCKS: AtomicUsize = AtomicUsize::new(0);
static NUM_SOFT_IRQ: AtomicUsize = AtomicUsize::new(0);
static NUM_HARD_IRQ: AtomicUsize = AtomicUsize::new(0);
static ACTIVE: AtomicBool = AtomicBool::new(false);

fn num_locks() -> usize {
    NUM_LOCKS.load(Relaxed)
}

fn num_hard_irq() -> usize {
    NUM_HARD_IRQ.load(Relaxed)
}

fn num_soft_irq() -> usize {
    NUM_SOFT_IRQ.load(Relaxed)
}

/// A private type to prevent user from constructing DisablePreemptGuard directly.
struct _Guard {
    /// This private field prevents user from constructing values of this type directly.
    _private: (),
}
impl !Send for _Guard {}

/// A guard to disable preempt.
#[allow(private_interfaces)]
pub enum DisablePreemptGuard {
    Lock(_Guard),
    HardIrq(_Guard),
    SoftIrq(_Guard),
}
impl !Send for DisablePreemptGuard {}

impl DisablePreemptGuard {
    pub fn lock() -> Self {
        NUM_LOCKS.fetch_add(1, Relaxed);
        Self::Lock(_Guard { _private: () })
    }

    pub fn hard_irq() -> Self {
        NUM_HARD_IRQ.fetch_add(1, Relaxed);
        Self::HardIrq(_Guard { _private: () })
    }

    pub fn soft_irq() -> Self {
        NUM_SOFT_IRQ.fetch_add(1, Relaxed);
        Self::SoftIrq(_Guard { _private: () })
    }

    /// Transfer this guard to a new guard.
    /// This guard must be dropped after this function.
    pub fn transfer_to(&self) -> Self {
        match self {
            Self::Lock(_) => Self::lock(),
            Self::HardIrq(_) => Self::hard_irq(),
            Self::SoftIrq(_) => Self::soft_irq(),
        }
    }
}

impl Drop for DisablePreemptGuard {
    fn drop(&mut self) {
        match self {
            Self::Lock(_) => {
                NUM_LOCKS.fetch_sub(1, Relaxed);
            }
            Self::HardIrq(_) => {
                NUM_HARD_IRQ.fetch_sub(1, Relaxed);
            }
            Self::SoftIrq(_) => {
                NUM_SOFT_IRQ.fetch_sub(1, Relaxed);
            }
        }
    }
}

/// Marks preemption as actively in progress (set by the scheduler while
/// mid-switch); returns whether it was already active.
pub(crate) fn mark_active() -> bool {
    ACTIVE.swap(true, Relaxed)
}

pub(crate) fn clear_active() {
    ACTIVE.store(false, Relaxed);
}

/// Whether the current CPU is in atomic context,
/// which means it holds some locks or is in IRQ context.
pub fn in_atomic() -> bool {
    num_locks() != 0 || in_irq()
}

/// Whether the current CPU is in IRQ context.
pub fn in_irq() -> bool {
    num_soft_irq() != 0 || num_hard_irq() != 0
}

/// Whether the current CPU is preemptible, which means it is
/// neither in atomic context, nor in IRQ context and the preemption is enabled.
pub fn preemptible() -> bool {
    !ACTIVE.load(Relaxed) && !in_atomic() && is_local_enabled()
}

/// Disables preemption, returning a guard that re-enables it on drop.
#[must_use]
pub fn disable_preempt() -> DisablePreemptGuard {
    DisablePreemptGuard::lock()
}

/// The locks and IRQs held by the current CPU.
/// Return the number of locks, soft IRQs, hard IRQs and the active flag.
pub fn preempt_stat() -> (usize, usize, usize, bool) {
    (num_locks(), num_soft_irq(), num_hard_irq(), ACTIVE.load(Relaxed))
}
