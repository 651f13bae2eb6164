//! Global dispatch-lock state.
//!
//! Two lock words gate dispatch under SMP: the scheduler (preemption) lock
//! and the IRQ lock. Each is a [`LockBitmap`]: a CPU-holder bitmap guarded
//! by an inner spinlock, coupled to an outer flag lock that mirrors
//! "bitmap nonzero". Readers that only need the predicate cheap-test the
//! outer flag; the bitmap itself is consulted under the inner lock.

use baryon_core::id::{CpuId, CpuSet};
use baryon_core::sync::{RawSpinLock, SpinLock};

use crate::scheduler::{InitState, Scheduler};

/// A CPU-holder bitmap coupled to an outer predicate lock.
///
/// The outer flag is held exactly while the bitmap is nonzero: it is
/// acquired on the 0 → nonzero transition and released on nonzero → 0.
/// Routing every mutation through [`set`](Self::set) and
/// [`clear`](Self::clear) is what keeps the two encodings in agreement.
pub(crate) struct LockBitmap {
    /// Which CPUs hold the lock, behind the inner spinlock.
    holders: SpinLock<CpuSet>,
    /// Outer flag: locked iff `holders` is nonzero. Ownerless — the first
    /// setter acquires it, the last clearer releases it.
    held: RawSpinLock,
}

impl LockBitmap {
    pub(crate) const fn new() -> Self {
        Self {
            holders: SpinLock::new(CpuSet::EMPTY),
            held: RawSpinLock::new(),
        }
    }

    /// Marks `cpu` as a holder, taking the outer flag on the zero-crossing.
    pub(crate) fn set(&self, cpu: CpuId) {
        let mut holders = self.holders.lock();
        if holders.is_empty() {
            self.held.lock();
        }
        holders.add(cpu);
    }

    /// Clears `cpu` as a holder, dropping the outer flag when the bitmap
    /// empties.
    pub(crate) fn clear(&self, cpu: CpuId) {
        let mut holders = self.holders.lock();
        holders.remove(cpu);
        if holders.is_empty() {
            self.held.unlock();
        }
    }

    /// Cheap predicate: does any CPU hold the lock?
    pub(crate) fn is_locked(&self) -> bool {
        self.held.is_locked()
    }

    /// Runs `f` with the holder bitmap pinned stable by the inner lock.
    pub(crate) fn with_holders<R>(&self, f: impl FnOnce(CpuSet) -> R) -> R {
        let holders = self.holders.lock();
        f(*holders)
    }

    /// Snapshot of the holder bitmap.
    pub(crate) fn holders(&self) -> CpuSet {
        *self.holders.lock()
    }
}

#[cfg(test)]
impl LockBitmap {
    /// Takes the outer flag directly, bypassing the bitmap — simulates an
    /// interrupt handler's critical section, which claims no CPU bit.
    pub(crate) fn seize_outer(&self) {
        self.held.lock();
    }

    /// Releases an outer flag taken with [`seize_outer`](Self::seize_outer).
    pub(crate) fn release_outer(&self) {
        self.held.unlock();
    }
}

/// The global lock words, one [`LockBitmap`] per concern.
pub(crate) struct LockState {
    /// Scheduler (preemption) lock: set while some CPU's running task has a
    /// nonzero scheduler-lock nesting count.
    pub(crate) sched: LockBitmap,
    /// IRQ lock: set while some CPU's running task holds the IRQ lock.
    pub(crate) irq: LockBitmap,
}

impl LockState {
    pub(crate) const fn new() -> Self {
        Self {
            sched: LockBitmap::new(),
            irq: LockBitmap::new(),
        }
    }
}

impl Scheduler {
    /// Tests whether the IRQ lock is held by a CPU other than `me`.
    ///
    /// Even with preemption enabled, a task must pend if the IRQ lock is
    /// held — unless the CPU admitting it is itself a holder. Before
    /// [`InitState::OsReady`] the holder bitmap is not yet authoritative and
    /// the answer is always `false`: the system is effectively
    /// single-threaded.
    pub(crate) fn cpu_locked_elsewhere(&self, me: CpuId) -> bool {
        self.locks.irq.with_holders(|holders| {
            if self.initstate() < InitState::OsReady {
                false
            } else if !holders.is_empty() {
                // Some CPU holds the lock, so the outer flag must agree.
                debug_assert!(self.locks.irq.is_locked());
                !holders.contains(me)
            } else {
                // No holder bits. The outer flag may still be held if an
                // interrupt handler established a critical section without
                // claiming a CPU bit; anything else is desynchronization.
                debug_assert!(!self.locks.irq.is_locked() || self.cpu_ops.in_interrupt());
                false
            }
        })
    }
}
