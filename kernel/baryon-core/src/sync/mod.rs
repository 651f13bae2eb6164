//! Synchronization primitives for the kernel.
//!
//! Provides [`RawSpinLock`], [`SpinLock`], [`IrqSpinLock`], and [`LazyLock`],
//! all suitable for use in `static` items and usable before any allocator or
//! scheduler is available.

mod irq_spinlock;
mod lazy;
mod spinlock;

pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use lazy::LazyLock;
pub use spinlock::{RawSpinLock, SpinLock, SpinLockGuard};
