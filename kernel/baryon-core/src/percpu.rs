//! Per-CPU identity (SMP-ready).
//!
//! Each CPU finds its own logical ID through an architecture register set up
//! during bootstrap: on x86_64 the GS base points at a per-CPU cell whose
//! first word is the CPU ID; on aarch64 the ID is kept in `TPIDR_EL1`.
//! Host builds (unit tests) always report CPU 0.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::id::CpuId;

/// Number of online CPUs, populated during bootstrap.
static CPU_COUNT: AtomicU32 = AtomicU32::new(1);

/// Returns the number of online CPUs.
pub fn cpu_count() -> u32 {
    CPU_COUNT.load(Ordering::Acquire)
}

/// Sets the number of online CPUs.
///
/// Called once by the boot CPU after bringing up the secondaries.
pub fn set_cpu_count(count: u32) {
    CPU_COUNT.store(count, Ordering::Release);
}

/// Per-CPU identity cell.
///
/// `#[repr(C)]` so the CPU ID sits at offset 0, where the `current_cpu()`
/// assembly expects it. Bootstrap allocates one cell per CPU and points the
/// per-CPU base register at it.
#[repr(C)]
pub struct PerCpu {
    /// Logical CPU ID (0 = boot CPU), at offset 0.
    pub cpu_id: u32,
}

/// Returns the ID of the CPU executing the caller.
///
/// Stable within a critical section; a task that can be migrated must not
/// cache the result across preemption points.
#[cfg(all(target_os = "none", target_arch = "x86_64"))]
pub fn current_cpu() -> CpuId {
    let id: u32;
    // SAFETY: GS:[0] is the `cpu_id` field of this CPU's `PerCpu` cell,
    // established before the scheduler runs. The read is lock-free.
    unsafe {
        core::arch::asm!("mov {:e}, gs:[0]", out(reg) id, options(readonly, nostack));
    }
    CpuId::new(id)
}

/// Returns the ID of the CPU executing the caller.
#[cfg(all(target_os = "none", target_arch = "aarch64"))]
pub fn current_cpu() -> CpuId {
    let id: u64;
    // SAFETY: TPIDR_EL1 holds the logical CPU ID, written during bootstrap.
    unsafe {
        core::arch::asm!("mrs {}, tpidr_el1", out(reg) id, options(nomem, nostack));
    }
    CpuId::new(id as u32)
}

/// Host-only fallback: always CPU 0.
#[cfg(not(target_os = "none"))]
pub fn current_cpu() -> CpuId {
    CpuId::new(0)
}
