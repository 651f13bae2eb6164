//! Cross-CPU quiesce handshake.
//!
//! Mutating another CPU's dispatch queue is only safe while that CPU is
//! stopped in a known state. The scheduler reaches the platform's
//! stop/restart machinery (typically an IPI pair) through the [`CpuOps`]
//! seam, so the dispatch core carries no architecture code of its own.

use core::fmt;

use baryon_core::id::CpuId;

/// A pause or resume request that the target CPU did not acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseError {
    /// The CPU that failed to respond.
    pub cpu: CpuId,
}

impl fmt::Display for PauseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu {} did not quiesce", self.cpu)
    }
}

/// Low-level CPU control the dispatch core depends on.
///
/// Implemented by the platform layer and handed to the scheduler at
/// construction; [`NullCpuOps`] is the stand-in for hosts and for
/// single-CPU bring-up, where no remote CPU exists to stop.
pub trait CpuOps: Send + Sync {
    /// Stops `cpu` in a known safe state, spinning (bounded) until the
    /// target acknowledges. On success the target executes nothing until
    /// [`resume`](Self::resume) is issued.
    fn pause(&self, cpu: CpuId) -> Result<(), PauseError>;

    /// Restarts a CPU stopped by [`pause`](Self::pause). The target
    /// re-enters its dispatcher and acts on whatever changed while it was
    /// stopped.
    fn resume(&self, cpu: CpuId) -> Result<(), PauseError>;

    /// Returns `true` iff the calling CPU is executing an interrupt
    /// handler frame.
    fn in_interrupt(&self) -> bool {
        false
    }
}

/// No-op [`CpuOps`] for hosts and single-CPU bring-up.
pub struct NullCpuOps;

impl CpuOps for NullCpuOps {
    fn pause(&self, _cpu: CpuId) -> Result<(), PauseError> {
        Ok(())
    }

    fn resume(&self, _cpu: CpuId) -> Result<(), PauseError> {
        Ok(())
    }
}

/// Shared [`NullCpuOps`] instance, the default for a new scheduler.
pub static NULL_CPU_OPS: NullCpuOps = NullCpuOps;
