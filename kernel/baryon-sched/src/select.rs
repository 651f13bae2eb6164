//! Destination-CPU selection for unpinned admissions.

use baryon_core::id::{CpuId, CpuSet};

use crate::scheduler::Scheduler;
use crate::tcb::PRIORITY_IDLE;

impl Scheduler {
    /// Picks the CPU whose running task has the lowest priority among the
    /// CPUs in `affinity`.
    ///
    /// A CPU sitting in its idle task short-circuits the scan — nothing
    /// ranks lower. Ties go to the lowest CPU index. `affinity` must admit
    /// at least one online CPU.
    pub(crate) fn select_cpu(&self, affinity: CpuSet) -> CpuId {
        let mut best: Option<(CpuId, u8)> = None;
        for index in 0..self.ncpus {
            let cpu = CpuId::new(index as u32);
            if !affinity.contains(cpu) {
                continue;
            }
            let prio = self.tasks.get(self.current_on(cpu)).sched_priority;
            if prio == PRIORITY_IDLE {
                return cpu;
            }
            match best {
                Some((_, best_prio)) if prio >= best_prio => {}
                _ => best = Some((cpu, prio)),
            }
        }
        debug_assert!(best.is_some(), "affinity {affinity} admits no online cpu");
        best.map(|(cpu, _)| cpu).unwrap_or(CpuId::new(0))
    }
}
