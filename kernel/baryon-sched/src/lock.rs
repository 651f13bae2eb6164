//! The cooperative scheduler lock.
//!
//! A task disables preemption by taking the scheduler lock; it nests, and
//! only the outermost release re-enables dispatch. Under SMP the holding
//! CPU also claims its bit in the global scheduler lock word, which is what
//! admissions on *other* CPUs test.

use crate::scheduler::Scheduler;

#[cfg(feature = "smp")]
use baryon_core::percpu::current_cpu;

impl Scheduler {
    /// Disables preemption for the current task. Nests.
    pub fn lock_scheduler(&mut self) {
        #[cfg(feature = "smp")]
        {
            let me = current_cpu();
            let runner = self.current_on(me);
            let count = {
                let tcb = self.tasks.get_mut(runner);
                tcb.lockcount += 1;
                tcb.lockcount
            };
            if count == 1 {
                self.locks.sched.set(me);
            }
        }
        #[cfg(not(feature = "smp"))]
        {
            let runner = self.current_task();
            self.tasks.get_mut(runner).lockcount += 1;
        }
    }

    /// Drops one nesting level of the scheduler lock.
    ///
    /// The outermost release re-admits deferred tasks; returns `true` iff
    /// that re-admission requires the caller to context-switch.
    pub fn unlock_scheduler(&mut self) -> bool {
        #[cfg(feature = "smp")]
        {
            let me = current_cpu();
            let runner = self.current_on(me);
            let count = {
                let tcb = self.tasks.get_mut(runner);
                debug_assert!(tcb.lockcount > 0);
                tcb.lockcount = tcb.lockcount.saturating_sub(1);
                tcb.lockcount
            };
            if count == 0 {
                self.locks.sched.clear(me);
                self.merge_pending()
            } else {
                false
            }
        }
        #[cfg(not(feature = "smp"))]
        {
            let runner = self.current_task();
            let count = {
                let tcb = self.tasks.get_mut(runner);
                debug_assert!(tcb.lockcount > 0);
                tcb.lockcount = tcb.lockcount.saturating_sub(1);
                tcb.lockcount
            };
            if count == 0 {
                self.merge_pending()
            } else {
                false
            }
        }
    }
}
