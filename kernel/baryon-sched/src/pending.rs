//! Re-admission of deferred tasks.
//!
//! Tasks parked on the pending queue while a dispatch lock was held flow
//! back into the dispatch queues through here, highest priority first, the
//! moment nothing forbids dispatching them anymore.

use crate::scheduler::Scheduler;
use crate::tcb::TaskState;

#[cfg(feature = "smp")]
use baryon_core::percpu::current_cpu;

impl Scheduler {
    /// Drains the pending queue back into the dispatch queues while
    /// dispatch is unlocked.
    ///
    /// Each drained task goes through the normal admission path, so a
    /// re-admitted task that itself holds the scheduler lock stops the
    /// drain right there. Returns `true` iff any re-admission requires the
    /// caller to context-switch.
    pub fn merge_pending(&mut self) -> bool {
        let mut switch = false;
        while let Some(head) = self.pendingtasks.head() {
            if self.dispatch_locked() {
                break;
            }
            self.pendingtasks.remove(&mut self.tasks, head);
            self.tasks.get_mut(head).task_state = TaskState::Blocked;
            switch |= self.add_ready(head);
        }
        switch
    }

    /// True while some lock forbids dispatching pending tasks.
    fn dispatch_locked(&self) -> bool {
        #[cfg(feature = "smp")]
        {
            self.locks.sched.is_locked() || self.cpu_locked_elsewhere(current_cpu())
        }
        #[cfg(not(feature = "smp"))]
        {
            self.tasks.get(self.current_task()).lockcount > 0
        }
    }
}
