//! Dispatch-queue retirement.
//!
//! The inverse of admission: a task that blocks, exits, or is being
//! re-prioritized leaves the dispatch structures through here and comes
//! back detached. Retiring a running task promotes its successor, restoring
//! every queue and lock-word property admission established.

use baryon_core::id::Pid;

use crate::scheduler::Scheduler;
use crate::tcb::TaskState;

#[cfg(feature = "smp")]
use baryon_core::percpu::current_cpu;

#[cfg(not(feature = "smp"))]
impl Scheduler {
    /// Retires a linked task from the dispatch queues, detaching it.
    ///
    /// Returns `true` iff the running task changed and the caller owes a
    /// context switch. Caller must hold the critical section. The idle task
    /// is not removable.
    pub fn remove_ready(&mut self, pid: Pid) -> bool {
        match self.tasks.get(pid).task_state {
            TaskState::Running => {
                debug_assert_eq!(self.readytorun.head(), Some(pid));
                self.readytorun.remove(&mut self.tasks, pid);
                self.tasks.get_mut(pid).task_state = TaskState::Blocked;
                // Whatever is next in line (at least the idle task) runs.
                let next = self.current_task();
                self.tasks.get_mut(next).task_state = TaskState::Running;
                true
            }
            TaskState::ReadyToRun => {
                self.readytorun.remove(&mut self.tasks, pid);
                self.tasks.get_mut(pid).task_state = TaskState::Blocked;
                false
            }
            TaskState::Pending => {
                self.pendingtasks.remove(&mut self.tasks, pid);
                self.tasks.get_mut(pid).task_state = TaskState::Blocked;
                false
            }
            TaskState::Blocked => {
                debug_assert!(false, "task {pid} is not linked");
                false
            }
        }
    }
}

#[cfg(feature = "smp")]
impl Scheduler {
    /// Retires a linked task from the dispatch queues, detaching it.
    ///
    /// Retiring a running task quiesces its CPU if remote, then promotes a
    /// successor: the next task on that CPU's dispatch queue, unless the
    /// ready queue offers a strictly higher-priority task admissible there.
    /// The promoted runner's lock nesting rewrites the CPU's bits in the
    /// global lock words, exactly as admission does.
    ///
    /// Returns `true` iff the *caller's* CPU must context-switch; retiring a
    /// remote CPU's runner returns `false` (the target switches itself when
    /// resumed). Caller must hold the critical section. Idle tasks are not
    /// removable.
    pub fn remove_ready(&mut self, pid: Pid) -> bool {
        match self.tasks.get(pid).task_state {
            TaskState::ReadyToRun => {
                self.readytorun.remove(&mut self.tasks, pid);
                self.tasks.get_mut(pid).task_state = TaskState::Blocked;
                false
            }
            TaskState::Pending => {
                self.pendingtasks.remove(&mut self.tasks, pid);
                self.tasks.get_mut(pid).task_state = TaskState::Blocked;
                false
            }
            TaskState::Assigned => {
                let cpu = self.tasks.get(pid).cpu;
                debug_assert_ne!(self.assigned[cpu.as_usize()].head(), Some(pid));
                self.assigned[cpu.as_usize()].remove(&mut self.tasks, pid);
                self.tasks.get_mut(pid).task_state = TaskState::Blocked;
                false
            }
            TaskState::Running => {
                let cpu = self.tasks.get(pid).cpu;
                let me = current_cpu();
                if cpu != me {
                    let paused = self.cpu_ops.pause(cpu);
                    debug_assert!(paused.is_ok(), "cpu {cpu} pause failed");
                }

                debug_assert_eq!(self.assigned[cpu.as_usize()].head(), Some(pid));
                self.assigned[cpu.as_usize()].remove(&mut self.tasks, pid);
                self.tasks.get_mut(pid).task_state = TaskState::Blocked;

                // Pick the successor: the next assigned task, unless the
                // ready queue offers a strictly better candidate that may
                // run on this CPU.
                let next = match self.assigned[cpu.as_usize()].head() {
                    Some(next) => next,
                    None => unreachable!("cpu {cpu} lost its idle task"),
                };
                let next_prio = self.tasks.get(next).sched_priority;
                let candidate = self
                    .readytorun
                    .iter(&self.tasks)
                    .find(|&p| self.tasks.get(p).affinity.contains(cpu));
                let successor = match candidate {
                    Some(c) if self.tasks.get(c).sched_priority > next_prio => {
                        self.readytorun.remove(&mut self.tasks, c);
                        let at_head =
                            self.assigned[cpu.as_usize()].insert_prioritized(&mut self.tasks, c);
                        debug_assert!(at_head);
                        c
                    }
                    _ => next,
                };
                {
                    let tcb = self.tasks.get_mut(successor);
                    tcb.task_state = TaskState::Running;
                    tcb.cpu = cpu;
                }

                // The new runner's lock nesting decides this CPU's bits.
                let (lockcount, irqcount) = {
                    let tcb = self.tasks.get(successor);
                    (tcb.lockcount, tcb.irqcount)
                };
                if lockcount > 0 {
                    self.locks.sched.set(cpu);
                } else {
                    self.locks.sched.clear(cpu);
                }
                if irqcount > 0 {
                    self.locks.irq.set(cpu);
                } else {
                    self.locks.irq.clear(cpu);
                }

                if cpu != me {
                    let resumed = self.cpu_ops.resume(cpu);
                    debug_assert!(resumed.is_ok(), "cpu {cpu} resume failed");
                    false
                } else {
                    true
                }
            }
            TaskState::Blocked => {
                debug_assert!(false, "task {pid} is not linked");
                false
            }
        }
    }
}

#[cfg(all(test, not(feature = "smp")))]
mod tests {
    use super::*;
    use crate::testutil::{boot, task};

    #[test]
    fn removing_runner_promotes_next() {
        let mut sched = boot();
        let r = task(&mut sched, "r", 10);
        let x = task(&mut sched, "x", 5);
        assert!(sched.add_ready(r));
        assert!(!sched.add_ready(x));

        assert!(sched.remove_ready(r));
        assert_eq!(sched.current_task(), x);
        assert_eq!(sched.task(x).state(), TaskState::Running);
        assert_eq!(sched.task(r).state(), TaskState::Blocked);
        sched.assert_invariants();
    }

    #[test]
    fn removing_middle_task_does_not_switch() {
        let mut sched = boot();
        let r = task(&mut sched, "r", 30);
        let x = task(&mut sched, "x", 10);
        assert!(sched.add_ready(r));
        assert!(!sched.add_ready(x));

        assert!(!sched.remove_ready(x));
        assert_eq!(sched.current_task(), r);
        assert_eq!(sched.task(x).state(), TaskState::Blocked);
        sched.assert_invariants();
    }

    #[test]
    fn admit_then_remove_round_trips() {
        let mut sched = boot();
        let r = task(&mut sched, "r", 10);
        assert!(sched.add_ready(r));

        let b = task(&mut sched, "b", 20);
        assert!(sched.add_ready(b));
        assert!(sched.remove_ready(b));

        assert_eq!(sched.current_task(), r);
        assert_eq!(sched.task(r).state(), TaskState::Running);
        sched.assert_invariants();
    }

    #[test]
    fn pending_task_removal() {
        let mut sched = boot();
        let r = task(&mut sched, "r", 10);
        assert!(sched.add_ready(r));
        sched.lock_scheduler();

        let b = task(&mut sched, "b", 20);
        assert!(!sched.add_ready(b));
        assert_eq!(sched.task(b).state(), TaskState::Pending);

        assert!(!sched.remove_ready(b));
        assert_eq!(sched.task(b).state(), TaskState::Blocked);
        assert!(sched.pending_tasks().next().is_none());
        sched.assert_invariants();
    }
}
