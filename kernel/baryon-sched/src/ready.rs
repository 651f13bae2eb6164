//! Ready-to-run admission.
//!
//! The point every wakeup, task start, and unblock funnels into: take a
//! detached runnable task and link it where the dispatcher will find it —
//! the ready queue, a CPU's dispatch queue, or the pending queue when a
//! dispatch lock forbids running it now. The caller must hold the critical
//! section (the guard of [`crate::global`]) and must have unlinked the task
//! from whatever wait structure held it.

use baryon_core::id::Pid;

use crate::scheduler::Scheduler;
use crate::tcb::TaskState;

#[cfg(feature = "smp")]
use baryon_core::percpu::current_cpu;

#[cfg(not(feature = "smp"))]
impl Scheduler {
    /// Admits a detached runnable task into the dispatch queues.
    ///
    /// Returns `true` iff the admitted task displaced the running task at
    /// the head of the dispatch queue; the caller owes the context switch,
    /// after leaving the critical section.
    pub fn add_ready(&mut self, pid: Pid) -> bool {
        debug_assert!(!self.tasks.get(pid).is_linked());

        let runner = self.current_task();
        let (run_prio, run_lock) = {
            let tcb = self.tasks.get(runner);
            (tcb.sched_priority, tcb.lockcount)
        };

        // The runner has preemption disabled and the newcomer would preempt
        // it: park the newcomer until the scheduler lock drops.
        if run_lock > 0 && self.tasks.get(pid).sched_priority > run_prio {
            self.pendingtasks.insert_prioritized(&mut self.tasks, pid);
            self.tasks.get_mut(pid).task_state = TaskState::Pending;
            return false;
        }

        if self.readytorun.insert_prioritized(&mut self.tasks, pid) {
            // New head: the newcomer runs and the old runner rotates back
            // to ready-to-run.
            debug_assert_eq!(run_lock, 0);
            let displaced = self.tasks.get(pid).flink;
            debug_assert_eq!(displaced, Some(runner));
            self.tasks.get_mut(pid).task_state = TaskState::Running;
            if let Some(displaced) = displaced {
                self.tasks.get_mut(displaced).task_state = TaskState::ReadyToRun;
            }
            true
        } else {
            // Mid-queue: runnable, waiting its turn.
            self.tasks.get_mut(pid).task_state = TaskState::ReadyToRun;
            false
        }
    }
}

#[cfg(feature = "smp")]
impl Scheduler {
    /// Admits a detached runnable task into the dispatch queues.
    ///
    /// Chooses the destination CPU (the pinned CPU, or the one running the
    /// least urgent task within the affinity mask), classifies the task
    /// against that CPU's runner, and links it into the matching queue. The
    /// pending queue swallows anything the scheduler lock or a foreign IRQ
    /// lock forbids dispatching now.
    ///
    /// Returns `true` iff the *caller's* CPU must context-switch. A
    /// preemption of a remote CPU returns `false`: the target is restarted
    /// through the pause handshake and performs its own switch.
    pub fn add_ready(&mut self, pid: Pid) -> bool {
        debug_assert!(!self.tasks.get(pid).is_linked());

        let me = current_cpu();
        let (pinned, prio) = {
            let tcb = self.tasks.get(pid);
            (tcb.is_pinned(), tcb.sched_priority)
        };

        // Destination: a pinned task dictates its CPU; everything else goes
        // to the CPU running the least urgent task.
        let cpu = if pinned {
            self.tasks.get(pid).cpu
        } else {
            self.select_cpu(self.tasks.get(pid).affinity)
        };

        let run_prio = self.tasks.get(self.current_on(cpu)).sched_priority;

        // Tentative destination state, judged against that CPU's runner.
        let tentative = if prio > run_prio {
            TaskState::Running
        } else if pinned {
            TaskState::Assigned
        } else {
            TaskState::ReadyToRun
        };

        // Dispatch gate. With the scheduler locked anywhere, or the IRQ
        // lock held by some other CPU, a task the dispatcher could pick
        // must wait. An Assigned insertion merely queues behind a runner,
        // so it passes even under lock.
        if (self.locks.sched.is_locked() || self.cpu_locked_elsewhere(me))
            && tentative != TaskState::Assigned
        {
            self.pendingtasks.insert_prioritized(&mut self.tasks, pid);
            self.tasks.get_mut(pid).task_state = TaskState::Pending;
            return false;
        }

        if tentative == TaskState::ReadyToRun {
            // Not running anywhere. The ready queue's head is not a
            // dispatch front, so even landing there switches nothing.
            self.readytorun.insert_prioritized(&mut self.tasks, pid);
            self.tasks.get_mut(pid).task_state = TaskState::ReadyToRun;
            return false;
        }

        // Running or Assigned: this mutates `cpu`'s dispatch queue, so a
        // remote CPU must be quiesced first.
        if cpu != me {
            let paused = self.cpu_ops.pause(cpu);
            debug_assert!(paused.is_ok(), "cpu {cpu} pause failed");
        }

        let mut do_switch = false;
        if self.assigned[cpu.as_usize()].insert_prioritized(&mut self.tasks, pid) {
            // The newcomer heads the queue: it preempts the old runner.
            debug_assert_eq!(tentative, TaskState::Running);
            {
                let tcb = self.tasks.get_mut(pid);
                tcb.cpu = cpu;
                tcb.task_state = TaskState::Running;
            }

            // The new runner's lock nesting decides this CPU's bits in the
            // global lock words.
            let (lockcount, irqcount, displaced) = {
                let tcb = self.tasks.get(pid);
                (tcb.lockcount, tcb.irqcount, tcb.flink)
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

            // Re-home the displaced runner, now sitting right behind the
            // new head.
            debug_assert!(displaced.is_some());
            if let Some(displaced) = displaced {
                if self.tasks.get(displaced).is_pinned() {
                    debug_assert_eq!(self.tasks.get(displaced).cpu, cpu);
                    self.tasks.get_mut(displaced).task_state = TaskState::Assigned;
                } else {
                    self.assigned[cpu.as_usize()].remove(&mut self.tasks, displaced);
                    // The bit update above may itself have locked the
                    // scheduler, in which case the displaced task pends.
                    if self.locks.sched.is_locked() {
                        self.pendingtasks.insert_prioritized(&mut self.tasks, displaced);
                        self.tasks.get_mut(displaced).task_state = TaskState::Pending;
                    } else {
                        self.readytorun.insert_prioritized(&mut self.tasks, displaced);
                        self.tasks.get_mut(displaced).task_state = TaskState::ReadyToRun;
                    }
                }
            }
            do_switch = true;
        } else {
            // Mid-queue: the task waits behind the runner.
            //
            // REVISIT: another CPU can admit a higher-priority task to this
            // same queue between select_cpu() and the insertion above, so a
            // tentative Running can land mid-queue with a stale state.
            debug_assert_eq!(tentative, TaskState::Assigned);
            let tcb = self.tasks.get_mut(pid);
            tcb.cpu = cpu;
            tcb.task_state = TaskState::Assigned;
        }

        if cpu != me {
            let resumed = self.cpu_ops.resume(cpu);
            debug_assert!(resumed.is_ok(), "cpu {cpu} resume failed");
            // The remote CPU acts on the reshuffle when it restarts;
            // nothing to switch locally.
            do_switch = false;
        }

        do_switch
    }
}

#[cfg(all(test, not(feature = "smp")))]
mod tests {
    use super::*;
    use crate::testutil::{boot, task};
    use alloc::vec::Vec;

    #[test]
    fn preempting_head_switches() {
        let mut sched = boot();
        let r = task(&mut sched, "r", 10);
        let x = task(&mut sched, "x", 5);
        assert!(sched.add_ready(r));
        assert!(!sched.add_ready(x));

        let b = task(&mut sched, "b", 20);
        assert!(sched.add_ready(b));

        let order: Vec<Pid> = sched.readytorun_tasks().collect();
        assert_eq!(order[..2], [b, r]);
        assert_eq!(sched.task(b).state(), TaskState::Running);
        assert_eq!(sched.task(r).state(), TaskState::ReadyToRun);
        assert_eq!(sched.task(x).state(), TaskState::ReadyToRun);
        sched.assert_invariants();
    }

    #[test]
    fn locked_runner_defers_preemptor() {
        let mut sched = boot();
        let r = task(&mut sched, "r", 10);
        assert!(sched.add_ready(r));
        sched.lock_scheduler();

        let b = task(&mut sched, "b", 20);
        assert!(!sched.add_ready(b));
        assert_eq!(sched.task(b).state(), TaskState::Pending);
        assert_eq!(sched.current_task(), r);
        assert_eq!(sched.pending_tasks().next(), Some(b));
        sched.assert_invariants();
    }

    #[test]
    fn locked_runner_still_accepts_lower_priority() {
        let mut sched = boot();
        let r = task(&mut sched, "r", 30);
        assert!(sched.add_ready(r));
        sched.lock_scheduler();

        let b = task(&mut sched, "b", 20);
        assert!(!sched.add_ready(b));
        assert_eq!(sched.task(b).state(), TaskState::ReadyToRun);
        assert_eq!(sched.current_task(), r);
        sched.assert_invariants();
    }

    #[test]
    fn mid_queue_insertion_does_not_switch() {
        let mut sched = boot();
        let r = task(&mut sched, "r", 30);
        let x = task(&mut sched, "x", 10);
        assert!(sched.add_ready(r));
        assert!(!sched.add_ready(x));

        let b = task(&mut sched, "b", 20);
        assert!(!sched.add_ready(b));
        let order: Vec<Pid> = sched.readytorun_tasks().collect();
        assert_eq!(order[..3], [r, b, x]);
        assert_eq!(sched.task(b).state(), TaskState::ReadyToRun);
        sched.assert_invariants();
    }

    #[test]
    fn equal_priority_never_preempts() {
        let mut sched = boot();
        let r = task(&mut sched, "r", 10);
        assert!(sched.add_ready(r));

        let b = task(&mut sched, "b", 10);
        assert!(!sched.add_ready(b));
        assert_eq!(sched.current_task(), r);
        assert_eq!(sched.task(b).state(), TaskState::ReadyToRun);
        sched.assert_invariants();
    }
}

#[cfg(all(test, feature = "smp"))]
mod tests {
    use super::*;
    use crate::testutil::{recording_ops, sched, task};
    use alloc::vec::Vec;
    use baryon_core::id::CpuId;

    #[test]
    fn local_preemption_switches() {
        let mut sched = sched(2);
        let r0 = task(&mut sched, "r0", 10);
        let r1 = task(&mut sched, "r1", 10);
        assert!(sched.add_ready(r0)); // cpu 0
        assert!(!sched.add_ready(r1)); // cpu 1, remote

        // Both runners busy at 10; select picks cpu 0 (tie, lowest index),
        // which is the caller's CPU.
        let b = task(&mut sched, "b", 20);
        assert!(sched.add_ready(b));

        assert_eq!(sched.current_on(CpuId::new(0)), b);
        assert_eq!(sched.task(b).state(), TaskState::Running);
        assert_eq!(sched.task(b).cpu(), CpuId::new(0));
        // The displaced runner went back to the ready queue.
        assert_eq!(sched.task(r0).state(), TaskState::ReadyToRun);
        assert!(sched.readytorun_tasks().any(|p| p == r0));
        sched.assert_invariants();
    }

    #[test]
    fn remote_preemption_pauses_and_returns_false() {
        let ops = recording_ops();
        let mut sched = sched(2).with_cpu_ops(ops);
        let r0 = task(&mut sched, "r0", 20);
        let r1 = task(&mut sched, "r1", 10);
        assert!(sched.add_ready(r0)); // cpu 0
        assert!(!sched.add_ready(r1)); // cpu 1 (remote insert, idle preempted)
        ops.clear();

        // cpu 1 runs the least urgent task; the admission must quiesce it.
        let b = task(&mut sched, "b", 30);
        assert!(!sched.add_ready(b));

        assert_eq!(sched.current_on(CpuId::new(1)), b);
        assert_eq!(sched.task(b).cpu(), CpuId::new(1));
        assert_eq!(sched.task(r1).state(), TaskState::ReadyToRun);
        assert_eq!(ops.events(), [("pause", 1), ("resume", 1)]);
        sched.assert_invariants();
    }

    #[test]
    fn unpinned_lower_priority_goes_readytorun() {
        let mut sched = sched(2);
        let r0 = task(&mut sched, "r0", 40);
        let r1 = task(&mut sched, "r1", 40);
        assert!(sched.add_ready(r0));
        assert!(!sched.add_ready(r1));

        let b = task(&mut sched, "b", 20);
        assert!(!sched.add_ready(b));
        assert_eq!(sched.task(b).state(), TaskState::ReadyToRun);
        assert!(sched.readytorun_tasks().any(|p| p == b));
        sched.assert_invariants();
    }

    #[test]
    fn equal_priority_never_preempts() {
        let mut sched = sched(1);
        let r = task(&mut sched, "r", 10);
        assert!(sched.add_ready(r));

        let b = task(&mut sched, "b", 10);
        assert!(!sched.add_ready(b));
        assert_eq!(sched.current_on(CpuId::new(0)), r);
        assert_eq!(sched.task(b).state(), TaskState::ReadyToRun);
        sched.assert_invariants();
    }

    #[test]
    fn schedlock_defers_dispatchable_tasks() {
        let mut sched = sched(2);
        let r0 = task(&mut sched, "r0", 10);
        assert!(sched.add_ready(r0));
        sched.lock_scheduler(); // cpu 0's runner takes the scheduler lock

        let b = task(&mut sched, "b", 50);
        assert!(!sched.add_ready(b));
        assert_eq!(sched.task(b).state(), TaskState::Pending);
        sched.assert_invariants();
    }

    #[test]
    fn irqlock_elsewhere_defers_dispatchable_tasks() {
        let mut sched = sched(2);
        sched.locks.irq.set(CpuId::new(1)); // held by the other CPU

        let b = task(&mut sched, "b", 50);
        assert!(!sched.add_ready(b));
        assert_eq!(sched.task(b).state(), TaskState::Pending);
        sched.assert_invariants();
        sched.locks.irq.clear(CpuId::new(1));
    }

    #[test]
    fn irqlock_held_here_does_not_defer() {
        let mut sched = sched(2);
        sched.locks.irq.set(CpuId::new(0)); // we are the holder

        let b = task(&mut sched, "b", 50);
        assert!(sched.add_ready(b));
        assert_eq!(sched.task(b).state(), TaskState::Running);
        // The admission rewrote cpu 0's bit from the new runner's irqcount
        // (zero), so the IRQ lock is released again.
        assert!(!sched.locks.irq.is_locked());
        sched.assert_invariants();
    }

    #[test]
    fn pinned_assignment_bypasses_dispatch_gate() {
        let mut sched = sched(2);
        let r1 = task(&mut sched, "r1", 30);
        // Occupy cpu 1 with a high-priority runner.
        {
            let tcb = sched.tasks.get_mut(r1);
            tcb.affinity = baryon_core::id::CpuSet::single(CpuId::new(1));
        }
        assert!(!sched.add_ready(r1));

        let r0 = task(&mut sched, "r0", 10);
        assert!(sched.add_ready(r0));
        sched.lock_scheduler();

        // A pinned, lower-priority task slots in behind cpu 1's runner even
        // though the scheduler lock is held.
        let b = task(&mut sched, "b", 5);
        let b_pinned = {
            let tcb = sched.tasks.get_mut(b);
            tcb.flags.insert(crate::tcb::TcbFlags::CPU_LOCKED);
            tcb.cpu = CpuId::new(1);
            tcb.affinity = baryon_core::id::CpuSet::single(CpuId::new(1));
            b
        };
        assert!(!sched.add_ready(b_pinned));
        assert_eq!(sched.task(b).state(), TaskState::Assigned);
        assert_eq!(sched.task(b).cpu(), CpuId::new(1));
        let queue: Vec<Pid> = sched.assigned_tasks(CpuId::new(1)).collect();
        assert!(queue.contains(&b));
        assert_ne!(queue[0], b);
        sched.assert_invariants();
    }

    #[test]
    fn preemptor_inherits_lock_bits() {
        let mut sched = sched(1);
        let b = task(&mut sched, "b", 20);
        {
            let tcb = sched.tasks.get_mut(b);
            tcb.lockcount = 1;
            tcb.irqcount = 1;
        }
        assert!(sched.add_ready(b));
        assert!(sched.locks.sched.is_locked());
        assert!(sched.locks.irq.is_locked());
        assert!(sched.locks.sched.holders().contains(CpuId::new(0)));
        sched.assert_invariants();
    }

    #[test]
    fn displaced_runner_pends_when_preemptor_holds_lock() {
        let mut sched = sched(1);
        let r = task(&mut sched, "r", 10);
        assert!(sched.add_ready(r));

        // The preemptor itself holds the scheduler lock, so the runner it
        // displaces cannot be re-dispatched and must pend.
        let b = task(&mut sched, "b", 20);
        sched.tasks.get_mut(b).lockcount = 1;
        assert!(sched.add_ready(b));
        assert_eq!(sched.task(r).state(), TaskState::Pending);
        assert!(sched.pending_tasks().any(|p| p == r));
        sched.assert_invariants();
    }

    #[test]
    fn displaced_pinned_runner_stays_assigned() {
        let mut sched = sched(2);
        let idle1 = sched.current_on(CpuId::new(1));
        let r1 = task(&mut sched, "r1", 10);
        {
            let tcb = sched.tasks.get_mut(r1);
            tcb.flags.insert(crate::tcb::TcbFlags::CPU_LOCKED);
            tcb.cpu = CpuId::new(1);
            tcb.affinity = baryon_core::id::CpuSet::single(CpuId::new(1));
        }
        assert!(!sched.add_ready(r1)); // runs on cpu 1

        let b = task(&mut sched, "b", 20);
        {
            let tcb = sched.tasks.get_mut(b);
            tcb.affinity = baryon_core::id::CpuSet::single(CpuId::new(1));
        }
        assert!(!sched.add_ready(b)); // remote preemption of cpu 1

        assert_eq!(sched.current_on(CpuId::new(1)), b);
        // The displaced runner is pinned: it stays queued on its CPU.
        assert_eq!(sched.task(r1).state(), TaskState::Assigned);
        let queue: Vec<Pid> = sched.assigned_tasks(CpuId::new(1)).collect();
        assert_eq!(queue, [b, r1, idle1]);
        sched.assert_invariants();
    }
}
