//! The scheduler context.
//!
//! Every queue, lock word, and boot-phase flag the dispatch core operates
//! on lives in one [`Scheduler`] value rather than in scattered statics.
//! The system instance sits behind an `IrqSpinLock`; holding its guard is
//! the critical section every dispatch operation requires.

use baryon_core::id::Pid;
use baryon_core::sync::{IrqSpinLock, LazyLock};

#[cfg(feature = "smp")]
use baryon_core::config::MAX_CPUS;
#[cfg(feature = "smp")]
use baryon_core::id::CpuId;

use crate::list::{Iter, TaskList};
use crate::tcb::{TaskState, TaskTable, Tcb, PRIORITY_IDLE};

#[cfg(feature = "smp")]
use crate::lockstate::LockState;
#[cfg(feature = "smp")]
use crate::pause::{CpuOps, NULL_CPU_OPS};

/// Boot phase, strictly monotonic.
///
/// The dispatch core only relies on one boundary: from [`OsReady`] on, the
/// system is truly multi-tasking and the SMP lock bitmaps are
/// authoritative.
///
/// [`OsReady`]: InitState::OsReady
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum InitState {
    /// Power-on reset: nothing initialized.
    PowerUp = 0,
    /// Task table and dispatch queues exist; idle tasks are seeded.
    TaskLists = 1,
    /// Memory management is available.
    Memory = 2,
    /// Architecture and board drivers are up.
    Hardware = 3,
    /// Fully multi-tasking.
    OsReady = 4,
    /// The boot path has turned into the idle loop.
    Idle = 5,
}

/// The scheduling state of the whole system.
///
/// Obtain the system instance through [`global`]; tests build their own.
/// All mutating operations require `&mut self`, which the global instance
/// hands out only under its critical-section lock.
pub struct Scheduler {
    /// Every TCB in the system.
    pub(crate) tasks: TaskTable,
    /// Runnable tasks that are not executing and not bound to a CPU.
    /// Uniprocessor builds dispatch straight from this queue: its head is
    /// the running task.
    pub(crate) readytorun: TaskList,
    /// Runnable tasks withheld from dispatch while a scheduler or IRQ lock
    /// forbids running them.
    pub(crate) pendingtasks: TaskList,
    /// Per-CPU dispatch queues; the head of each is the task executing on
    /// that CPU.
    #[cfg(feature = "smp")]
    pub(crate) assigned: [TaskList; MAX_CPUS],
    /// Number of online CPUs; only `assigned[..ncpus]` are live.
    #[cfg(feature = "smp")]
    pub(crate) ncpus: usize,
    /// The global scheduler/IRQ lock words.
    #[cfg(feature = "smp")]
    pub(crate) locks: LockState,
    /// Platform CPU control (pause/resume, interrupt context).
    #[cfg(feature = "smp")]
    pub(crate) cpu_ops: &'static dyn CpuOps,
    initstate: InitState,
}

#[cfg(feature = "smp")]
impl Scheduler {
    /// Creates a scheduler dispatching to `ncpus` CPUs, each seeded with a
    /// pinned idle task so no dispatch queue is ever empty.
    pub fn new(ncpus: usize) -> Self {
        assert!(
            (1..=MAX_CPUS).contains(&ncpus),
            "ncpus {ncpus} out of range"
        );
        let mut sched = Self {
            tasks: TaskTable::new(),
            readytorun: TaskList::new(),
            pendingtasks: TaskList::new(),
            assigned: [const { TaskList::new() }; MAX_CPUS],
            ncpus,
            locks: LockState::new(),
            cpu_ops: &NULL_CPU_OPS,
            initstate: InitState::TaskLists,
        };
        for index in 0..ncpus {
            let cpu = CpuId::new(index as u32);
            let pid = sched.tasks.add(
                Tcb::new("idle")
                    .with_priority(PRIORITY_IDLE)
                    .pinned_to(cpu),
            );
            sched.assigned[index].insert_prioritized(&mut sched.tasks, pid);
            let tcb = sched.tasks.get_mut(pid);
            tcb.task_state = TaskState::Running;
            tcb.cpu = cpu;
        }
        baryon_core::kdebug!("sched: {} cpu dispatch queues ready", ncpus);
        sched
    }

    /// Replaces the platform CPU-control implementation (builder-style).
    pub fn with_cpu_ops(mut self, ops: &'static dyn CpuOps) -> Self {
        self.cpu_ops = ops;
        self
    }

    /// Number of online CPUs this scheduler dispatches to.
    pub fn ncpus(&self) -> usize {
        self.ncpus
    }

    /// The task currently executing on `cpu`.
    pub fn current_on(&self, cpu: CpuId) -> Pid {
        match self.assigned[cpu.as_usize()].head() {
            Some(pid) => pid,
            None => unreachable!("cpu {cpu} has an empty dispatch queue"),
        }
    }

    /// Iterates `cpu`'s dispatch queue, runner first.
    pub fn assigned_tasks(&self, cpu: CpuId) -> Iter<'_> {
        self.assigned[cpu.as_usize()].iter(&self.tasks)
    }
}

#[cfg(not(feature = "smp"))]
impl Scheduler {
    /// Creates a uniprocessor scheduler, seeded with the idle task so the
    /// dispatch queue is never empty.
    pub fn new() -> Self {
        let mut sched = Self {
            tasks: TaskTable::new(),
            readytorun: TaskList::new(),
            pendingtasks: TaskList::new(),
            initstate: InitState::TaskLists,
        };
        let pid = sched
            .tasks
            .add(Tcb::new("idle").with_priority(PRIORITY_IDLE));
        sched.readytorun.insert_prioritized(&mut sched.tasks, pid);
        sched.tasks.get_mut(pid).task_state = TaskState::Running;
        baryon_core::kdebug!("sched: dispatch queue ready");
        sched
    }
}

#[cfg(not(feature = "smp"))]
impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Registers a new task. It starts detached; admit it with
    /// [`add_ready`](Self::add_ready) once it is runnable.
    pub fn add_task(&mut self, tcb: Tcb) -> Pid {
        debug_assert_eq!(tcb.state(), TaskState::Blocked);
        self.tasks.add(tcb)
    }

    /// Read access to a task's TCB.
    pub fn task(&self, pid: Pid) -> &Tcb {
        self.tasks.get(pid)
    }

    /// The task currently executing on the caller's CPU.
    pub fn current_task(&self) -> Pid {
        #[cfg(feature = "smp")]
        {
            self.current_on(baryon_core::percpu::current_cpu())
        }
        #[cfg(not(feature = "smp"))]
        {
            match self.readytorun.head() {
                Some(pid) => pid,
                None => unreachable!("empty dispatch queue"),
            }
        }
    }

    /// Current boot phase.
    pub fn initstate(&self) -> InitState {
        self.initstate
    }

    /// Advances the boot phase. Phases never move backwards.
    pub fn advance_initstate(&mut self, state: InitState) {
        debug_assert!(state >= self.initstate);
        self.initstate = state;
    }

    /// Iterates the ready-to-run queue in priority order.
    pub fn readytorun_tasks(&self) -> Iter<'_> {
        self.readytorun.iter(&self.tasks)
    }

    /// Iterates the pending queue in priority order.
    pub fn pending_tasks(&self) -> Iter<'_> {
        self.pendingtasks.iter(&self.tasks)
    }

    fn assert_sorted(&self, list: &TaskList, what: &str) {
        let mut last = u8::MAX;
        for pid in list.iter(&self.tasks) {
            let prio = self.tasks.get(pid).sched_priority;
            assert!(
                prio <= last,
                "{what}: task {pid} at priority {prio} after {last}"
            );
            last = prio;
        }
    }

    /// How many dispatch queues `pid` is linked into right now.
    fn queue_membership(&self, pid: Pid) -> usize {
        let mut count = 0;
        if self.readytorun.contains(&self.tasks, pid) {
            count += 1;
        }
        if self.pendingtasks.contains(&self.tasks, pid) {
            count += 1;
        }
        #[cfg(feature = "smp")]
        for queue in &self.assigned[..self.ncpus] {
            if queue.contains(&self.tasks, pid) {
                count += 1;
            }
        }
        count
    }

    /// Checks every structural invariant of the dispatch state, panicking
    /// on the first violation. A debugging and test aid; never called on
    /// hot paths.
    pub fn assert_invariants(&self) {
        self.assert_sorted(&self.readytorun, "readytorun");
        self.assert_sorted(&self.pendingtasks, "pendingtasks");

        for pid in self.pendingtasks.iter(&self.tasks) {
            assert_eq!(self.tasks.get(pid).task_state, TaskState::Pending);
        }

        #[cfg(feature = "smp")]
        {
            for pid in self.readytorun.iter(&self.tasks) {
                let tcb = self.tasks.get(pid);
                assert_eq!(tcb.task_state, TaskState::ReadyToRun);
                assert!(!tcb.is_pinned(), "pinned task {pid} in readytorun");
            }
            for index in 0..self.ncpus {
                let cpu = CpuId::new(index as u32);
                self.assert_sorted(&self.assigned[index], "assigned");
                let mut entries = self.assigned[index].iter(&self.tasks);
                let head = entries.next().expect("empty dispatch queue");
                let head_tcb = self.tasks.get(head);
                assert_eq!(head_tcb.task_state, TaskState::Running);
                assert_eq!(head_tcb.cpu, cpu);
                for pid in entries {
                    let tcb = self.tasks.get(pid);
                    assert_eq!(tcb.task_state, TaskState::Assigned);
                    assert_eq!(tcb.cpu, cpu);
                }
                for pid in self.assigned[index].iter(&self.tasks) {
                    let tcb = self.tasks.get(pid);
                    if tcb.is_pinned() {
                        assert_eq!(tcb.cpu, cpu, "pinned task {pid} on wrong cpu");
                    }
                }
            }
            assert_eq!(
                self.locks.sched.is_locked(),
                !self.locks.sched.holders().is_empty(),
                "scheduler lock word out of sync with holder bitmap"
            );
            assert_eq!(
                self.locks.irq.is_locked(),
                !self.locks.irq.holders().is_empty(),
                "irq lock word out of sync with holder bitmap"
            );
        }

        #[cfg(not(feature = "smp"))]
        {
            let mut entries = self.readytorun.iter(&self.tasks);
            let head = entries.next().expect("empty dispatch queue");
            assert_eq!(self.tasks.get(head).task_state, TaskState::Running);
            for pid in entries {
                assert_eq!(self.tasks.get(pid).task_state, TaskState::ReadyToRun);
            }
        }

        for raw in 0..self.tasks.len() {
            let pid = Pid::new(raw as u32);
            let expected = usize::from(self.tasks.get(pid).is_linked());
            assert_eq!(
                self.queue_membership(pid),
                expected,
                "task {pid} linked into the wrong number of queues"
            );
        }
    }
}

static SCHEDULER: LazyLock<IrqSpinLock<Scheduler>> = LazyLock::new(init_global);

#[cfg(feature = "smp")]
fn init_global() -> IrqSpinLock<Scheduler> {
    IrqSpinLock::new(Scheduler::new(baryon_core::percpu::cpu_count() as usize))
}

#[cfg(not(feature = "smp"))]
fn init_global() -> IrqSpinLock<Scheduler> {
    IrqSpinLock::new(Scheduler::new())
}

/// The system scheduler instance.
///
/// Locking it establishes the critical section every dispatch operation
/// requires; the guard hands out `&mut Scheduler`. First access creates the
/// instance, sized to the online CPU count, so the boot path must call
/// [`baryon_core::percpu::set_cpu_count`] before touching the scheduler.
pub fn global() -> &'static IrqSpinLock<Scheduler> {
    &SCHEDULER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "smp")]
    #[test]
    fn new_seeds_idle_task_per_cpu() {
        let sched = Scheduler::new(3);
        for index in 0..3 {
            let cpu = CpuId::new(index);
            let pid = sched.current_on(cpu);
            let tcb = sched.task(pid);
            assert_eq!(tcb.state(), TaskState::Running);
            assert_eq!(tcb.cpu(), cpu);
            assert_eq!(tcb.priority(), PRIORITY_IDLE);
            assert!(tcb.is_pinned());
        }
        sched.assert_invariants();
    }

    #[cfg(not(feature = "smp"))]
    #[test]
    fn new_seeds_idle_task() {
        let sched = Scheduler::new();
        let pid = sched.current_task();
        let tcb = sched.task(pid);
        assert_eq!(tcb.state(), TaskState::Running);
        assert_eq!(tcb.priority(), PRIORITY_IDLE);
        sched.assert_invariants();
    }

    #[test]
    fn added_task_starts_detached() {
        let mut sched = crate::testutil::boot();
        let pid = sched.add_task(Tcb::new("t").with_priority(42));
        assert_eq!(sched.task(pid).state(), TaskState::Blocked);
        sched.assert_invariants();
    }

    #[test]
    fn initstate_advances() {
        let mut sched = crate::testutil::boot();
        assert_eq!(sched.initstate(), InitState::OsReady);
        sched.advance_initstate(InitState::Idle);
        assert_eq!(sched.initstate(), InitState::Idle);
    }

    #[test]
    fn global_instance_is_usable() {
        let guard = global().lock();
        guard.assert_invariants();
    }
}
