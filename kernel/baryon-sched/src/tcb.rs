//! Task control blocks and the task table.

use baryon_core::id::Pid;
#[cfg(feature = "smp")]
use baryon_core::id::{CpuId, CpuSet};
use bitflags::bitflags;

use alloc::vec::Vec;

/// Priority of the per-CPU idle tasks; nothing schedulable ranks below it.
pub const PRIORITY_IDLE: u8 = 0;

/// Default priority for new tasks.
pub const PRIORITY_DEFAULT: u8 = 100;

/// Highest schedulable priority.
pub const PRIORITY_MAX: u8 = 255;

/// The possible states of a task, from the dispatcher's point of view.
///
/// The state names the queue the task is linked into; a task is always in
/// exactly one queue, or in none when `Blocked`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not linked into any dispatch queue: blocked on some wait object, or
    /// newly created and not yet admitted.
    Blocked = 0,
    /// Runnable but withheld from dispatch while a scheduler or IRQ lock
    /// forbids it; parked on the pending queue.
    Pending = 1,
    /// Runnable, not executing, not bound to a CPU.
    ReadyToRun = 2,
    /// Runnable and queued on a specific CPU behind its running task.
    #[cfg(feature = "smp")]
    Assigned = 3,
    /// Executing: the head of its CPU's dispatch queue.
    Running = 4,
}

bitflags! {
    /// Scheduler-relevant flag bits of a task.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TcbFlags: u8 {
        /// The task is pinned to its `cpu` and must never migrate.
        const CPU_LOCKED = 1 << 0;
    }
}

/// A task control block: the per-task record the dispatch queues link
/// together.
///
/// Built with [`Tcb::new`] and the `with_*` methods, then handed to
/// [`Scheduler::add_task`](crate::Scheduler::add_task), which assigns the
/// [`Pid`].
#[derive(Debug)]
pub struct Tcb {
    /// Identity; also the task's slot in the [`TaskTable`].
    pid: Pid,
    /// Human-readable name for debugging.
    name: &'static str,
    /// Scheduling priority; larger = higher. FIFO among equals.
    pub(crate) sched_priority: u8,
    /// Which queue the task currently lives in.
    pub(crate) task_state: TaskState,
    /// Flag bits.
    pub(crate) flags: TcbFlags,
    /// Scheduler-lock nesting count; > 0 means this task holds the
    /// scheduler lock.
    pub(crate) lockcount: u16,
    /// IRQ-lock nesting count; > 0 means this task holds the IRQ lock.
    #[cfg(feature = "smp")]
    pub(crate) irqcount: u16,
    /// The CPU this task runs on or is assigned to. Meaningful only in the
    /// `Running` and `Assigned` states.
    #[cfg(feature = "smp")]
    pub(crate) cpu: CpuId,
    /// The CPUs this task may run on. Never empty.
    #[cfg(feature = "smp")]
    pub(crate) affinity: CpuSet,
    /// Forward link in the containing queue.
    pub(crate) flink: Option<Pid>,
    /// Backward link in the containing queue.
    pub(crate) blink: Option<Pid>,
}

impl Tcb {
    /// Creates a detached TCB with default priority and unrestricted
    /// affinity.
    pub fn new(name: &'static str) -> Self {
        Self {
            pid: Pid::new(0),
            name,
            sched_priority: PRIORITY_DEFAULT,
            task_state: TaskState::Blocked,
            flags: TcbFlags::empty(),
            lockcount: 0,
            #[cfg(feature = "smp")]
            irqcount: 0,
            #[cfg(feature = "smp")]
            cpu: CpuId::new(0),
            #[cfg(feature = "smp")]
            affinity: CpuSet::upto(baryon_core::config::MAX_CPUS),
            flink: None,
            blink: None,
        }
    }

    /// Sets the scheduling priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.sched_priority = priority;
        self
    }

    /// Restricts the task to the given CPUs. Must not be empty.
    #[cfg(feature = "smp")]
    pub fn with_affinity(mut self, affinity: CpuSet) -> Self {
        debug_assert!(!affinity.is_empty());
        self.affinity = affinity;
        self
    }

    /// Pins the task to `cpu`: it may only ever appear on that CPU's
    /// dispatch queue.
    #[cfg(feature = "smp")]
    pub fn pinned_to(mut self, cpu: CpuId) -> Self {
        self.flags.insert(TcbFlags::CPU_LOCKED);
        self.cpu = cpu;
        self.affinity = CpuSet::single(cpu);
        self
    }

    /// The task's identity.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The task's debug name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The task's scheduling priority.
    pub fn priority(&self) -> u8 {
        self.sched_priority
    }

    /// The queue the task currently lives in.
    pub fn state(&self) -> TaskState {
        self.task_state
    }

    /// Whether the task is pinned to a single CPU.
    pub fn is_pinned(&self) -> bool {
        self.flags.contains(TcbFlags::CPU_LOCKED)
    }

    /// The CPU the task runs on or is assigned to. Meaningful only in the
    /// `Running` and `Assigned` states.
    #[cfg(feature = "smp")]
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    /// The CPUs the task may run on.
    #[cfg(feature = "smp")]
    pub fn affinity(&self) -> CpuSet {
        self.affinity
    }

    /// Scheduler-lock nesting count.
    pub fn lock_count(&self) -> u16 {
        self.lockcount
    }

    /// True if the task is linked into some queue.
    pub(crate) fn is_linked(&self) -> bool {
        self.task_state != TaskState::Blocked
    }
}

/// Storage for every TCB in the system, indexed by [`Pid`].
///
/// Queue links are pid indices into this table, which keeps the intrusive
/// lists free of raw pointers. Slots are never reclaimed here; task exit and
/// reuse are the task-lifecycle subsystem's concern.
#[derive(Debug, Default)]
pub struct TaskTable {
    slots: Vec<Tcb>,
}

impl TaskTable {
    /// Creates an empty table.
    pub(crate) const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Adds a TCB, assigning its pid. The task starts detached.
    pub(crate) fn add(&mut self, mut tcb: Tcb) -> Pid {
        let pid = Pid::new(self.slots.len() as u32);
        tcb.pid = pid;
        self.slots.push(tcb);
        pid
    }

    /// Returns the TCB for `pid`. Panics on an invalid pid — handing the
    /// scheduler a pid it never issued is a programming error.
    pub(crate) fn get(&self, pid: Pid) -> &Tcb {
        &self.slots[pid.as_usize()]
    }

    /// Mutable access to the TCB for `pid`.
    pub(crate) fn get_mut(&mut self, pid: Pid) -> &mut Tcb {
        &mut self.slots[pid.as_usize()]
    }

    /// Number of tasks ever added.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
