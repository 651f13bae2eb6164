//! Priority-ordered task lists.
//!
//! Doubly-linked lists threaded through the [`TaskTable`] by pid index and
//! kept sorted by descending priority, FIFO among equals. Insertion and
//! removal rewire indices only — no allocation, O(n) worst case, which is
//! fine at real-time queue depths.

use baryon_core::id::Pid;

use crate::tcb::TaskTable;

/// One dispatch queue: ready-to-run, pending, or a per-CPU assigned queue.
///
/// Holds only the head/tail indices; the links live in the TCBs, so a task
/// can be in at most one list at a time.
#[derive(Debug)]
pub struct TaskList {
    head: Option<Pid>,
    tail: Option<Pid>,
}

impl TaskList {
    /// Creates an empty list.
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    /// The highest-priority task, if any.
    pub fn head(&self) -> Option<Pid> {
        self.head
    }

    /// True if no task is linked.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Inserts `pid` keeping the list sorted by descending priority. Among
    /// equal priorities the newcomer goes last (FIFO).
    ///
    /// Returns `true` iff the task became the new head. `pid` must not be
    /// linked into any list.
    pub fn insert_prioritized(&mut self, tasks: &mut TaskTable, pid: Pid) -> bool {
        let tcb = tasks.get(pid);
        debug_assert!(
            tcb.flink.is_none() && tcb.blink.is_none() && self.head != Some(pid),
            "task {pid} is already linked"
        );
        let prio = tcb.sched_priority;

        // Find the first entry that ranks strictly below the newcomer; the
        // newcomer goes right before it, i.e. after every equal-priority
        // entry already present.
        let mut at = self.head;
        while let Some(cur) = at {
            if tasks.get(cur).sched_priority < prio {
                break;
            }
            at = tasks.get(cur).flink;
        }

        match at {
            Some(before) => self.insert_before(tasks, before, pid),
            None => self.push_back(tasks, pid),
        }
        self.head == Some(pid)
    }

    fn insert_before(&mut self, tasks: &mut TaskTable, before: Pid, pid: Pid) {
        let prev = tasks.get(before).blink;
        {
            let tcb = tasks.get_mut(pid);
            tcb.flink = Some(before);
            tcb.blink = prev;
        }
        tasks.get_mut(before).blink = Some(pid);
        match prev {
            Some(prev) => tasks.get_mut(prev).flink = Some(pid),
            None => self.head = Some(pid),
        }
    }

    fn push_back(&mut self, tasks: &mut TaskTable, pid: Pid) {
        let old_tail = self.tail;
        {
            let tcb = tasks.get_mut(pid);
            tcb.flink = None;
            tcb.blink = old_tail;
        }
        match old_tail {
            Some(tail) => tasks.get_mut(tail).flink = Some(pid),
            None => self.head = Some(pid),
        }
        self.tail = Some(pid);
    }

    /// Unlinks `pid` from this list and clears its links.
    pub fn remove(&mut self, tasks: &mut TaskTable, pid: Pid) {
        debug_assert!(self.contains(tasks, pid), "task {pid} is not in this list");
        let (flink, blink) = {
            let tcb = tasks.get(pid);
            (tcb.flink, tcb.blink)
        };
        match blink {
            Some(prev) => tasks.get_mut(prev).flink = flink,
            None => self.head = flink,
        }
        match flink {
            Some(next) => tasks.get_mut(next).blink = blink,
            None => self.tail = blink,
        }
        let tcb = tasks.get_mut(pid);
        tcb.flink = None;
        tcb.blink = None;
    }

    /// Iterates the list from highest to lowest priority.
    pub fn iter<'a>(&self, tasks: &'a TaskTable) -> Iter<'a> {
        Iter {
            next: self.head,
            tasks,
        }
    }

    /// True if `pid` is linked into this list. O(n); used by assertions.
    pub fn contains(&self, tasks: &TaskTable, pid: Pid) -> bool {
        self.iter(tasks).any(|p| p == pid)
    }
}

impl Default for TaskList {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a [`TaskList`], yielding pids in queue order.
pub struct Iter<'a> {
    next: Option<Pid>,
    tasks: &'a TaskTable,
}

impl Iterator for Iter<'_> {
    type Item = Pid;

    fn next(&mut self) -> Option<Pid> {
        let pid = self.next?;
        self.next = self.tasks.get(pid).flink;
        Some(pid)
    }
}
