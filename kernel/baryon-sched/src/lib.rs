//! Priority dispatch core for the Baryon kernel.
//!
//! Implements strict-priority preemptive scheduling around one central
//! operation: *ready-to-run admission*. A task that becomes runnable is
//! handed, inside a critical section, to [`Scheduler::add_ready`], which
//! decides where it belongs:
//!
//! - at the head of a CPU's dispatch queue, preempting the current runner;
//! - queued on a CPU's dispatch queue (pinned tasks);
//! - on the shared ready-to-run queue, waiting for a CPU;
//! - or on the pending queue, when a scheduler or IRQ lock forbids
//!   dispatching it right now.
//!
//! All queues are priority-ordered, FIFO among equals. With the `smp`
//! feature each CPU has its own dispatch queue whose head is the task that
//! CPU is executing; mutating a remote CPU's queue quiesces that CPU
//! through the [`CpuOps`] pause handshake first. Without `smp` the core is
//! the single-queue uniprocessor variant: the ready-to-run queue itself is
//! the dispatch queue.
//!
//! The inverse paths are [`Scheduler::remove_ready`] (retirement) and
//! [`Scheduler::merge_pending`] (re-admission of deferred tasks once
//! dispatch unlocks).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod list;
mod lock;
mod pending;
mod ready;
mod remove;
mod scheduler;
mod tcb;

#[cfg(feature = "smp")]
mod lockstate;
#[cfg(feature = "smp")]
mod pause;
#[cfg(feature = "smp")]
mod select;

pub use baryon_core::id::{CpuId, CpuSet, Pid};
pub use list::{Iter, TaskList};
pub use scheduler::{global, InitState, Scheduler};
pub use tcb::{TaskState, Tcb, TcbFlags, PRIORITY_DEFAULT, PRIORITY_IDLE, PRIORITY_MAX};

#[cfg(feature = "smp")]
pub use pause::{CpuOps, NullCpuOps, PauseError, NULL_CPU_OPS};
