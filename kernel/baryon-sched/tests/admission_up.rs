//! End-to-end admission scenarios driven through the public API
//! (uniprocessor build: `--no-default-features`).

#![cfg(not(feature = "smp"))]

use baryon_sched::{InitState, Pid, Scheduler, TaskState, Tcb};

fn boot() -> Scheduler {
    let mut sched = Scheduler::new();
    sched.advance_initstate(InitState::OsReady);
    sched
}

fn spawn(sched: &mut Scheduler, name: &'static str, prio: u8) -> Pid {
    sched.add_task(Tcb::new(name).with_priority(prio))
}

#[test]
fn preemption_rotates_the_head() {
    let mut sched = boot();
    let r = spawn(&mut sched, "r", 10);
    let x = spawn(&mut sched, "x", 5);
    assert!(sched.add_ready(r));
    assert!(!sched.add_ready(x));

    let b = spawn(&mut sched, "b", 20);
    assert!(sched.add_ready(b));
    sched.assert_invariants();

    let order: Vec<Pid> = sched.readytorun_tasks().collect();
    assert_eq!(order[..3], [b, r, x]);
    assert_eq!(sched.task(b).state(), TaskState::Running);
    assert_eq!(sched.task(r).state(), TaskState::ReadyToRun);
}

#[test]
fn locked_runner_defers_the_preemptor() {
    let mut sched = boot();
    let r = spawn(&mut sched, "r", 10);
    assert!(sched.add_ready(r));
    sched.lock_scheduler();

    let b = spawn(&mut sched, "b", 20);
    assert!(!sched.add_ready(b));
    sched.assert_invariants();

    assert_eq!(sched.task(b).state(), TaskState::Pending);
    assert_eq!(sched.current_task(), r);

    // Unlocking re-admits the deferred task, which now preempts.
    assert!(sched.unlock_scheduler());
    assert_eq!(sched.current_task(), b);
    sched.assert_invariants();
}

#[test]
fn mid_queue_insertion_keeps_the_runner() {
    let mut sched = boot();
    let r = spawn(&mut sched, "r", 30);
    let x = spawn(&mut sched, "x", 10);
    assert!(sched.add_ready(r));
    assert!(!sched.add_ready(x));

    let b = spawn(&mut sched, "b", 20);
    assert!(!sched.add_ready(b));
    sched.assert_invariants();

    let order: Vec<Pid> = sched.readytorun_tasks().collect();
    assert_eq!(order[..3], [r, b, x]);
    assert_eq!(sched.task(b).state(), TaskState::ReadyToRun);
}

#[test]
fn round_trip_restores_the_queue() {
    let mut sched = boot();
    let r = spawn(&mut sched, "r", 10);
    assert!(sched.add_ready(r));
    let before: Vec<Pid> = sched.readytorun_tasks().collect();

    let b = spawn(&mut sched, "b", 20);
    assert!(sched.add_ready(b));
    assert!(sched.remove_ready(b));
    sched.assert_invariants();

    let after: Vec<Pid> = sched.readytorun_tasks().collect();
    assert_eq!(before, after);
    assert_eq!(sched.task(r).state(), TaskState::Running);
}
