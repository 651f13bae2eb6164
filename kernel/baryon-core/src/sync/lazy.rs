//! Lazy initialization primitive for `no_std`.
//!
//! [`LazyLock`] initializes a value on first access using a spin-based
//! atomic state machine, so statics whose constructors are not `const` can
//! still live in `static` items.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ops::Deref;
use core::sync::atomic::{AtomicU8, Ordering};

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;
/// The init closure panicked. Only reachable with `panic = unwind`
/// (host-side tests); the kernel target aborts on the first panic.
const POISONED: u8 = 3;

/// A value that is initialized on first access.
///
/// If multiple CPUs race to initialize, one runs the closure and the others
/// spin until the value is ready. With `panic = unwind`, a panicking
/// initializer poisons the lock and subsequent accesses panic instead of
/// spinning forever.
pub struct LazyLock<T, F = fn() -> T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
    init: UnsafeCell<Option<F>>,
}

// SAFETY: The state machine guarantees the value is fully written before any
// reader observes READY, and that the init closure is consumed exactly once.
unsafe impl<T: Send + Sync, F: Send> Send for LazyLock<T, F> {}
unsafe impl<T: Send + Sync, F: Send> Sync for LazyLock<T, F> {}

/// Poisons the lock if dropped before [`defuse`](Self::defuse).
struct PoisonOnUnwind<'a> {
    state: &'a AtomicU8,
}

impl PoisonOnUnwind<'_> {
    fn defuse(self) {
        core::mem::forget(self);
    }
}

impl Drop for PoisonOnUnwind<'_> {
    fn drop(&mut self) {
        self.state.store(POISONED, Ordering::Release);
    }
}

impl<T, F: FnOnce() -> T> LazyLock<T, F> {
    /// Creates a new `LazyLock` with the given initializer.
    pub const fn new(init: F) -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
            value: UnsafeCell::new(MaybeUninit::uninit()),
            init: UnsafeCell::new(Some(init)),
        }
    }

    fn force(&self) -> &T {
        if self.state.load(Ordering::Acquire) == UNINIT
            && self
                .state
                .compare_exchange(UNINIT, INITIALIZING, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        {
            // We won the race — run the initializer.
            let poison = PoisonOnUnwind { state: &self.state };
            // SAFETY: Only the CPU in INITIALIZING state touches `init`.
            let init = unsafe { (*self.init.get()).take() };
            let value = match init {
                Some(f) => f(),
                // Unreachable: the closure is present until consumed here.
                None => unreachable!("LazyLock init closure already taken"),
            };
            // SAFETY: Only the initializer writes the value, exactly once.
            unsafe { (*self.value.get()).write(value) };
            self.state.store(READY, Ordering::Release);
            poison.defuse();
        }

        // Wait for the value (ours or another CPU's) to become ready.
        loop {
            match self.state.load(Ordering::Acquire) {
                READY => break,
                POISONED => panic!("LazyLock poisoned: init closure panicked"),
                _ => core::hint::spin_loop(),
            }
        }
        // SAFETY: State is READY, so the value is fully initialized.
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

impl<T, F: FnOnce() -> T> Deref for LazyLock<T, F> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.force()
    }
}
