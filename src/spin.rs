//! Busy-wait building blocks.
//!
//! Every wait in the harness is a spin: nothing in a timed path may block in
//! the kernel. The idle hint issued between polls sits behind [`Relax`] so a
//! target without x86's `PAUSE` supplies its own equivalent.

use std::sync::atomic::{
    AtomicBool,
    Ordering::{Acquire, Relaxed, Release},
};

/// Hint issued once per failed poll of a spin loop.
pub trait Relax {
    fn relax();
}

/// `PAUSE` on x86, `YIELD`/`ISB` on ARM, via [`core::hint::spin_loop`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PauseHint;

impl Relax for PauseHint {
    #[inline(always)]
    fn relax() {
        core::hint::spin_loop();
    }
}

/// Polls again immediately without any hint.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusySpin;

impl Relax for BusySpin {
    #[inline(always)]
    fn relax() {}
}

/// Spins until `done` returns true.
#[inline(always)]
pub fn spin_until<R: Relax>(mut done: impl FnMut() -> bool) {
    while !done() {
        R::relax();
    }
}

/// A one-word test-and-set lock.
///
/// Deliberately bare: no guard, no data. The caller decides what the lock
/// protects, which lets it live inline in an arena slot.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct SpinFlag {
    locked: AtomicBool,
}

impl SpinFlag {
    pub const fn new() -> Self {
        SpinFlag {
            locked: AtomicBool::new(false),
        }
    }

    /// Acquires the flag, spinning with `R` between exchange attempts.
    #[inline(always)]
    pub fn lock<R: Relax>(&self) {
        while self.locked.swap(true, Acquire) {
            R::relax();
        }
    }

    #[inline(always)]
    pub fn try_lock(&self) -> bool {
        !self.locked.swap(true, Acquire)
    }

    /// Releases the flag. Only the current holder may call this.
    #[inline(always)]
    pub fn unlock(&self) {
        self.locked.store(false, Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::UnsafeCell;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct Guarded {
        flag: SpinFlag,
        value: UnsafeCell<u64>,
    }

    unsafe impl Sync for Guarded {}

    #[test]
    fn lock_unlock_cycle() {
        let flag = SpinFlag::new();
        assert!(!flag.is_locked());

        flag.lock::<PauseHint>();
        assert!(flag.is_locked());
        assert!(!flag.try_lock());

        flag.unlock();
        assert!(!flag.is_locked());
        assert!(flag.try_lock());
        flag.unlock();
    }

    #[test]
    fn mutual_exclusion_under_contention() {
        let guarded = Arc::new(Guarded {
            flag: SpinFlag::new(),
            value: UnsafeCell::new(0),
        });
        let num_threads = 4;
        let per_thread = 10_000;

        let handles: Vec<_> = (0..num_threads)
            .map(|i| {
                let guarded = Arc::clone(&guarded);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        if i % 2 == 0 {
                            guarded.flag.lock::<PauseHint>();
                        } else {
                            guarded.flag.lock::<BusySpin>();
                        }
                        unsafe { *guarded.value.get() += 1 };
                        guarded.flag.unlock();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(unsafe { *guarded.value.get() }, num_threads * per_thread);
    }

    #[test]
    fn spin_until_polls_until_true() {
        let polls = AtomicUsize::new(0);
        spin_until::<PauseHint>(|| polls.fetch_add(1, Relaxed) >= 9);
        assert_eq!(polls.load(Relaxed), 10);
    }
}
