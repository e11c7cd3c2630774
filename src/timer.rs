//! Serializing cycle-counter reads.
//!
//! On x86_64 the timed region is bracketed the way Intel's benchmarking guide
//! prescribes: `CPUID; RDTSC` to open (nothing earlier may drift past the
//! read) and `RDTSCP; CPUID` to close (nothing later may drift before it).
//! Other targets fall back to a monotonic nanosecond clock, which is both
//! coarser and noisier; [`counter_unit`] reports which one is in use.

use std::fmt;
use std::sync::atomic::{Ordering, compiler_fence};

/// Unit of the values returned by [`CycleTimer::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterUnit {
    Cycles,
    Nanoseconds,
}

impl fmt::Display for CounterUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterUnit::Cycles => write!(f, "cycles"),
            CounterUnit::Nanoseconds => write!(f, "ns"),
        }
    }
}

/// Unit of the counter backing [`CycleTimer`] on this target.
pub const fn counter_unit() -> CounterUnit {
    if cfg!(target_arch = "x86_64") {
        CounterUnit::Cycles
    } else {
        CounterUnit::Nanoseconds
    }
}

/// A started measurement. Consume it with [`stop`](CycleTimer::stop).
#[derive(Debug)]
#[must_use = "a started timer measures nothing until stopped"]
pub struct CycleTimer {
    started: u64,
}

impl CycleTimer {
    #[inline(always)]
    pub fn start() -> Self {
        compiler_fence(Ordering::SeqCst);
        let started = counter::serialized_start();
        compiler_fence(Ordering::SeqCst);
        CycleTimer { started }
    }

    /// Returns the raw counter delta since [`start`](CycleTimer::start).
    #[inline(always)]
    pub fn stop(self) -> u64 {
        compiler_fence(Ordering::SeqCst);
        let stopped = counter::serialized_stop();
        compiler_fence(Ordering::SeqCst);
        stopped.saturating_sub(self.started)
    }
}

#[cfg(target_arch = "x86_64")]
mod counter {
    use core::arch::x86_64::{__cpuid, __rdtscp, _rdtsc};

    #[inline(always)]
    #[allow(unused_unsafe)]
    pub(super) fn serialized_start() -> u64 {
        // SAFETY: CPUID and RDTSC are available on every x86_64 CPU
        unsafe {
            let _ = __cpuid(0);
            _rdtsc()
        }
    }

    #[inline(always)]
    #[allow(unused_unsafe)]
    pub(super) fn serialized_stop() -> u64 {
        let mut aux = 0u32;
        // SAFETY: RDTSCP is available on every x86_64 CPU this tool targets
        unsafe {
            let stopped = __rdtscp(&mut aux);
            let _ = __cpuid(0);
            stopped
        }
    }
}

#[cfg(not(target_arch = "x86_64"))]
mod counter {
    use once_cell::sync::Lazy;
    use std::time::Instant;

    static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

    #[inline(always)]
    pub(super) fn serialized_start() -> u64 {
        EPOCH.elapsed().as_nanos() as u64
    }

    #[inline(always)]
    pub(super) fn serialized_stop() -> u64 {
        EPOCH.elapsed().as_nanos() as u64
    }
}
