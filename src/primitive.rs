//! The synchronization disciplines under test.
//!
//! Every variant performs exactly `iterations` increments against
//! `arena[keys.get(i)]`. The loops never allocate and never log; per-worker
//! state is set up in [`ContentionPrimitive::prepare`] before the barrier
//! opens.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use anyhow::{Result, bail};
use thread_local::ThreadLocal;

use crate::CachePadded;
use crate::arena::MemoryArena;
use crate::spin::{BusySpin, PauseHint, Relax, SpinFlag};
use crate::zipf::KeyBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// Per-slot test-and-set lock around a plain increment
    Spinlock,
    /// Hardware atomic add on the slot
    Atomic,
    /// Unsynchronized increment
    Baseline,
    /// Private, uncontended lock around an unsynchronized increment
    PerThreadLock,
}

impl PrimitiveKind {
    /// Phase order of the classic three-way comparison.
    pub const DEFAULT_SET: [PrimitiveKind; 3] = [
        PrimitiveKind::Spinlock,
        PrimitiveKind::Atomic,
        PrimitiveKind::Baseline,
    ];

    pub const ALL: [PrimitiveKind; 4] = [
        PrimitiveKind::Spinlock,
        PrimitiveKind::Atomic,
        PrimitiveKind::Baseline,
        PrimitiveKind::PerThreadLock,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PrimitiveKind::Spinlock => "spinlock",
            PrimitiveKind::Atomic => "atomic",
            PrimitiveKind::Baseline => "baseline",
            PrimitiveKind::PerThreadLock => "per-thread-lock",
        }
    }

    /// Instantiates the variant. `pause` selects whether lock spins issue the
    /// relax hint between attempts.
    pub fn build(self, pause: bool) -> Box<dyn ContentionPrimitive> {
        match (self, pause) {
            (PrimitiveKind::Spinlock, true) => Box::new(Spinlock::<PauseHint>::new()),
            (PrimitiveKind::Spinlock, false) => Box::new(Spinlock::<BusySpin>::new()),
            (PrimitiveKind::Atomic, _) => Box::new(Atomic),
            (PrimitiveKind::Baseline, _) => Box::new(Baseline),
            (PrimitiveKind::PerThreadLock, true) => Box::new(PerThreadLock::<PauseHint>::new()),
            (PrimitiveKind::PerThreadLock, false) => Box::new(PerThreadLock::<BusySpin>::new()),
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PrimitiveKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "spinlock" | "spin" => Ok(PrimitiveKind::Spinlock),
            "atomic" => Ok(PrimitiveKind::Atomic),
            "baseline" | "null" => Ok(PrimitiveKind::Baseline),
            "per-thread-lock" | "private" => Ok(PrimitiveKind::PerThreadLock),
            other => bail!("unknown primitive `{other}`"),
        }
    }
}

pub trait ContentionPrimitive: Send + Sync {
    fn kind(&self) -> PrimitiveKind;

    /// Per-worker setup, called on the worker's own thread before the
    /// entry rendezvous.
    fn prepare(&self) {}

    fn run(&self, arena: &MemoryArena, iterations: u64, keys: &KeyBuffer);

    /// Whether concurrent runs never lose an increment.
    fn lossless(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct Baseline;

impl ContentionPrimitive for Baseline {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Baseline
    }

    #[inline(never)]
    fn run(&self, arena: &MemoryArena, iterations: u64, keys: &KeyBuffer) {
        for i in 0..iterations {
            arena.slot(keys.get(i)).increment_racy();
        }
    }

    fn lossless(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct Atomic;

impl ContentionPrimitive for Atomic {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Atomic
    }

    #[inline(never)]
    fn run(&self, arena: &MemoryArena, iterations: u64, keys: &KeyBuffer) {
        for i in 0..iterations {
            arena.slot(keys.get(i)).increment_atomic();
        }
    }

    fn lossless(&self) -> bool {
        true
    }
}

/// Lock embedded in each slot, relaxing with `R` while it is held elsewhere.
pub struct Spinlock<R: Relax = PauseHint> {
    _relax: PhantomData<fn() -> R>,
}

impl<R: Relax> Spinlock<R> {
    pub fn new() -> Self {
        Spinlock {
            _relax: PhantomData,
        }
    }
}

impl<R: Relax> Default for Spinlock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Relax> ContentionPrimitive for Spinlock<R> {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Spinlock
    }

    #[inline(never)]
    fn run(&self, arena: &MemoryArena, iterations: u64, keys: &KeyBuffer) {
        for i in 0..iterations {
            arena.slot(keys.get(i)).increment_locked::<R>();
        }
    }

    fn lossless(&self) -> bool {
        true
    }
}

/// Every worker takes a lock nobody else touches. Lock and unlock cost with
/// zero cross-thread contention on the lock word.
pub struct PerThreadLock<R: Relax = PauseHint> {
    locks: ThreadLocal<CachePadded<SpinFlag>>,
    _relax: PhantomData<fn() -> R>,
}

impl<R: Relax> PerThreadLock<R> {
    pub fn new() -> Self {
        PerThreadLock {
            locks: ThreadLocal::new(),
            _relax: PhantomData,
        }
    }

    fn private_lock(&self) -> &SpinFlag {
        self.locks.get_or(CachePadded::default)
    }
}

impl<R: Relax> Default for PerThreadLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Relax> ContentionPrimitive for PerThreadLock<R> {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::PerThreadLock
    }

    fn prepare(&self) {
        self.private_lock();
    }

    #[inline(never)]
    fn run(&self, arena: &MemoryArena, iterations: u64, keys: &KeyBuffer) {
        let lock = self.private_lock();
        for i in 0..iterations {
            lock.lock::<R>();
            arena.slot(keys.get(i)).increment_racy();
            lock.unlock();
        }
    }

    fn lossless(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zipf::ZipfKeyGenerator;
    use std::thread;

    fn keys(skew: f64, maximum: u64, seed: u64) -> KeyBuffer {
        let mut generator = ZipfKeyGenerator::new(skew, maximum, seed).unwrap();
        KeyBuffer::generate(&mut generator, 256).unwrap()
    }

    fn run_concurrently(primitive: &dyn ContentionPrimitive, arena: &MemoryArena, threads: u64) {
        thread::scope(|s| {
            for id in 0..threads {
                s.spawn(move || {
                    let keys = keys(0.99, arena.len() as u64, id);
                    primitive.prepare();
                    primitive.run(arena, 10_000, &keys);
                });
            }
        });
    }

    #[test]
    fn single_worker_counts_are_exact_for_every_variant() {
        for kind in PrimitiveKind::ALL {
            for pause in [true, false] {
                let arena = MemoryArena::new(64).unwrap();
                let primitive = kind.build(pause);
                assert_eq!(primitive.kind(), kind);

                primitive.prepare();
                primitive.run(&arena, 1000, &keys(0.5, 64, 1));
                assert_eq!(arena.total(), 1000, "{kind} pause={pause}");
            }
        }
    }

    #[test]
    fn zero_iterations_touch_nothing() {
        let arena = MemoryArena::new(16).unwrap();
        for kind in PrimitiveKind::ALL {
            kind.build(true).run(&arena, 0, &keys(0.5, 16, 0));
        }
        assert_eq!(arena.total(), 0);
    }

    #[test]
    fn lossless_variants_survive_contention() {
        for kind in [PrimitiveKind::Atomic, PrimitiveKind::Spinlock] {
            let arena = MemoryArena::new(8).unwrap();
            let primitive = kind.build(true);
            assert!(primitive.lossless());

            run_concurrently(primitive.as_ref(), &arena, 4);
            assert_eq!(arena.total(), 40_000, "{kind}");
        }
    }

    #[test]
    fn lossy_variants_never_overcount() {
        for kind in [PrimitiveKind::Baseline, PrimitiveKind::PerThreadLock] {
            let arena = MemoryArena::new(8).unwrap();
            let primitive = kind.build(true);
            assert!(!primitive.lossless());

            run_concurrently(primitive.as_ref(), &arena, 4);
            let total = arena.total();
            assert!(total > 0 && total <= 40_000, "{kind}: {total}");
        }
    }

    #[test]
    fn private_locks_are_per_thread() {
        let primitive = PerThreadLock::<PauseHint>::new();
        let here = primitive.private_lock() as *const SpinFlag as usize;
        assert_eq!(here, primitive.private_lock() as *const SpinFlag as usize);

        let there = thread::scope(|s| {
            s.spawn(|| primitive.private_lock() as *const SpinFlag as usize)
                .join()
                .unwrap()
        });
        assert_ne!(here, there);
    }

    #[test]
    fn kinds_parse_from_labels() {
        for kind in PrimitiveKind::ALL {
            assert_eq!(kind.label().parse::<PrimitiveKind>().unwrap(), kind);
        }
        assert_eq!("NULL".parse::<PrimitiveKind>().unwrap(), PrimitiveKind::Baseline);
        assert!("mutex".parse::<PrimitiveKind>().is_err());
    }
}
