//! Measures what a shared counter increment costs under three synchronization
//! disciplines (per-slot spinlock, hardware atomic, no synchronization) while
//! every hardware thread hammers a cache-line-per-slot arena with Zipf-skewed
//! keys.
//!
//! A run is driven by [`BenchmarkOrchestrator`]: the calling thread and
//! `participants - 1` pinned workers precompute their keys, then pass through
//! one [`PhaseBarrier`] phase per [`PrimitiveKind`], each timing its own share
//! of the increments with a serializing [`CycleTimer`].

use once_cell::sync::Lazy;

pub mod affinity;
pub mod arena;
pub mod barrier;
pub mod config;
pub mod orchestrator;
pub mod primitive;
pub mod report;
pub mod spin;
pub mod timer;
pub mod zipf;

pub use arena::{MemoryArena, SLOT_SIZE, Slot};
pub use barrier::{PhaseBarrier, Role};
pub use config::{BenchmarkConfig, DatasetSize, SkewPreset};
pub use orchestrator::{BenchmarkOrchestrator, iterations_per_worker};
pub use primitive::{ContentionPrimitive, PrimitiveKind};
pub use report::{BraceBlockWriter, PrimitiveAverage, ResultSink, SkewReport};
pub use timer::{CounterUnit, CycleTimer};
pub use zipf::{KeyBuffer, ZipfKeyGenerator};

/// Cache line size reported by the host. Arena slots are laid out for 64;
/// a different answer here means neighbouring slots can falsely share.
pub static CACHE_LINE_SIZE: Lazy<usize> = Lazy::new(|| {
    // L1d is where the coherence traffic under test happens
    cache_size::cache_line_size(1, cache_size::CacheType::Data)
        .or_else(|| cache_size::cache_line_size(1, cache_size::CacheType::Unified))
        .or_else(|| cache_size::cache_line_size(2, cache_size::CacheType::Data))
        .or_else(|| cache_size::cache_line_size(2, cache_size::CacheType::Unified))
        // Undetectable (containers, non-x86): assume the common case
        .unwrap_or(64)
});

/// Number of logical cores the process may run on, detected once.
pub static HARDWARE_THREADS: Lazy<usize> = Lazy::new(|| {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
});

/// Pads and aligns a value to its own cache line.
#[derive(Debug, Default)]
#[repr(C, align(64))]
pub struct CachePadded<T>(pub T);

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        &self.0
    }
}
