use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, bail};

use crate::CACHE_LINE_SIZE;
use crate::spin::{Relax, SpinFlag};

/// Size and alignment of one [`Slot`]
pub const SLOT_SIZE: usize = 64;

/// One cache line of the arena: a counter plus the lock guarding it.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct Slot {
    value: AtomicU64,
    lock: SpinFlag,
}

const _: () = assert!(std::mem::size_of::<Slot>() == SLOT_SIZE);
const _: () = assert!(std::mem::align_of::<Slot>() == SLOT_SIZE);

impl Slot {
    /// Read-modify-write with no synchronization. Concurrent callers lose
    /// updates, which is exactly what the baseline measures.
    #[inline(always)]
    pub fn increment_racy(&self) {
        let current = self.value.load(Ordering::Relaxed);
        self.value.store(current.wrapping_add(1), Ordering::Relaxed);
    }

    /// Locked add straight on the shared line.
    #[inline(always)]
    pub fn increment_atomic(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes the embedded lock, increments, releases.
    #[inline(always)]
    pub fn increment_locked<R: Relax>(&self) {
        self.lock.lock::<R>();
        // The lock orders these; the value itself needs no stronger ordering
        let current = self.value.load(Ordering::Relaxed);
        self.value.store(current.wrapping_add(1), Ordering::Relaxed);
        self.lock.unlock();
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Fixed-length, cache-line aligned array of [`Slot`]s shared by all workers.
///
/// Allocated zeroed in one block (for large arenas the kernel backs the pages
/// lazily) and never resized.
pub struct MemoryArena {
    slots: NonNull<Slot>,
    len: usize,
    layout: Layout,
}

// Slots only hold atomics
unsafe impl Send for MemoryArena {}
unsafe impl Sync for MemoryArena {}

impl MemoryArena {
    pub fn new(slot_count: usize) -> Result<Self> {
        if slot_count == 0 {
            bail!("memory arena needs at least one slot");
        }

        if *CACHE_LINE_SIZE != SLOT_SIZE {
            tracing::warn!(
                detected = *CACHE_LINE_SIZE,
                slot = SLOT_SIZE,
                "host cache line differs from slot size; adjacent slots may share lines"
            );
        }

        let layout = Layout::array::<Slot>(slot_count)
            .with_context(|| format!("arena of {slot_count} slots overflows the address space"))?;

        // All-zero bytes are a valid Slot: zero counter, unlocked flag
        let ptr = unsafe { alloc_zeroed(layout) as *mut Slot };
        let Some(slots) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };

        tracing::debug!(slots = slot_count, bytes = layout.size(), "allocated memory arena");

        Ok(MemoryArena {
            slots,
            len: slot_count,
            layout,
        })
    }

    /// Arena covering `dataset_bytes`, one slot per cache line.
    pub fn with_dataset_bytes(dataset_bytes: usize) -> Result<Self> {
        Self::new(dataset_bytes / SLOT_SIZE)
    }

    #[inline(always)]
    pub fn slot(&self, index: usize) -> &Slot {
        &self.as_slice()[index]
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[Slot] {
        unsafe { std::slice::from_raw_parts(self.slots.as_ptr(), self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.layout.size()
    }

    /// Sum of every slot's counter. Only meaningful while no phase is running.
    pub fn total(&self) -> u64 {
        self.as_slice()
            .iter()
            .fold(0u64, |acc, slot| acc.wrapping_add(slot.value()))
    }
}

impl Drop for MemoryArena {
    fn drop(&mut self) {
        unsafe { dealloc(self.slots.as_ptr() as *mut u8, self.layout) }
    }
}

impl std::fmt::Debug for MemoryArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryArena")
            .field("slots", &self.len)
            .field("bytes", &self.layout.size())
            .finish()
    }
}
