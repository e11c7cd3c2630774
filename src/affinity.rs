//! Pinning the calling thread to one logical core.

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::HARDWARE_THREADS;

/// Cores the process was allowed to run on at first use.
static ALLOWED_CORES: Lazy<Vec<usize>> = Lazy::new(|| {
    let cores = allowed_cores();
    if cores.is_empty() {
        (0..*HARDWARE_THREADS).collect()
    } else {
        cores
    }
});

/// Core a worker is pinned to: worker ids map onto the allowed cores
/// round-robin.
pub fn core_for_worker(id: usize) -> usize {
    ALLOWED_CORES[id % ALLOWED_CORES.len()]
}

#[cfg(target_os = "linux")]
fn allowed_cores() -> Vec<usize> {
    // SAFETY: cpu_set_t is plain data; the zeroed value is the empty set
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
            return Vec::new();
        }
        (0..libc::CPU_SETSIZE as usize)
            .filter(|&core| libc::CPU_ISSET(core, &set))
            .collect()
    }
}

#[cfg(not(target_os = "linux"))]
fn allowed_cores() -> Vec<usize> {
    Vec::new()
}

/// Restricts the calling thread to logical core `core`.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(core: usize) -> Result<()> {
    use anyhow::{Context, bail};

    if core >= libc::CPU_SETSIZE as usize {
        bail!("core {core} is outside the cpu_set_t range");
    }

    // SAFETY: as above
    let result = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };

    if result != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("failed to pin thread to core {core}"));
    }

    tracing::debug!(core, "pinned thread");
    Ok(())
}

/// No affinity API on this target; threads float freely.
#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(core: usize) -> Result<()> {
    tracing::debug!(core, "thread pinning unsupported on this target");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn workers_wrap_around_cores() {
        let cores = ALLOWED_CORES.len();
        assert!(cores > 0);
        assert_eq!(core_for_worker(0), core_for_worker(cores));
        assert_eq!(core_for_worker(1), core_for_worker(cores + 1));
    }

    #[test]
    fn pinning_to_an_allowed_core_succeeds() {
        let core = core_for_worker(0);
        // Pin a throwaway thread so the test harness keeps its own mask
        thread::spawn(move || pin_current_thread(core))
            .join()
            .unwrap()
            .unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn absurd_core_rejected() {
        assert!(pin_current_thread(usize::MAX).is_err());
    }
}
