//! Two-sided rendezvous that opens a timed region for all participants at
//! once and keeps the next phase closed until every participant has left.
//!
//! One phase walks `Idle -> AwaitingReady -> Running -> AwaitingDone -> Idle`:
//!
//! * every participant bumps `ready` and spins on `start`;
//! * the coordinator waits for `ready == participants`, zeroes `ready` and
//!   raises `start`, releasing everyone into the timed region together;
//! * each participant times its own work, then bumps `done`;
//! * the coordinator waits for `done == participants`, zeroes `done` and
//!   drops `start`; the others spin until they see `start` low before they may
//!   arrive for the next phase.
//!
//! There is no timeout: a participant that never arrives parks the rest
//! forever.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::CachePadded;
use crate::spin::{PauseHint, Relax, spin_until};
use crate::timer::CycleTimer;

/// Who drives the barrier's state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Participant,
}

impl Role {
    /// Worker 0 coordinates.
    pub fn for_worker(id: usize) -> Self {
        if id == 0 {
            Role::Coordinator
        } else {
            Role::Participant
        }
    }

    pub fn is_coordinator(self) -> bool {
        self == Role::Coordinator
    }
}

pub struct PhaseBarrier<R: Relax = PauseHint> {
    participants: u64,
    ready: CachePadded<AtomicU64>,
    done: CachePadded<AtomicU64>,
    start: CachePadded<AtomicBool>,
    phases: AtomicU64,
    _relax: PhantomData<fn() -> R>,
}

impl<R: Relax> PhaseBarrier<R> {
    pub fn new(participants: usize) -> Self {
        assert!(participants > 0, "a barrier needs at least one participant");

        PhaseBarrier {
            participants: participants as u64,
            ready: CachePadded(AtomicU64::new(0)),
            done: CachePadded(AtomicU64::new(0)),
            start: CachePadded(AtomicBool::new(false)),
            phases: AtomicU64::new(0),
            _relax: PhantomData,
        }
    }

    pub fn participants(&self) -> usize {
        self.participants as usize
    }

    /// Phases fully exited so far.
    pub fn phases_completed(&self) -> u64 {
        self.phases.load(Ordering::Acquire)
    }

    /// Entry rendezvous. Returns once the coordinator has seen every
    /// participant arrive and raised the start flag.
    #[inline(always)]
    pub fn enter(&self, role: Role) {
        self.ready.fetch_add(1, Ordering::AcqRel);

        if role.is_coordinator() {
            spin_until::<R>(|| self.ready.load(Ordering::Acquire) >= self.participants);
            self.ready.store(0, Ordering::Relaxed);
            self.start.store(true, Ordering::Release);
        }

        spin_until::<R>(|| self.start.load(Ordering::Acquire));
    }

    /// Exit rendezvous. Returns once every participant has finished the
    /// phase and the start flag is low again.
    #[inline(always)]
    pub fn exit(&self, role: Role) {
        self.done.fetch_add(1, Ordering::AcqRel);

        if role.is_coordinator() {
            spin_until::<R>(|| self.done.load(Ordering::Acquire) >= self.participants);
            self.done.store(0, Ordering::Relaxed);
            self.phases.fetch_add(1, Ordering::Release);
            self.start.store(false, Ordering::Release);
        }

        spin_until::<R>(|| !self.start.load(Ordering::Acquire));
    }

    /// Runs `work` between the two rendezvous and returns the counter delta
    /// this participant measured around it.
    #[inline(always)]
    pub fn synchronize(&self, role: Role, work: impl FnOnce()) -> u64 {
        self.enter(role);

        let timer = CycleTimer::start();
        work();
        let elapsed = timer.stop();

        self.exit(role);
        elapsed
    }
}

impl<R: Relax> std::fmt::Debug for PhaseBarrier<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseBarrier")
            .field("participants", &self.participants)
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .field("done", &self.done.load(Ordering::Relaxed))
            .field("start", &self.start.load(Ordering::Relaxed))
            .field("phases", &self.phases.load(Ordering::Relaxed))
            .finish()
    }
}
