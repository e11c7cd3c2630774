//! Drives the sweep: one barrier-synchronized run per skew value, one phase
//! per primitive, all workers hammering the same arena.

use std::thread;

use anyhow::{Context, Result, ensure};
use tracing::{debug, info, warn};

use crate::affinity::{core_for_worker, pin_current_thread};
use crate::arena::MemoryArena;
use crate::barrier::{PhaseBarrier, Role};
use crate::config::BenchmarkConfig;
use crate::primitive::ContentionPrimitive;
use crate::report::{PrimitiveAverage, ResultSink, SkewReport};
use crate::timer::counter_unit;
use crate::zipf::{KeyBuffer, ZipfKeyGenerator};

/// Increments each worker performs in one phase. The remainder of the
/// division is dropped, so a phase completes `total / participants *
/// participants` increments, not necessarily `total`.
pub fn iterations_per_worker(total_increments: u64, participants: usize) -> u64 {
    total_increments / participants as u64
}

/// Unrecoverable setup failure. Workers already spawned are spinning in the
/// barrier and cannot be unwound, so the whole process goes down.
fn fatal(message: &str) -> ! {
    tracing::error!("{message}; aborting");
    std::process::abort()
}

pub struct BenchmarkOrchestrator {
    config: BenchmarkConfig,
    arena: MemoryArena,
}

impl BenchmarkOrchestrator {
    pub fn new(config: BenchmarkConfig) -> Result<Self> {
        config.validate().context("invalid benchmark configuration")?;

        let arena = MemoryArena::new(config.dataset.slot_count())
            .with_context(|| format!("allocating {} arena", config.dataset))?;

        info!(
            dataset = %config.dataset,
            slots = arena.len(),
            participants = config.participants,
            primitives = ?config.primitives,
            unit = %counter_unit(),
            "benchmark ready"
        );

        Ok(BenchmarkOrchestrator { config, arena })
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    pub fn arena(&self) -> &MemoryArena {
        &self.arena
    }

    /// Runs every configured skew value in order, handing each result to
    /// `sink` as soon as it is available.
    pub fn sweep(&self, sink: &mut impl ResultSink) -> Result<()> {
        for &skew in &self.config.skews {
            let report = self.run_skew(skew)?;
            sink.record(&report)
                .with_context(|| format!("recording result for skew {skew}"))?;
        }

        sink.finish().context("finishing result output")
    }

    /// One full run at `skew`: the calling thread becomes worker 0 and
    /// coordinates `participants - 1` spawned workers through one phase per
    /// primitive.
    pub fn run_skew(&self, skew: f64) -> Result<SkewReport> {
        ensure!(
            skew.is_finite() && skew >= 0.0,
            "skew must be a finite non-negative number, got {skew}"
        );

        let run = RunContext::new(&self.config, &self.arena, skew);
        if run.iterations == 0 {
            warn!(
                total = self.config.total_increments,
                participants = run.participants,
                "fewer increments than participants; phases will be empty"
            );
        }

        let outcomes = thread::scope(|s| {
            let run = &run;
            let mut handles = Vec::with_capacity(run.participants - 1);

            for id in 1..run.participants {
                let spawned = thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn_scoped(s, move || run.run_worker(id));

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => fatal(&format!("failed to spawn worker {id}: {err}")),
                }
            }

            let mut outcomes = Vec::with_capacity(run.participants);
            outcomes.push(run.run_worker(0));

            for (i, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(_) => fatal(&format!("worker {} panicked", i + 1)),
                }
            }

            outcomes
        });

        run.aggregate(outcomes)
    }
}

/// Everything the workers of one skew value share.
struct RunContext<'a> {
    config: &'a BenchmarkConfig,
    arena: &'a MemoryArena,
    barrier: PhaseBarrier,
    primitives: Vec<Box<dyn ContentionPrimitive>>,
    skew: f64,
    participants: usize,
    iterations: u64,
}

/// What one worker hands back after its last phase.
struct WorkerOutcome {
    /// Counter delta per phase, in primitive order
    elapsed: Vec<u64>,
    /// Count-check failures, only ever filled in by the coordinator
    violations: Vec<anyhow::Error>,
}

impl<'a> RunContext<'a> {
    fn new(config: &'a BenchmarkConfig, arena: &'a MemoryArena, skew: f64) -> Self {
        RunContext {
            config,
            arena,
            barrier: PhaseBarrier::new(config.participants),
            primitives: config
                .primitives
                .iter()
                .map(|kind| kind.build(config.pause))
                .collect(),
            skew,
            participants: config.participants,
            iterations: iterations_per_worker(config.total_increments, config.participants),
        }
    }

    fn completed_iterations(&self) -> u64 {
        self.iterations * self.participants as u64
    }

    fn run_worker(&self, id: usize) -> WorkerOutcome {
        let role = Role::for_worker(id);

        if self.config.pin_threads {
            let core = core_for_worker(id);
            if let Err(err) = pin_current_thread(core) {
                warn!(worker = id, core, error = %err, "running unpinned");
            }
        }

        // Everything the timed loops touch is built here, before the barrier
        let keys = match ZipfKeyGenerator::new(self.skew, self.arena.len() as u64, id as u64)
            .and_then(|mut generator| KeyBuffer::generate(&mut generator, self.config.key_buffer_len()))
        {
            Ok(keys) => keys,
            Err(err) => fatal(&format!("worker {id} could not build its key buffer: {err:#}")),
        };
        debug!(worker = id, skew = self.skew, keys = keys.len(), "key buffer ready");

        for primitive in &self.primitives {
            primitive.prepare();
        }

        let verify = role.is_coordinator() && self.config.verify_counts;
        let mut elapsed = Vec::with_capacity(self.primitives.len());
        let mut violations = Vec::new();

        for primitive in &self.primitives {
            // No phase is running on either side of a synchronize, so the
            // coordinator may read the arena here
            let before = verify.then(|| self.arena.total());

            let cycles = self.barrier.synchronize(role, || {
                primitive.run(self.arena, self.iterations, &keys)
            });
            elapsed.push(cycles);

            if let Some(before) = before {
                if let Err(err) = self.check_phase(primitive.as_ref(), before) {
                    violations.push(err);
                }
            }

            if role.is_coordinator() {
                debug!(
                    skew = self.skew,
                    primitive = %primitive.kind(),
                    phase = self.barrier.phases_completed(),
                    "phase complete"
                );
            }
        }

        WorkerOutcome {
            elapsed,
            violations,
        }
    }

    /// Compares the arena's growth over one phase with the increments issued.
    fn check_phase(&self, primitive: &dyn ContentionPrimitive, before: u64) -> Result<()> {
        let gained = self.arena.total().wrapping_sub(before);
        let expected = self.completed_iterations();

        if primitive.lossless() || self.participants == 1 {
            ensure!(
                gained == expected,
                "{} phase at skew {} gained {gained} increments, expected exactly {expected}",
                primitive.kind(),
                self.skew
            );
        } else {
            ensure!(
                gained <= expected,
                "{} phase at skew {} gained {gained} increments, more than the {expected} issued",
                primitive.kind(),
                self.skew
            );
        }

        Ok(())
    }

    fn aggregate(&self, outcomes: Vec<WorkerOutcome>) -> Result<SkewReport> {
        let mut totals = vec![0u64; self.primitives.len()];
        let mut violations = Vec::new();

        for outcome in outcomes {
            for (total, elapsed) in totals.iter_mut().zip(&outcome.elapsed) {
                *total += elapsed;
            }
            violations.extend(outcome.violations);
        }

        if let Some(first) = violations.into_iter().next() {
            return Err(first.context("synchronization defect detected"));
        }

        let completed = self.completed_iterations();
        let averages: Vec<PrimitiveAverage> = self
            .primitives
            .iter()
            .zip(totals)
            .map(|(primitive, total)| PrimitiveAverage {
                kind: primitive.kind(),
                per_op: if completed == 0 {
                    0.0
                } else {
                    total as f64 / completed as f64
                },
            })
            .collect();

        info!(
            skew = self.skew,
            participants = self.participants,
            per_worker = self.iterations,
            averages = ?averages.iter().map(|a| (a.kind.label(), a.per_op)).collect::<Vec<_>>(),
            "skew complete"
        );

        Ok(SkewReport {
            skew: self.skew,
            participants: self.participants,
            iterations_per_worker: self.iterations,
            unit: counter_unit(),
            averages,
        })
    }
}
