use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail, ensure};

use crate::HARDWARE_THREADS;
use crate::arena::SLOT_SIZE;
use crate::primitive::PrimitiveKind;

const KIB: usize = 1024;
const MIB: usize = KIB * KIB;
const GIB: usize = KIB * MIB;

/// Increments shared out across all workers per phase.
pub const DEFAULT_TOTAL_INCREMENTS: u64 = 1 << 28;

/// Arena size: small enough to live in the last-level cache, or large
/// enough to spill into DRAM (and across NUMA nodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetSize {
    /// 32 MiB
    Small,
    /// 1 GiB
    Large,
    Bytes(usize),
}

impl DatasetSize {
    pub fn bytes(self) -> usize {
        match self {
            DatasetSize::Small => 32 * MIB,
            DatasetSize::Large => GIB,
            DatasetSize::Bytes(bytes) => bytes,
        }
    }

    /// One slot per cache line.
    pub fn slot_count(self) -> usize {
        self.bytes() / SLOT_SIZE
    }
}

impl FromStr for DatasetSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "small" => Ok(DatasetSize::Small),
            "large" => Ok(DatasetSize::Large),
            other => bail!("unknown dataset size `{other}` (expected small or large)"),
        }
    }
}

impl fmt::Display for DatasetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetSize::Small => write!(f, "small (32 MiB)"),
            DatasetSize::Large => write!(f, "large (1 GiB)"),
            DatasetSize::Bytes(bytes) => write!(f, "{bytes} bytes"),
        }
    }
}

/// Canned skew sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkewPreset {
    /// 0.2 to 0.8 coarsely, then 0.81 to 1.09 in hundredths
    Fine,
    /// 0.0 to 0.99 in hundredths
    Full,
}

impl SkewPreset {
    pub fn values(self) -> Vec<f64> {
        match self {
            SkewPreset::Fine => [0.2, 0.4, 0.6, 0.8]
                .into_iter()
                .chain((81..=109).map(hundredths))
                .collect(),
            SkewPreset::Full => (0..=99).map(hundredths).collect(),
        }
    }
}

fn hundredths(n: u32) -> f64 {
    f64::from(n) / 100.0
}

impl FromStr for SkewPreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fine" => Ok(SkewPreset::Fine),
            "full" => Ok(SkewPreset::Full),
            other => bail!("unknown skew preset `{other}` (expected fine or full)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    pub dataset: DatasetSize,
    pub skews: Vec<f64>,
    /// Workers per run, the calling thread included
    pub participants: usize,
    /// Increments per phase before the per-worker split
    pub total_increments: u64,
    /// Phases in run order
    pub primitives: Vec<PrimitiveKind>,
    /// Keys precomputed per worker; `None` means one per arena slot
    pub key_buffer_len: Option<usize>,
    /// Issue the relax hint while spinning on a held lock
    pub pause: bool,
    pub pin_threads: bool,
    /// Check arena counters after each phase. On by default in debug builds
    /// only: the check walks the whole arena between phases.
    pub verify_counts: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        BenchmarkConfig {
            dataset: DatasetSize::Large,
            skews: SkewPreset::Fine.values(),
            participants: *HARDWARE_THREADS,
            total_increments: DEFAULT_TOTAL_INCREMENTS,
            primitives: PrimitiveKind::DEFAULT_SET.to_vec(),
            key_buffer_len: None,
            pause: true,
            pin_threads: true,
            verify_counts: cfg!(debug_assertions),
        }
    }
}

impl BenchmarkConfig {
    pub fn key_buffer_len(&self) -> usize {
        self.key_buffer_len
            .unwrap_or_else(|| self.dataset.slot_count())
    }

    pub fn validate(&self) -> Result<()> {
        let slots = self.dataset.slot_count();
        ensure!(slots > 0, "dataset of {} bytes holds no slots", self.dataset.bytes());
        ensure!(
            slots.is_power_of_two(),
            "dataset must hold a power-of-two number of {SLOT_SIZE}-byte slots, got {slots}"
        );

        let keys = self.key_buffer_len();
        ensure!(
            keys.is_power_of_two(),
            "key buffer length must be a non-zero power of two, got {keys}"
        );

        ensure!(self.participants > 0, "at least one participant is required");
        ensure!(!self.primitives.is_empty(), "no primitives selected");
        ensure!(!self.skews.is_empty(), "no skew values to sweep");

        for &skew in &self.skews {
            ensure!(
                skew.is_finite() && skew >= 0.0,
                "skew must be a finite non-negative number, got {skew}"
            );
        }

        Ok(())
    }
}
