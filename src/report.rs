use std::io::{self, Write};

use crate::primitive::PrimitiveKind;
use crate::timer::CounterUnit;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimitiveAverage {
    pub kind: PrimitiveKind,
    /// Counter ticks per increment, averaged over every worker
    pub per_op: f64,
}

/// Outcome of one skew value: the average cost of each primitive, in phase
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct SkewReport {
    pub skew: f64,
    pub participants: usize,
    pub iterations_per_worker: u64,
    pub unit: CounterUnit,
    pub averages: Vec<PrimitiveAverage>,
}

impl SkewReport {
    /// Increments actually performed per phase, after the per-worker split.
    pub fn completed_iterations(&self) -> u64 {
        self.iterations_per_worker * self.participants as u64
    }

    pub fn average(&self, kind: PrimitiveKind) -> Option<f64> {
        self.averages
            .iter()
            .find(|average| average.kind == kind)
            .map(|average| average.per_op)
    }
}

/// Consumer of per-skew results.
pub trait ResultSink {
    fn record(&mut self, report: &SkewReport) -> io::Result<()>;

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResultSink for Vec<SkewReport> {
    fn record(&mut self, report: &SkewReport) -> io::Result<()> {
        self.push(report.clone());
        Ok(())
    }
}

/// Streams results as a brace-delimited block, one `skew: [a, b, c]` entry
/// per line:
///
/// ```text
/// {
///     0.2: [41.7, 23.1, 2.9],
///     0.4: [42.0, 23.5, 3.0]
/// }
/// ```
pub struct BraceBlockWriter<W: Write> {
    out: W,
    entries: usize,
}

impl<W: Write> BraceBlockWriter<W> {
    pub fn new(out: W) -> Self {
        BraceBlockWriter { out, entries: 0 }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ResultSink for BraceBlockWriter<W> {
    fn record(&mut self, report: &SkewReport) -> io::Result<()> {
        if self.entries == 0 {
            writeln!(self.out, "{{")?;
        } else {
            writeln!(self.out, ",")?;
        }

        write!(self.out, "\t{}: [", report.skew)?;
        for (i, average) in report.averages.iter().enumerate() {
            if i > 0 {
                write!(self.out, ", ")?;
            }
            write!(self.out, "{:.3}", average.per_op)?;
        }
        write!(self.out, "]")?;

        self.entries += 1;
        // Results may take minutes apart; show each as soon as it exists
        self.out.flush()
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.entries == 0 {
            writeln!(self.out, "{{")?;
        } else {
            writeln!(self.out)?;
        }
        writeln!(self.out, "}}")?;
        self.out.flush()
    }
}
