// Turning trial medians into latency figures, and printing them.

use crate::branch::{BranchContrast, BranchPenalty};
use std::fmt::Write;
use trial_bench::TrialResult;

/// Every figure the harness can report, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Benchmark {
    L1RandomAccess,
    L2RandomAccess,
    L3RandomAccess,
    MemoryRandomAccess,
    BranchMissPenalty,
    MutexAccess,
    FseekFromDisk,
    MemoryCopy1MiB,
    Fread1MiBFromDisk,
    Fwrite1MiBToDisk,
}

impl Benchmark {
    pub fn name(self) -> &'static str {
        match self {
            Benchmark::L1RandomAccess => "L1_random_access",
            Benchmark::L2RandomAccess => "L2_random_access",
            Benchmark::L3RandomAccess => "L3_random_access",
            Benchmark::MemoryRandomAccess => "memory_random_access",
            Benchmark::BranchMissPenalty => "branch_miss_penalty",
            Benchmark::MutexAccess => "mutex_access",
            Benchmark::FseekFromDisk => "fseek_from_disk",
            Benchmark::MemoryCopy1MiB => "memory_copy_1MiB",
            Benchmark::Fread1MiBFromDisk => "fread_1MiB_from_disk",
            Benchmark::Fwrite1MiBToDisk => "fwrite_1MiB_to_disk",
        }
    }

    pub fn is_disk(self) -> bool {
        matches!(
            self,
            Benchmark::FseekFromDisk | Benchmark::Fread1MiBFromDisk | Benchmark::Fwrite1MiBToDisk
        )
    }
}

/// A finished run together with the number of units its time covers.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchRun {
    pub benchmark: Benchmark,
    pub result: TrialResult,
    pub units: u64,
}

/// Everything the pipeline measured. Skipped benchmarks are simply absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    pub runs: Vec<BenchRun>,
    pub branch: Option<BranchContrast>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatencyFigure {
    pub benchmark: Benchmark,
    pub nanos_per_unit: f64,
    pub cycles_per_unit: Option<f64>,
}

impl LatencyFigure {
    pub fn name(&self) -> &'static str {
        self.benchmark.name()
    }
}

/// Normalises every run into a figure and adds the branch penalty.
///
/// Cycle columns are filled in only when the branch penalty in cycles is a
/// normal number; otherwise the cycle counter is not trusted for any figure.
/// The result is sorted in report order and depends only on `measurements`.
pub fn aggregate(measurements: &Measurements) -> Vec<LatencyFigure> {
    let penalty = measurements.branch.as_ref().map(BranchContrast::penalty);
    let cycles_valid = penalty.is_some_and(|p| p.cycles_reliable());

    let mut figures: Vec<LatencyFigure> = measurements
        .runs
        .iter()
        .map(|run| {
            let units = run.units.max(1) as f64;
            LatencyFigure {
                benchmark: run.benchmark,
                nanos_per_unit: run.result.median_elapsed_ns() / units,
                cycles_per_unit: cycles_valid.then(|| run.result.median_cpu_cycles() / units),
            }
        })
        .collect();

    if let Some(BranchPenalty { nanos, cycles }) = penalty {
        figures.push(LatencyFigure {
            benchmark: Benchmark::BranchMissPenalty,
            nanos_per_unit: nanos,
            cycles_per_unit: cycles_valid.then_some(cycles),
        });
    }

    figures.sort_by_key(|figure| figure.benchmark);
    figures
}

const NAME_WIDTH: usize = 24;

/// Final report: a header and one line per figure.
pub fn render_figures(figures: &[LatencyFigure]) -> String {
    let with_cycles = figures.iter().any(|f| f.cycles_per_unit.is_some());

    let mut out = String::new();
    if with_cycles {
        let _ = writeln!(out, "{:<NAME_WIDTH$} {:>12} {:>12}", "benchmark", "ns", "cycles");
    } else {
        let _ = writeln!(out, "{:<NAME_WIDTH$} {:>12}", "benchmark", "ns");
    }

    for figure in figures {
        match figure.cycles_per_unit {
            Some(cycles) if with_cycles => {
                let _ = writeln!(
                    out,
                    "{:<NAME_WIDTH$} {:>12.1} {:>12.1}",
                    figure.name(),
                    figure.nanos_per_unit,
                    cycles
                );
            }
            _ => {
                let _ = writeln!(out, "{:<NAME_WIDTH$} {:>12.1}", figure.name(), figure.nanos_per_unit);
            }
        }
    }
    out
}

/// Per-trial table printed in verbose mode, one row per benchmark run.
pub fn render_trial(result: &TrialResult) -> String {
    let ns = result.median_elapsed_ns();
    let ops_per_sec = if ns > 0.0 { 1e9 / ns } else { f64::INFINITY };

    format!(
        "| {:>16.2} | {:>16.2} | {:>6.1}% | {:>12.2} | {:>14.2} | {:>5} x {:>8} | {}",
        ns,
        ops_per_sec,
        result.elapsed_error() * 100.0,
        result.median_branch_misses(),
        result.median_cpu_cycles(),
        result.samples().len(),
        result.iterations_per_epoch(),
        result.name()
    )
}

pub fn trial_table_header() -> String {
    format!(
        "| {:>16} | {:>16} | {:>7} | {:>12} | {:>14} | {:>16} | benchmark",
        "ns/op", "op/s", "err%", "miss/op", "cycles/op", "epochs x iters"
    )
}
