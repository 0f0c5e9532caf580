
// Repeated-trial timing engine.
//
// An operation is run for a number of epochs; each epoch runs it a number of
// iterations back to back and records one sample of elapsed time, branch
// misses and cycles, normalised per iteration. Results are summarised by the
// median across epochs so a scheduling hiccup in one epoch does not move the
// figure.

pub mod counters;
pub mod error;
pub mod stats;

pub use counters::{CounterReading, EventCounters, NullCounters, open_counters};
pub use error::TrialError;

use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Upper bound on auto-calibrated iterations per epoch.
const MAX_CALIBRATED_ITERATIONS: u64 = 1 << 24;

/// How many times the operation runs inside one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Iterations {
    /// Exactly this many calls per epoch, no warm-up.
    Fixed(u64),
    /// Warm up once, then pick the smallest power of two count that makes an
    /// epoch last at least `min_epoch_time`.
    Auto { min_epoch_time: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialConfig {
    pub epochs: u32,
    pub iterations: Iterations,
}

impl TrialConfig {
    /// One epoch of one call, for operations too heavy to repeat without
    /// disturbing cache or disk state.
    pub const SINGLE_SHOT: Self = Self {
        epochs: 1,
        iterations: Iterations::Fixed(1),
    };

    pub fn auto(epochs: u32, min_epoch_time: Duration) -> Self {
        Self {
            epochs,
            iterations: Iterations::Auto { min_epoch_time },
        }
    }
}

/// One epoch's measurements, per iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub elapsed_ns: f64,
    pub branch_misses: f64,
    pub cpu_cycles: f64,
}

/// All samples of one completed benchmark run.
///
/// Samples are fixed once the run finishes; there is always at least one.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    name: String,
    iterations_per_epoch: u64,
    samples: Vec<Sample>,
}

impl TrialResult {
    /// Builds a result from recorded samples. `None` when `samples` is empty.
    pub fn from_samples(
        name: impl Into<String>,
        iterations_per_epoch: u64,
        samples: Vec<Sample>,
    ) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        Some(Self {
            name: name.into(),
            iterations_per_epoch,
            samples,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn iterations_per_epoch(&self) -> u64 {
        self.iterations_per_epoch
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn median_elapsed_ns(&self) -> f64 {
        stats::median(&self.column(|s| s.elapsed_ns))
    }

    pub fn median_branch_misses(&self) -> f64 {
        stats::median(&self.column(|s| s.branch_misses))
    }

    pub fn median_cpu_cycles(&self) -> f64 {
        stats::median(&self.column(|s| s.cpu_cycles))
    }

    /// Relative spread of elapsed time across epochs.
    pub fn elapsed_error(&self) -> f64 {
        stats::median_abs_percent_error(&self.column(|s| s.elapsed_ns))
    }

    fn column(&self, metric: impl Fn(&Sample) -> f64) -> Vec<f64> {
        self.samples.iter().map(metric).collect()
    }
}

/// Shared flag used to request that a run stop at the next epoch boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Interrupted)` once cancellation has been requested.
    pub fn check(&self, benchmark: &str) -> Result<(), TrialError> {
        if self.is_cancelled() {
            return Err(TrialError::Interrupted {
                benchmark: benchmark.to_string(),
            });
        }
        Ok(())
    }
}

/// Runs operations under a [`TrialConfig`] and records their samples.
pub struct TrialEngine {
    counters: Box<dyn EventCounters>,
    cancel: CancelFlag,
}

impl TrialEngine {
    pub fn new(counters: Box<dyn EventCounters>, cancel: CancelFlag) -> Self {
        Self { counters, cancel }
    }

    pub fn counters_available(&self) -> bool {
        self.counters.is_available()
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Times an infallible operation.
    ///
    /// The operation's return value is consumed through [`black_box`], so
    /// the work producing it cannot be optimised away.
    pub fn run<T, F>(
        &mut self,
        name: &str,
        config: TrialConfig,
        mut op: F,
    ) -> Result<TrialResult, TrialError>
    where
        F: FnMut() -> T,
    {
        self.try_run(name, config, || Ok(op()))
    }

    /// Times a fallible operation.
    ///
    /// __Arguments:__
    ///
    /// + `name` - benchmark name carried into the result
    ///
    /// + `config` - epochs and iterations per epoch
    ///
    /// + `op` - the measured operation; its first error aborts the run,
    ///   a half-failed timing is never reported
    ///
    pub fn try_run<T, F>(
        &mut self,
        name: &str,
        config: TrialConfig,
        mut op: F,
    ) -> Result<TrialResult, TrialError>
    where
        F: FnMut() -> std::io::Result<T>,
    {
        self.cancel.check(name)?;

        let iterations = match config.iterations {
            Iterations::Fixed(n) => n.max(1),
            Iterations::Auto { min_epoch_time } => {
                self.calibrate(name, min_epoch_time, &mut op)?
            }
        };

        let epochs = config.epochs.max(1);
        let mut samples = Vec::with_capacity(epochs as usize);

        for epoch in 0..epochs {
            self.cancel.check(name)?;

            let (elapsed, reading) = self.measure_epoch(iterations, &mut op)?;
            let per_iteration = iterations as f64;
            let sample = Sample {
                elapsed_ns: elapsed.as_nanos() as f64 / per_iteration,
                branch_misses: reading.branch_misses as f64 / per_iteration,
                cpu_cycles: reading.cpu_cycles as f64 / per_iteration,
            };
            log::debug!("{name} epoch {epoch}: {sample:?}");
            samples.push(sample);
        }

        Ok(TrialResult {
            name: name.to_string(),
            iterations_per_epoch: iterations,
            samples,
        })
    }

    fn measure_epoch<T, F>(
        &mut self,
        iterations: u64,
        op: &mut F,
    ) -> Result<(Duration, CounterReading), TrialError>
    where
        F: FnMut() -> std::io::Result<T>,
    {
        self.counters.start();
        let start = Instant::now();
        for _ in 0..iterations {
            black_box(op()?);
        }
        let elapsed = start.elapsed();
        let reading = self.counters.stop();
        Ok((elapsed, reading))
    }

    fn calibrate<T, F>(
        &mut self,
        name: &str,
        min_epoch_time: Duration,
        op: &mut F,
    ) -> Result<u64, TrialError>
    where
        F: FnMut() -> std::io::Result<T>,
    {
        // warm-up
        black_box(op()?);

        let mut iterations = 1;
        while iterations < MAX_CALIBRATED_ITERATIONS {
            self.cancel.check(name)?;

            let start = Instant::now();
            for _ in 0..iterations {
                black_box(op()?);
            }
            if start.elapsed() >= min_epoch_time {
                break;
            }
            iterations *= 2;
        }

        log::debug!("{name}: {iterations} iterations per epoch");
        Ok(iterations)
    }
}
