// The measurement pipeline.
//
// Benchmarks run one after another on the calling thread so no benchmark's
// cache, TLB or page cache footprint overlaps another's. Each benchmark owns
// its buffers and drops them before the next one starts; the only thing
// handed on is the frozen main-memory working set, which the copy and disk
// benchmarks read.

use crate::branch::{BranchContrast, BranchSequence};
use crate::disk::DiskFile;
use crate::error::NumbersError;
use crate::ops::{BlockCopier, LockedCounter};
use crate::probe::CapabilitySnapshot;
use crate::report::{self, BenchRun, Benchmark, Measurements};
use crate::working_set::{Payload, WorkingSet};
use rayon::ThreadPool;
use std::path::PathBuf;
use std::time::Duration;
use trial_bench::{TrialConfig, TrialEngine, TrialResult};

/// Run configuration taken from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub epochs: u32,
    pub min_epoch_time: Duration,
    pub disk_dir: PathBuf,
    pub verbose: bool,
}

impl Settings {
    fn repeated(&self) -> TrialConfig {
        TrialConfig::auto(self.epochs, self.min_epoch_time)
    }
}

/// Which benchmarks a snapshot allows, with their sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkPlan {
    /// Cache levels with a known size, as (benchmark, working set bytes).
    pub cache_levels: Vec<(Benchmark, usize)>,
    pub memory_size: usize,
    pub branch_len: usize,
    pub disk: bool,
}

impl BenchmarkPlan {
    pub fn from_snapshot(snapshot: &CapabilitySnapshot) -> Self {
        let levels = [
            (Benchmark::L1RandomAccess, snapshot.l1_size),
            (Benchmark::L2RandomAccess, snapshot.l2_size),
            (Benchmark::L3RandomAccess, snapshot.l3_size),
        ];

        let mut cache_levels = Vec::with_capacity(levels.len());
        for (benchmark, size) in levels {
            if size == 0 {
                log::warn!("{}: cache size not reported, skipping", benchmark.name());
            } else {
                cache_levels.push((benchmark, size));
            }
        }

        let disk = snapshot.disk_benchmarks_enabled();
        if !disk {
            log::warn!(
                "disk benchmarks skipped: {} MiB free, need more than {} MiB",
                snapshot.disk_available_bytes >> 20,
                snapshot.large_working_set_size >> 20
            );
        }

        Self {
            cache_levels,
            memory_size: snapshot.large_working_set_size,
            branch_len: BranchSequence::len_for(snapshot.l3_size, snapshot.large_working_set_size),
            disk,
        }
    }
}

pub struct Pipeline {
    plan: BenchmarkPlan,
    settings: Settings,
    engine: TrialEngine,
    pool: ThreadPool,
}

impl Pipeline {
    /// __Arguments:__
    ///
    /// + `snapshot` - host capabilities, decides what runs and at what size
    ///
    /// + `settings` - epochs, epoch length, disk directory, verbosity
    ///
    /// + `engine` - trial engine, carrying the counters and cancel flag
    ///
    pub fn new(
        snapshot: &CapabilitySnapshot,
        settings: Settings,
        engine: TrialEngine,
    ) -> Result<Self, NumbersError> {
        // setup work only; measurement never runs inside this pool
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(snapshot.core_count.max(1))
            .build()?;

        Ok(Self {
            plan: BenchmarkPlan::from_snapshot(snapshot),
            settings,
            engine,
            pool,
        })
    }

    /// Runs every planned benchmark in order.
    pub fn run(&mut self) -> Result<Measurements, NumbersError> {
        if self.settings.verbose {
            println!("{}", report::trial_table_header());
        }

        let mut runs = Vec::new();

        runs.push(self.mutex_access()?);

        for (benchmark, size) in self.plan.cache_levels.clone() {
            if let Some(run) = self.random_access(benchmark, size)? {
                runs.push(run);
            }
        }

        let branch = self.branch_contrast()?;

        if let Some((run, payload)) = self.memory_random_access()? {
            runs.push(run);
            runs.push(self.memory_copy(&payload)?);

            if self.plan.disk {
                runs.extend(self.disk_io(&payload)?);
            }
        }

        Ok(Measurements {
            runs,
            branch: Some(branch),
        })
    }

    fn mutex_access(&mut self) -> Result<BenchRun, NumbersError> {
        let counter = LockedCounter::new();
        let config = self.settings.repeated();
        let result = self.measure(Benchmark::MutexAccess, config, || counter.increment())?;

        Ok(BenchRun {
            benchmark: Benchmark::MutexAccess,
            result,
            units: 1,
        })
    }

    fn random_access(
        &mut self,
        benchmark: Benchmark,
        size: usize,
    ) -> Result<Option<BenchRun>, NumbersError> {
        self.engine.cancel_flag().check(benchmark.name())?;

        let Some(working_set) = WorkingSet::build(size) else {
            log::warn!("{}: {size} bytes holds no slot, skipping", benchmark.name());
            return Ok(None);
        };

        let config = self.settings.repeated();
        let result = self.measure(benchmark, config, || working_set.chase())?;

        Ok(Some(BenchRun {
            benchmark,
            result,
            units: working_set.len() as u64,
        }))
    }

    fn branch_contrast(&mut self) -> Result<BranchContrast, NumbersError> {
        const SORTED: &str = "sorted_memory_branch_mispredictions";
        const UNSORTED: &str = "unsorted_memory_branch_mispredictions";

        self.engine.cancel_flag().check(SORTED)?;

        let len = self.plan.branch_len;
        let mut sequence = self.pool.install(|| BranchSequence::sorted(len));
        let config = self.settings.repeated();

        let sorted = self.measure_named(SORTED, config, || sequence.positive_only())?;
        sequence.shuffle();
        let unsorted = self.measure_named(UNSORTED, config, || sequence.positive_only())?;

        Ok(BranchContrast { sorted, unsorted })
    }

    /// Also hands back the working set as the payload for the copy and disk
    /// benchmarks, which have nothing to work on without it.
    fn memory_random_access(&mut self) -> Result<Option<(BenchRun, Payload)>, NumbersError> {
        let benchmark = Benchmark::MemoryRandomAccess;
        self.engine.cancel_flag().check(benchmark.name())?;

        let size = self.plan.memory_size;
        let Some(working_set) = WorkingSet::build(size) else {
            log::warn!("{}: {size} bytes holds no slot, skipping", benchmark.name());
            return Ok(None);
        };

        let result = self.measure(benchmark, TrialConfig::SINGLE_SHOT, || working_set.chase())?;
        let run = BenchRun {
            benchmark,
            result,
            units: working_set.len() as u64,
        };

        Ok(Some((run, working_set.into_payload())))
    }

    fn memory_copy(&mut self, payload: &Payload) -> Result<BenchRun, NumbersError> {
        let mut copier = BlockCopier::new(payload.as_bytes());
        let units = copier.blocks() as u64;
        let config = self.settings.repeated();
        let result = self.measure(Benchmark::MemoryCopy1MiB, config, || copier.copy_all())?;

        Ok(BenchRun {
            benchmark: Benchmark::MemoryCopy1MiB,
            result,
            units,
        })
    }

    /// Write, seek and read passes over one temporary file, which is removed
    /// when this returns, successfully or not.
    fn disk_io(&mut self, payload: &Payload) -> Result<Vec<BenchRun>, NumbersError> {
        let file = DiskFile::create_in(&self.settings.disk_dir)?;
        let bytes = payload.as_bytes();

        let write = self.try_measure(Benchmark::Fwrite1MiBToDisk, || file.write_payload(bytes))?;
        let units = file.blocks()?;
        let seek = self.try_measure(Benchmark::FseekFromDisk, || file.seek_blocks())?;
        let read = self.try_measure(Benchmark::Fread1MiBFromDisk, || file.read_blocks())?;

        Ok([
            (Benchmark::Fwrite1MiBToDisk, write),
            (Benchmark::FseekFromDisk, seek),
            (Benchmark::Fread1MiBFromDisk, read),
        ]
        .into_iter()
        .map(|(benchmark, result)| BenchRun {
            benchmark,
            result,
            units,
        })
        .collect())
    }

    fn measure<T, F>(
        &mut self,
        benchmark: Benchmark,
        config: TrialConfig,
        op: F,
    ) -> Result<TrialResult, NumbersError>
    where
        F: FnMut() -> T,
    {
        self.measure_named(benchmark.name(), config, op)
    }

    fn measure_named<T, F>(
        &mut self,
        name: &str,
        config: TrialConfig,
        op: F,
    ) -> Result<TrialResult, NumbersError>
    where
        F: FnMut() -> T,
    {
        log::info!("running {name}");
        let result = self.engine.run(name, config, op)?;
        self.trace(&result);
        Ok(result)
    }

    /// Single-shot fallible measurement, for the disk passes.
    fn try_measure<T, F>(&mut self, benchmark: Benchmark, op: F) -> Result<TrialResult, NumbersError>
    where
        F: FnMut() -> std::io::Result<T>,
    {
        log::info!("running {}", benchmark.name());
        let result = self
            .engine
            .try_run(benchmark.name(), TrialConfig::SINGLE_SHOT, op)?;
        self.trace(&result);
        Ok(result)
    }

    fn trace(&self, result: &TrialResult) {
        if self.settings.verbose {
            println!("{}", report::render_trial(result));
        }
    }
}
