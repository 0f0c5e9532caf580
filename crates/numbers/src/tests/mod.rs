// unit tests

use super::*;

use branch::{BranchContrast, BranchSequence};
use disk::DiskFile;
use error::NumbersError;
use ops::{BlockCopier, LockedCounter};
use pipeline::{BenchmarkPlan, Pipeline, Settings};
use probe::{HostReport, MAX_LARGE_WORKING_SET, MIN_LARGE_WORKING_SET};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use report::{BenchRun, Benchmark, Measurements};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use trial_bench::{CancelFlag, NullCounters, Sample, TrialEngine, TrialError, TrialResult};
use working_set::{SLOT_SIZE, WorkingSet};

const GIB: u64 = 1 << 30;

fn report_with(l1: usize, l2: usize, l3: usize, cores: usize, disk: u64) -> HostReport {
    HostReport {
        page_size: 4 * KIB,
        l1_size: l1,
        l2_size: l2,
        l3_size: l3,
        cache_line_size: 64,
        core_count: cores,
        disk_available_bytes: disk,
    }
}

fn typical_snapshot() -> CapabilitySnapshot {
    CapabilitySnapshot::from_report(report_with(32 * KIB, 256 * KIB, 8 * MIB, 4, 2 * GIB))
}

/// A result whose every epoch has the same per-iteration values.
fn flat_result(name: &str, elapsed_ns: f64, branch_misses: f64, cpu_cycles: f64) -> TrialResult {
    let sample = Sample {
        elapsed_ns,
        branch_misses,
        cpu_cycles,
    };
    TrialResult::from_samples(name, 1, vec![sample; 3]).unwrap()
}

fn run_of(benchmark: Benchmark, elapsed_ns: f64, cpu_cycles: f64, units: u64) -> BenchRun {
    BenchRun {
        benchmark,
        result: flat_result(benchmark.name(), elapsed_ns, 0.0, cpu_cycles),
        units,
    }
}

fn contrast(sorted_misses: f64, unsorted_misses: f64) -> BranchContrast {
    BranchContrast {
        sorted: flat_result("sorted", 1_000.0, sorted_misses, 3_000.0),
        unsorted: flat_result("unsorted", 6_000.0, unsorted_misses, 18_000.0),
    }
}

/// Synthetic measurements for every benchmark a plan allows.
fn measurements_for(plan: &BenchmarkPlan, branch: BranchContrast) -> Measurements {
    let mut runs = vec![run_of(Benchmark::MutexAccess, 20.0, 60.0, 1)];
    for &(benchmark, size) in &plan.cache_levels {
        let slots = (size / SLOT_SIZE) as u64;
        runs.push(run_of(benchmark, slots as f64, 3.0 * slots as f64, slots));
    }
    runs.push(run_of(Benchmark::MemoryRandomAccess, 9e9, 2.7e10, 1 << 25));
    runs.push(run_of(Benchmark::MemoryCopy1MiB, 2.56e7, 7.68e7, 256));
    if plan.disk {
        for benchmark in [
            Benchmark::Fwrite1MiBToDisk,
            Benchmark::FseekFromDisk,
            Benchmark::Fread1MiBFromDisk,
        ] {
            runs.push(run_of(benchmark, 2.56e8, 7.68e8, 256));
        }
    }
    Measurements {
        runs,
        branch: Some(branch),
    }
}

/// Pipeline over a host with no L2 reported, plenty of disk space and no
/// hardware counters, writing its disk file into `dir`.
fn small_pipeline(dir: &Path, cancel: CancelFlag) -> Pipeline {
    let snapshot =
        CapabilitySnapshot::from_report(report_with(32 * KIB, 0, 8 * MIB, 4, 2 * GIB));
    let settings = Settings {
        epochs: 1,
        min_epoch_time: Duration::from_micros(100),
        disk_dir: dir.to_path_buf(),
        verbose: false,
    };
    let engine = TrialEngine::new(Box::new(NullCounters), cancel);
    Pipeline::new(&snapshot, settings, engine).unwrap()
}

fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

/// Length of the cycle through `start`, or `None` if it is not back at
/// `start` after `limit` steps.
fn cycle_length(set: &WorkingSet, start: usize, limit: usize) -> Option<usize> {
    let mut slot = start;
    for step in 1..=limit {
        slot = set.next(slot);
        if slot == start {
            return Some(step);
        }
    }
    None
}

// capability probe

#[test]
fn large_working_set_clamps_huge_l3_to_one_gib() {
    assert_eq!(probe::large_working_set_size(64 * 1024 * MIB, 1), MAX_LARGE_WORKING_SET);
    assert_eq!(probe::large_working_set_size(usize::MAX, 64), MAX_LARGE_WORKING_SET);
}

#[test]
fn large_working_set_clamps_missing_l3_to_256_mib() {
    assert_eq!(probe::large_working_set_size(0, 1), MIN_LARGE_WORKING_SET);
}

#[test]
fn large_working_set_stays_in_bounds() {
    for l3 in [0, MIB, 8 * MIB, 32 * MIB, 96 * MIB, 512 * MIB] {
        for cores in [1, 2, 4, 16, 128] {
            let size = probe::large_working_set_size(l3, cores);
            assert!((MIN_LARGE_WORKING_SET..=MAX_LARGE_WORKING_SET).contains(&size));
        }
    }
    assert_eq!(probe::large_working_set_size(32 * MIB, 12), 384 * MIB);
}

#[test]
fn zero_cache_sizes_are_kept_as_zero() {
    let snapshot = CapabilitySnapshot::from_report(report_with(0, 0, 0, 8, 0));

    assert_eq!((snapshot.l1_size, snapshot.l2_size, snapshot.l3_size), (0, 0, 0));
    assert_eq!(snapshot.large_working_set_size, MIN_LARGE_WORKING_SET);
}

#[test]
fn disk_needs_strictly_more_space_than_working_set() {
    let mut snapshot = typical_snapshot();

    snapshot.disk_available_bytes = snapshot.large_working_set_size as u64;
    assert!(!snapshot.disk_benchmarks_enabled());

    snapshot.disk_available_bytes += 1;
    assert!(snapshot.disk_benchmarks_enabled());
}

#[test]
fn probe_is_stable_apart_from_disk_space() {
    let dir = std::env::temp_dir();
    let first = CapabilitySnapshot::probe(&dir);
    let second = CapabilitySnapshot::probe(&dir);

    assert_eq!(
        CapabilitySnapshot {
            disk_available_bytes: 0,
            ..first
        },
        CapabilitySnapshot {
            disk_available_bytes: 0,
            ..second
        }
    );
    assert!(first.core_count >= 1);
}

// pointer-chase working set

#[test]
fn working_set_is_a_single_cycle() {
    let mut rng = SmallRng::seed_from_u64(7);
    for n in [1, 2, 3, 5, 64, 1000, 4096] {
        let set = WorkingSet::build_with_rng(n * SLOT_SIZE, &mut rng).unwrap();
        assert_eq!(set.len(), n);

        for start in [0, n / 2, n - 1] {
            assert_eq!(cycle_length(&set, start, n), Some(n), "n = {n}, start = {start}");
        }
    }
}

#[test]
fn chase_visits_every_slot_once() {
    let mut rng = SmallRng::seed_from_u64(11);
    let set = WorkingSet::build_with_rng(10_000 * SLOT_SIZE, &mut rng).unwrap();

    let mut seen = HashSet::new();
    let mut slot = 0;
    for _ in 0..set.len() {
        slot = set.next(slot);
        assert!(seen.insert(slot), "slot {slot} visited twice");
    }
    assert_eq!(seen.len(), set.len());
    assert_eq!(set.chase(), 0);
}

#[test]
fn working_set_is_actually_shuffled() {
    let mut rng = SmallRng::seed_from_u64(3);
    let set = WorkingSet::build_with_rng(4096 * SLOT_SIZE, &mut rng).unwrap();

    let in_order = (0..set.len()).filter(|&i| set.next(i) == (i + 1) % set.len()).count();
    assert!(in_order < set.len() / 10, "{in_order} slots still point forward");
}

#[test]
fn working_set_rounds_down_to_whole_slots() {
    let set = WorkingSet::build(10 * SLOT_SIZE + 3).unwrap();

    assert_eq!(set.len(), 10);
    assert_eq!(set.byte_size(), 10 * SLOT_SIZE);
}

#[test]
fn zero_sized_working_set_is_not_built() {
    assert!(WorkingSet::build(0).is_none());
    assert!(WorkingSet::build(SLOT_SIZE - 1).is_none());
}

#[test]
fn payload_keeps_working_set_bytes() {
    let set = WorkingSet::build(128 * SLOT_SIZE).unwrap();
    let successor_of_zero = set.next(0);
    let payload = set.into_payload();

    assert_eq!(payload.len(), 128 * SLOT_SIZE);
    let first = &payload.as_bytes()[..SLOT_SIZE];
    assert_eq!(usize::from_ne_bytes(first.try_into().unwrap()), successor_of_zero);
}

// branch contrast

#[test]
fn branch_sequence_is_centred_on_zero() {
    let sequence = BranchSequence::sorted(10);
    assert_eq!(sequence.values(), &[-5, -4, -3, -2, -1, 0, 1, 2, 3, 4]);

    let odd = BranchSequence::sorted(5);
    assert_eq!(odd.values(), &[-2, -1, 0, 1, 2]);
}

#[test]
fn branch_sequence_length_uses_larger_bound() {
    assert_eq!(BranchSequence::len_for(8 * MIB, 256 * MIB), 64 * MIB);
    assert_eq!(BranchSequence::len_for(512 * MIB, 256 * MIB), 512 * MIB);
    assert_eq!(BranchSequence::len_for(0, 256 * MIB), 64 * MIB);
}

#[test]
fn shuffle_keeps_values_and_filter_result() {
    let mut sequence = BranchSequence::sorted(1000);
    assert_eq!(sequence.positive_only(), 499);

    sequence.shuffle_with_rng(&mut SmallRng::seed_from_u64(5));
    let mut values = sequence.values().to_vec();
    assert_ne!(values, BranchSequence::sorted(1000).values());

    values.sort_unstable();
    assert_eq!(values, BranchSequence::sorted(1000).values());
}

#[test]
fn penalty_is_secant_slope() {
    let penalty = contrast(10.0, 510.0).penalty();

    assert_eq!(penalty.nanos, 10.0);
    assert_eq!(penalty.cycles, 30.0);
    assert!(penalty.cycles_reliable());
}

#[test]
fn equal_branch_misses_give_non_finite_penalty() {
    let penalty = contrast(250.0, 250.0).penalty();

    assert!(!penalty.nanos.is_finite());
    assert!(!penalty.cycles.is_finite());
    assert!(!penalty.cycles_reliable());
}

// lock and copy

#[test]
fn locked_counter_increments() {
    let counter = LockedCounter::new();
    assert_eq!(counter.increment(), 1);
    assert_eq!(counter.increment(), 2);
}

#[test]
fn block_copier_counts_whole_blocks() {
    let source: Vec<u8> = (0..(3 * MIB + 10)).map(|i| (i % 251) as u8).collect();
    let mut copier = BlockCopier::new(&source);

    assert_eq!(copier.blocks(), 3);
    // last chunk is the 10-byte tail starting at 3 MiB
    assert_eq!(copier.copy_all(), source[3 * MIB]);
}

#[test]
fn block_copier_copies_every_block() {
    let source: Vec<u8> = (0..(4 * MIB)).map(|i| (i / MIB) as u8 + 1).collect();
    let mut copier = BlockCopier::new(&source);

    assert_eq!(copier.blocks(), 4);
    assert_eq!(copier.copy_all(), 4);
    assert_eq!(copier.copy_all(), 4);
}

// disk

#[test]
fn disk_passes_cover_whole_file() {
    let dir = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0..(2 * MIB + MIB / 2)).map(|i| (i % 253) as u8).collect();
    let file = DiskFile::create_in(dir.path()).unwrap();

    assert_eq!(file.write_payload(&payload).unwrap(), payload.len());
    assert_eq!(file.size().unwrap(), payload.len() as u64);
    assert_eq!(file.blocks().unwrap(), 2);
    assert_eq!(file.seek_blocks().unwrap(), 2 * MIB as u64);
    assert_eq!(file.read_blocks().unwrap(), payload[2 * MIB]);
}

#[test]
fn disk_file_is_removed_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let file = DiskFile::create_in(dir.path()).unwrap();
    file.write_payload(&[1, 2, 3]).unwrap();
    let path = file.path().to_path_buf();
    assert!(path.exists());
    assert!(
        path.file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("deleteme")
    );

    drop(file);
    assert!(!path.exists());
}

#[test]
fn disk_read_of_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let file = DiskFile::create_in(dir.path()).unwrap();
    std::fs::remove_file(file.path()).unwrap();

    assert!(file.read_blocks().is_err());
    assert!(file.seek_blocks().is_err());
}

// planning and aggregation

#[test]
fn plan_skips_unreported_cache_level() {
    let snapshot =
        CapabilitySnapshot::from_report(report_with(32 * KIB, 0, 8 * MIB, 4, 2 * GIB));
    let plan = BenchmarkPlan::from_snapshot(&snapshot);

    let levels: Vec<Benchmark> = plan.cache_levels.iter().map(|&(b, _)| b).collect();
    assert_eq!(levels, vec![Benchmark::L1RandomAccess, Benchmark::L3RandomAccess]);
    assert!(plan.cache_levels.iter().all(|&(_, size)| size > 0));

    let figures = report::aggregate(&measurements_for(&plan, contrast(10.0, 510.0)));
    assert!(
        figures
            .iter()
            .all(|f| f.benchmark != Benchmark::L2RandomAccess)
    );
}

#[test]
fn plan_disables_disk_at_exact_boundary() {
    let snapshot =
        CapabilitySnapshot::from_report(report_with(32 * KIB, 256 * KIB, 8 * MIB, 4, 256 << 20));
    let plan = BenchmarkPlan::from_snapshot(&snapshot);
    assert!(!plan.disk);

    let figures = report::aggregate(&measurements_for(&plan, contrast(10.0, 510.0)));
    assert!(figures.iter().all(|f| !f.benchmark.is_disk()));
}

#[test]
fn typical_host_reports_every_figure() {
    let snapshot = typical_snapshot();
    assert_eq!(snapshot.large_working_set_size, 256 * MIB);

    let plan = BenchmarkPlan::from_snapshot(&snapshot);
    assert_eq!(plan.cache_levels.len(), 3);
    assert_eq!(plan.memory_size, 256 * MIB);
    assert!(plan.disk);

    let figures = report::aggregate(&measurements_for(&plan, contrast(10.0, 510.0)));
    let disk = figures.iter().filter(|f| f.benchmark.is_disk()).count();
    let penalty = figures
        .iter()
        .filter(|f| f.benchmark == Benchmark::BranchMissPenalty)
        .count();

    assert_eq!(figures.len(), 10);
    assert_eq!(figures.len() - disk - penalty, 6);
    assert_eq!(disk, 3);
    assert_eq!(penalty, 1);
}

#[test]
fn figures_follow_report_order() {
    let plan = BenchmarkPlan::from_snapshot(&typical_snapshot());
    let figures = report::aggregate(&measurements_for(&plan, contrast(10.0, 510.0)));

    let names: Vec<&str> = figures.iter().map(|f| f.name()).collect();
    assert_eq!(
        names,
        vec![
            "L1_random_access",
            "L2_random_access",
            "L3_random_access",
            "memory_random_access",
            "branch_miss_penalty",
            "mutex_access",
            "fseek_from_disk",
            "memory_copy_1MiB",
            "fread_1MiB_from_disk",
            "fwrite_1MiB_to_disk",
        ]
    );
}

#[test]
fn figures_are_normalised_per_unit() {
    let plan = BenchmarkPlan::from_snapshot(&typical_snapshot());
    let figures = report::aggregate(&measurements_for(&plan, contrast(10.0, 510.0)));
    let find = |b: Benchmark| figures.iter().find(|f| f.benchmark == b).unwrap();

    let l1 = find(Benchmark::L1RandomAccess);
    assert_eq!(l1.nanos_per_unit, 1.0);
    assert_eq!(l1.cycles_per_unit, Some(3.0));

    let copy = find(Benchmark::MemoryCopy1MiB);
    assert_eq!(copy.nanos_per_unit, 1e5);

    let mutex = find(Benchmark::MutexAccess);
    assert_eq!(mutex.nanos_per_unit, 20.0);

    let penalty = find(Benchmark::BranchMissPenalty);
    assert_eq!(penalty.nanos_per_unit, 10.0);
    assert_eq!(penalty.cycles_per_unit, Some(30.0));
}

#[test]
fn unreliable_penalty_suppresses_all_cycles() {
    let plan = BenchmarkPlan::from_snapshot(&typical_snapshot());
    let figures = report::aggregate(&measurements_for(&plan, contrast(250.0, 250.0)));

    assert_eq!(figures.len(), 10);
    assert!(figures.iter().all(|f| f.cycles_per_unit.is_none()));

    let rendered = report::render_figures(&figures);
    assert!(!rendered.contains("cycles"));
    assert_eq!(rendered.lines().count(), 11);
}

#[test]
fn rendered_report_has_cycles_column_when_valid() {
    let plan = BenchmarkPlan::from_snapshot(&typical_snapshot());
    let figures = report::aggregate(&measurements_for(&plan, contrast(10.0, 510.0)));
    let rendered = report::render_figures(&figures);

    let header = rendered.lines().next().unwrap();
    assert!(header.contains("cycles"));
    let mutex_line = rendered
        .lines()
        .find(|l| l.starts_with("mutex_access"))
        .unwrap();
    assert_eq!(mutex_line.split_whitespace().collect::<Vec<_>>(), ["mutex_access", "20.0", "60.0"]);
}

#[test]
fn aggregation_is_repeatable() {
    let plan = BenchmarkPlan::from_snapshot(&typical_snapshot());
    let measurements = measurements_for(&plan, contrast(10.0, 510.0));

    assert_eq!(report::aggregate(&measurements), report::aggregate(&measurements));
}

// pipeline

#[test]
fn pipeline_runs_every_planned_benchmark() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = small_pipeline(dir.path(), CancelFlag::new());

    let measurements = pipeline.run().unwrap();

    let units: Vec<(Benchmark, u64)> = measurements
        .runs
        .iter()
        .map(|run| (run.benchmark, run.units))
        .collect();
    assert_eq!(
        units,
        vec![
            (Benchmark::MutexAccess, 1),
            (Benchmark::L1RandomAccess, (32 * KIB / SLOT_SIZE) as u64),
            (Benchmark::L3RandomAccess, (8 * MIB / SLOT_SIZE) as u64),
            (Benchmark::MemoryRandomAccess, (256 * MIB / SLOT_SIZE) as u64),
            (Benchmark::MemoryCopy1MiB, 256),
            (Benchmark::Fwrite1MiBToDisk, 256),
            (Benchmark::FseekFromDisk, 256),
            (Benchmark::Fread1MiBFromDisk, 256),
        ]
    );
    assert!(measurements.runs.iter().all(|run| run.result.samples().len() == 1));
    assert!(measurements.branch.is_some());

    // null counters: the cycle penalty is 0/0, so no figure carries cycles
    let figures = report::aggregate(&measurements);
    assert_eq!(figures.len(), 9);
    assert!(figures.iter().all(|f| f.cycles_per_unit.is_none()));

    assert_eq!(dir_entries(dir.path()), 0);
}

#[test]
fn cancelled_pipeline_stops_without_leaving_files() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelFlag::new();
    let mut pipeline = small_pipeline(dir.path(), cancel.clone());

    cancel.cancel();
    let result = pipeline.run();

    assert!(matches!(
        result,
        Err(NumbersError::Trial(TrialError::Interrupted { .. }))
    ));
    assert_eq!(dir_entries(dir.path()), 0);
}

#[test]
fn help_text_names_working_set_sizes() {
    let text = describe(&typical_snapshot());

    assert!(text.contains("L1: 32 KiB; L2: 256 KiB; L3: 8 MiB; \"memory\": 256 MiB."));
    assert!(text.contains("over a 256 MiB file"));
}
