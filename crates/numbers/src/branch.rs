// Branch misprediction penalty from a sorted/unsorted contrast.
//
// The same filter runs over the same values twice: once sorted, where the
// `> 0` branch flips exactly once, and once shuffled, where it is a coin
// toss. The extra time per extra miss is the penalty.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::hint::black_box;
use trial_bench::TrialResult;

/// Integers centred on zero, `[-len/2, len - len/2)`, in ascending order.
#[derive(Debug)]
pub struct BranchSequence {
    values: Vec<i32>,
}

impl BranchSequence {
    /// Element count: `max(l3_size, large_working_set_size / size_of::<i32>())`.
    pub fn len_for(l3_size: usize, large_working_set_size: usize) -> usize {
        l3_size.max(large_working_set_size / std::mem::size_of::<i32>())
    }

    pub fn sorted(len: usize) -> Self {
        let start = -((len / 2) as i64);
        let values = (0..len)
            .into_par_iter()
            .map(|i| (start + i as i64) as i32)
            .collect();
        Self { values }
    }

    pub fn shuffle(&mut self) {
        let mut rng = SmallRng::from_rng(&mut rand::rng());
        self.shuffle_with_rng(&mut rng);
    }

    pub fn shuffle_with_rng<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.values.shuffle(rng);
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    /// One pass with a single data-dependent branch per element; returns the
    /// last positive value seen.
    #[inline(never)]
    pub fn positive_only(&self) -> i32 {
        let mut last = 0;
        for &x in &self.values {
            if x > 0 {
                // the opaque store keeps this a real branch, not a select
                last = black_box(x);
            }
        }
        last
    }
}

/// The two runs of the contrast benchmark.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchContrast {
    pub sorted: TrialResult,
    pub unsorted: TrialResult,
}

/// Cost of one mispredicted branch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchPenalty {
    pub nanos: f64,
    pub cycles: f64,
}

impl BranchPenalty {
    /// Cycle-denominated figures can only be trusted when the cycle penalty
    /// is an ordinary non-zero number.
    pub fn cycles_reliable(&self) -> bool {
        self.cycles.is_normal()
    }
}

impl BranchContrast {
    /// Secant slope between the sorted (near zero misses) and unsorted runs,
    /// on whole-pass totals.
    ///
    /// Equal miss counts, or a host without a miss counter, give a
    /// non-finite result.
    pub fn penalty(&self) -> BranchPenalty {
        let delta_misses =
            self.unsorted.median_branch_misses() - self.sorted.median_branch_misses();
        let delta_nanos = self.unsorted.median_elapsed_ns() - self.sorted.median_elapsed_ns();
        let delta_cycles = self.unsorted.median_cpu_cycles() - self.sorted.median_cpu_cycles();

        BranchPenalty {
            nanos: delta_nanos / delta_misses,
            cycles: delta_cycles / delta_misses,
        }
    }
}
