#[cfg(test)]
mod tests;

// top-level library module

pub mod branch;
pub mod disk;
pub mod error;
pub mod ops;
pub mod pipeline;
pub mod probe;
pub mod report;
pub mod working_set;

use probe::{CapabilitySnapshot, KIB, MIB};

/// What each figure means, with this host's working set sizes filled in.
pub fn describe(snapshot: &CapabilitySnapshot) -> String {
    let large_mib = snapshot.large_working_set_size / MIB;

    format!(
        "numbers prints various latencies in nanosecond unit, and in CPU cycles \
         when the branch miss counter is usable.\n\n\
         {{L[123],memory}}_random_access: latency of loading & dereferencing a random pointer\n   \
         from L1: {} KiB; L2: {} KiB; L3: {} MiB; \"memory\": {} MiB.\n   \
         a cache level the host does not report is skipped.\n\
         branch_miss_penalty: latency due to a branch misprediction e.g. `if x > 0`.\n\
         mutex_access: latency of `lock(); += 1; unlock();`.\n\
         memory_copy_1MiB: latency for copying 1 MiB across the RAM.\n\
         f{{seek,read,write}}_..._disk: latency of 1 MiB-unit disk IO over a {} MiB file,\n   \
         run only when the disk has more than that free.\n\n\
         Set RUST_LOG=info (or debug) to follow progress on stderr.",
        snapshot.l1_size / KIB,
        snapshot.l2_size / KIB,
        snapshot.l3_size / MIB,
        large_mib,
        large_mib,
    )
}
