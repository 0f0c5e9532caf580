// Lock and bulk-copy operations.

use crate::probe::MIB;
use std::hint::black_box;
use std::sync::{Mutex, PoisonError};

/// Uncontended lock, increment, unlock on a counter owned by the benchmark.
#[derive(Debug, Default)]
pub struct LockedCounter {
    value: Mutex<u64>,
}

impl LockedCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value after incrementing.
    pub fn increment(&self) -> u64 {
        let mut guard = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += 1;
        *guard
    }
}

/// Copies a source buffer 1 MiB at a time into a destination it owns.
#[derive(Debug)]
pub struct BlockCopier<'a> {
    source: &'a [u8],
    block: Vec<u8>,
}

impl<'a> BlockCopier<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self {
            source,
            block: vec![0; MIB],
        }
    }

    /// Number of whole 1 MiB blocks, the per-block denominator.
    pub fn blocks(&self) -> usize {
        self.source.len() / MIB
    }

    /// One pass over the whole source; returns the first byte of the last
    /// block copied. Every block is observed before the next overwrites it.
    pub fn copy_all(&mut self) -> u8 {
        for chunk in self.source.chunks(MIB) {
            self.block[..chunk.len()].copy_from_slice(chunk);
            black_box(&self.block);
        }
        self.block[0]
    }
}
