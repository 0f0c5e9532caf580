// Randomised pointer-chasing working sets.
//
// A working set is a buffer of pointer-sized slots, each holding the index
// of the next slot to visit. The successor relation forms one cycle through
// every slot in random order, so a traversal touches all of them exactly
// once and every load address depends on the previous load.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

pub const SLOT_SIZE: usize = std::mem::size_of::<usize>();

#[derive(Debug)]
pub struct WorkingSet {
    slots: Vec<usize>,
}

impl WorkingSet {
    /// Working set of `byte_size / SLOT_SIZE` slots, shuffled from a
    /// non-deterministic seed.
    ///
    /// `None` when `byte_size` holds no slot at all, which is how an
    /// unreported cache level arrives here.
    pub fn build(byte_size: usize) -> Option<Self> {
        let mut rng = SmallRng::from_rng(&mut rand::rng());
        Self::build_with_rng(byte_size, &mut rng)
    }

    /// As [`WorkingSet::build`], drawing the permutation from `rng`.
    pub fn build_with_rng<R: Rng + ?Sized>(byte_size: usize, rng: &mut R) -> Option<Self> {
        let n = byte_size / SLOT_SIZE;
        if n == 0 {
            return None;
        }

        // visiting order: slot labels in random order
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);

        // link the order into one forward cycle; this is the base cycle
        // 0 -> 1 -> .. -> n-1 -> 0 relabelled by `order`, so it stays a
        // single n-cycle
        let mut slots = vec![0usize; n];
        for pair in order.windows(2) {
            slots[pair[0]] = pair[1];
        }
        slots[order[n - 1]] = order[0];

        Some(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.slots.len() * SLOT_SIZE
    }

    /// Successor of `slot`.
    pub fn next(&self, slot: usize) -> usize {
        self.slots[slot]
    }

    /// Follows the chain `len()` times from slot 0 and returns where it ends.
    ///
    /// Each step's address is the value loaded by the step before, so the
    /// loads cannot overlap or be prefetched.
    #[inline(never)]
    pub fn chase(&self) -> usize {
        let mut slot = 0;
        for _ in 0..self.slots.len() {
            slot = self.slots[slot];
        }
        slot
    }

    /// Freezes the working set into the read-only payload shared by the
    /// copy and disk benchmarks.
    pub fn into_payload(self) -> Payload {
        Payload {
            slots: self.slots.into_boxed_slice(),
        }
    }
}

/// Read-only byte view over a former working set.
#[derive(Debug)]
pub struct Payload {
    slots: Box<[usize]>,
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: usize has no padding or invalid bit patterns when viewed as
        // bytes, u8 has alignment 1, and the length covers the same memory.
        unsafe {
            std::slice::from_raw_parts(
                self.slots.as_ptr() as *const u8,
                self.slots.len() * SLOT_SIZE,
            )
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() * SLOT_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
