// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic randomness for order-invariance tests.

/// xorshift64* generator; reproducible from its seed.
#[derive(Debug, Clone)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Creates a generator. A zero seed is replaced with 1 (xorshift never
    /// leaves the all-zero state).
    pub fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    /// Next pseudo-random `u64`.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Pseudo-random value in `[0, upper)`; modulo bias is acceptable here.
    pub fn below(&mut self, upper: usize) -> usize {
        if upper <= 1 {
            return 0;
        }
        let upper = upper as u64;
        usize::try_from(self.next_u64() % upper).unwrap_or(0)
    }
}

/// Fisher-Yates shuffle driven by `rng`.
pub fn shuffle<T>(rng: &mut XorShift64, items: &mut [T]) {
    for i in (1..items.len()).rev() {
        let j = rng.below(i + 1);
        items.swap(i, j);
    }
}

/// Seeds every randomized test iterates over.
pub const SEEDS: &[u64] = &[
    0x0000_0000_0000_0001,
    0x1234_5678_9ABC_DEF0,
    0xDEAD_BEEF_CAFE_BABE,
    0xFEED_FACE_0123_4567,
    0x0F0F_0F0F_F0F0_F0F0,
];

/// Worker counts used to show results do not depend on parallelism.
pub const WORKER_COUNTS: &[usize] = &[1, 2, 4, 8, 16];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = XorShift64::new(7);
        let mut b = XorShift64::new(7);
        for _ in 0..16 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut items: Vec<u32> = (0..100).collect();
        shuffle(&mut XorShift64::new(SEEDS[2]), &mut items);
        assert_ne!(items, (0..100).collect::<Vec<_>>());
        items.sort_unstable();
        assert_eq!(items, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn below_stays_in_range() {
        let mut rng = XorShift64::new(0);
        assert_eq!(rng.below(0), 0);
        assert!((0..1000).all(|_| rng.below(5) < 5));
    }
}
