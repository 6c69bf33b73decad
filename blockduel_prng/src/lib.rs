// Seeded random streams shared by both peers of a match.
//
// The relay hands each peer two seeds; each side builds the same `GameRng`
// streams from them, so the piece order and garbage holes for a board come
// out the same on both machines. The core is xoshiro256++ (Blackman & Vigna,
// 2019); a seed is expanded into the 256-bit state with SplitMix64.
//
// Every method must stay integer-only and platform-independent: a single
// differing draw desynchronizes the two copies of a board.

use serde::{Deserialize, Serialize};

/// One deterministic stream. A clone continues from the same position, and
/// so does a serde round-trip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRng {
    s: [u64; 4],
}

impl GameRng {
    /// Stream for `seed`. Equal seeds always give equal streams.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Derive an independent stream from `seed` and a fixed `salt`.
    ///
    /// Used where one match seed has to drive two unrelated streams (piece
    /// order and garbage holes) without one perturbing the other.
    pub fn with_salt(seed: u64, salt: u64) -> Self {
        let mut sm = seed ^ salt.rotate_left(32);
        Self::new(splitmix64(&mut sm))
    }

    /// Advance the stream by one word.
    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Uniform draw from `low..high`, unbiased (rejection sampling).
    /// `low` must be below `high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "empty range {low}..{high}");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1));
        }
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    /// `range_u64` for indices.
    pub fn range_usize(&mut self, low: usize, high: usize) -> usize {
        self.range_u64(low as u64, high as u64) as usize
    }

    /// Pick an index into `weights` with probability proportional to its
    /// weight. Zero-weight entries are never chosen.
    ///
    /// Returns `None` when the slice is empty or every weight is zero.
    pub fn pick_weighted(&mut self, weights: &[u32]) -> Option<usize> {
        let total: u64 = weights.iter().map(|&w| u64::from(w)).sum();
        if total == 0 {
            return None;
        }
        let mut roll = self.range_u64(0, total);
        for (index, &weight) in weights.iter().enumerate() {
            let weight = u64::from(weight);
            if roll < weight {
                return Some(index);
            }
            roll -= weight;
        }
        None
    }
}

/// SplitMix64 step. Only used to fill the initial state.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_seeds_give_equal_streams() {
        let mut host = GameRng::new(0xB10C);
        let mut guest = GameRng::new(0xB10C);
        let a: Vec<u64> = (0..500).map(|_| host.next_u64()).collect();
        let b: Vec<u64> = (0..500).map(|_| guest.next_u64()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn neighbouring_seeds_diverge() {
        let first: Vec<u64> = {
            let mut rng = GameRng::new(1);
            (0..4).map(|_| rng.next_u64()).collect()
        };
        let second: Vec<u64> = {
            let mut rng = GameRng::new(2);
            (0..4).map(|_| rng.next_u64()).collect()
        };
        assert_ne!(first, second);
    }

    #[test]
    fn salted_stream_differs_from_plain_stream() {
        let mut plain = GameRng::new(7);
        let mut salted = GameRng::with_salt(7, 0x6761_7262);
        assert_ne!(plain.next_u64(), salted.next_u64());

        let mut again = GameRng::with_salt(7, 0x6761_7262);
        let mut salted = GameRng::with_salt(7, 0x6761_7262);
        assert_eq!(again.next_u64(), salted.next_u64());
    }

    #[test]
    fn ranged_draws_stay_in_bounds() {
        let mut rng = GameRng::new(31);
        let mut seen = [false; 10];
        for _ in 0..5_000 {
            let odd = rng.range_u64(3, 10);
            assert!((3..10).contains(&odd), "{odd} outside 3..10");
            let col = rng.range_usize(0, 10);
            seen[col] = true;
        }
        assert!(seen.iter().all(|&s| s), "some column never drawn: {seen:?}");
    }

    #[test]
    #[should_panic(expected = "empty range")]
    fn empty_range_panics() {
        GameRng::new(0).range_u64(4, 4);
    }

    #[test]
    fn pick_weighted_skips_zero_weights() {
        let mut rng = GameRng::new(3);
        for _ in 0..1_000 {
            let picked = rng.pick_weighted(&[0, 5, 0, 1]).unwrap();
            assert!(picked == 1 || picked == 3, "picked zero-weight index {picked}");
        }
    }

    #[test]
    fn pick_weighted_empty_or_all_zero() {
        let mut rng = GameRng::new(3);
        assert_eq!(rng.pick_weighted(&[]), None);
        assert_eq!(rng.pick_weighted(&[0, 0, 0]), None);
    }

    #[test]
    fn pick_weighted_roughly_proportional() {
        let mut rng = GameRng::new(11);
        let mut counts = [0u32; 2];
        for _ in 0..10_000 {
            counts[rng.pick_weighted(&[1, 3]).unwrap()] += 1;
        }
        // Expect ~25% / ~75%.
        let share = f64::from(counts[1]) / 10_000.0;
        assert!((0.70..0.80).contains(&share), "heavy share was {share}");
    }

    #[test]
    fn restored_stream_resumes_where_it_left_off() {
        let mut rng = GameRng::new(64);
        rng.range_usize(0, 7);
        rng.range_usize(0, 7);
        let saved = serde_json::to_string(&rng).unwrap();
        let mut restored: GameRng = serde_json::from_str(&saved).unwrap();
        assert_eq!(restored, rng);
        let expected: Vec<usize> = (0..20).map(|_| rng.range_usize(0, 7)).collect();
        let actual: Vec<usize> = (0..20).map(|_| restored.range_usize(0, 7)).collect();
        assert_eq!(actual, expected);
    }
}
