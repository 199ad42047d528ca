//! Deterministic Random Number Generator
//!
//! Xorshift128+ seeded through SplitMix64. The authority uses it for the
//! lineup shuffle and, in server-dice mode, for every d20 it rolls, so a seed
//! plus the accepted command log reproduces a game exactly.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Determinism Guarantee
///
/// Given the same seed, this RNG will produce the exact same sequence
/// of random numbers on any platform.
///
/// # Example
///
/// ```
/// use dugout::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.roll_die(20), b.roll_die(20));
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Simple modulo - slight bias for very large max, irrelevant for dice
        (self.next_u64() % max as u64) as u32
    }

    /// Roll a die with `sides` faces, returning a value in [1, sides].
    ///
    /// A zero-sided die always rolls 0.
    #[inline]
    pub fn roll_die(&mut self, sides: u8) -> u8 {
        if sides == 0 {
            return 0;
        }
        (self.next_int(sides as u32) + 1) as u8
    }

    /// Shuffle a slice in place using Fisher-Yates algorithm.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let len = slice.len();
        for i in (1..len).rev() {
            let j = self.next_int((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a game seed from the game id and its participants.
///
/// `participant_ids` MUST be sorted by the caller; the same game id and
/// participant set always produce the same seed.
pub fn derive_game_seed(game_id: &[u8; 16], participant_ids: &[[u8; 16]]) -> u64 {
    let mut hasher = Sha256::new();

    hasher.update(b"DUGOUT_SEED_V1");
    hasher.update(game_id);
    for pid in participant_ids {
        hasher.update(pid);
    }

    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(seed)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(54321);

        let a: Vec<u64> = (0..4).map(|_| rng1.next_u64()).collect();
        let b: Vec<u64> = (0..4).map(|_| rng2.next_u64()).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn test_next_int() {
        let mut rng = DeterministicRng::new(1234);

        for _ in 0..1000 {
            assert!(rng.next_int(100) < 100);
        }

        assert_eq!(rng.next_int(0), 0);
        assert_eq!(rng.next_int(1), 0);
    }

    #[test]
    fn test_roll_die_covers_all_faces() {
        let mut rng = DeterministicRng::new(2024);
        let mut seen = [false; 21];

        for _ in 0..4000 {
            let roll = rng.roll_die(20);
            assert!((1..=20).contains(&roll));
            seen[roll as usize] = true;
        }

        assert!(seen[1..].iter().all(|s| *s), "every face should come up");
        assert_eq!(rng.roll_die(0), 0);
    }

    #[test]
    fn test_shuffle_determinism() {
        let mut rng1 = DeterministicRng::new(1111);
        let mut rng2 = DeterministicRng::new(1111);

        let mut arr1 = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let mut arr2 = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

        rng1.shuffle(&mut arr1);
        rng2.shuffle(&mut arr2);

        assert_eq!(arr1, arr2);

        // Still a permutation
        let mut sorted = arr1;
        sorted.sort();
        assert_eq!(sorted, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_derive_game_seed() {
        let game_id = [1u8; 16];
        let participants = [[2u8; 16], [3u8; 16]];

        let seed1 = derive_game_seed(&game_id, &participants);
        let seed2 = derive_game_seed(&game_id, &participants);
        assert_eq!(seed1, seed2);

        let seed3 = derive_game_seed(&[99u8; 16], &participants);
        assert_ne!(seed1, seed3);
    }
}
