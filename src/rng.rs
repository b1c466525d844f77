//! Seeded random source shared by the scene generator.
//!
//! A seed string is hashed with SHA-256 and the digest keys a ChaCha8 stream,
//! so any string is a usable seed and the sequence is identical on every
//! platform and in every execution context.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

const SEED_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const GENERATED_SEED_LEN: usize = 22;

/// Deterministic pseudo-random generator keyed by a string.
#[derive(Debug, Clone)]
pub struct SeededRng {
    inner: ChaCha8Rng,
}

impl SeededRng {
    pub fn new(seed: &str) -> Self {
        let digest = Sha256::digest(seed.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self {
            inner: ChaCha8Rng::from_seed(key),
        }
    }

    /// Uniform float in `[0, 1)`.
    pub fn random(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    /// Uniform float in `[lo, hi)`. Returns `lo` when the range is empty
    /// (`hi <= lo`); one draw is consumed either way.
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        let r = self.random();
        if hi <= lo {
            return lo;
        }
        lo + (hi - lo) * r
    }

    /// Integer in `[0, stop)`. The bound may be fractional; a bound of zero
    /// or less yields 0.
    pub fn rand_range(&mut self, stop: f64) -> i64 {
        if stop <= 0.0 || !stop.is_finite() {
            // keep the stream position independent of the bound
            self.random();
            return 0;
        }
        (self.random() * stop).floor() as i64
    }

    /// Integer in `[lo, hi)`. Returns `lo` when the range is empty.
    pub fn rand_range_between(&mut self, lo: i64, hi: i64) -> i64 {
        if hi <= lo {
            self.random();
            return lo;
        }
        self.inner.gen_range(lo..hi)
    }

    /// Uniformly chosen element, `None` for an empty slice.
    pub fn choice<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.inner)
    }
}

/// Generate a fresh random seed string (22 base-36 characters).
pub fn generate_seed() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_SEED_LEN)
        .map(|_| SEED_ALPHABET[rng.gen_range(0..SEED_ALPHABET.len())] as char)
        .collect()
}
