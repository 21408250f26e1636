//! Random sampling helpers.

use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic RNG for a clustering call.
pub fn rng_from_seed(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Draw `size` distinct positions from `0..len`, returned ascending.
///
/// `size` is clamped to `len`.
pub fn sample_without_replacement<R: Rng + ?Sized>(len: usize, size: usize, rng: &mut R) -> Vec<usize> {
    let size = size.min(len);
    let mut picked = index::sample(rng, len, size).into_vec();
    picked.sort_unstable();
    picked
}

/// Sample size for a pool of `len` at `ratio`, at least one when non-empty.
#[inline]
pub fn sample_size(len: usize, ratio: f64) -> usize {
    if len == 0 {
        return 0;
    }
    ((len as f64 * ratio).round() as usize).clamp(1, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_is_sorted_and_distinct() {
        let mut rng = rng_from_seed(7);
        let s = sample_without_replacement(100, 66, &mut rng);
        assert_eq!(s.len(), 66);
        assert!(s.windows(2).all(|w| w[0] < w[1]));
        assert!(s.iter().all(|&i| i < 100));
    }

    #[test]
    fn test_sample_clamps_size() {
        let mut rng = rng_from_seed(7);
        assert_eq!(sample_without_replacement(3, 10, &mut rng), vec![0, 1, 2]);
        assert!(sample_without_replacement(0, 10, &mut rng).is_empty());
    }

    #[test]
    fn test_same_seed_same_sample() {
        let a = sample_without_replacement(50, 10, &mut rng_from_seed(1));
        let b = sample_without_replacement(50, 10, &mut rng_from_seed(1));
        assert_eq!(a, b);
    }

    #[test]
    fn test_sample_size() {
        assert_eq!(sample_size(0, 0.66), 0);
        assert_eq!(sample_size(1, 0.01), 1);
        assert_eq!(sample_size(100, 0.66), 66);
        assert_eq!(sample_size(10, 1.0), 10);
    }
}
