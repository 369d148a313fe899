//! Pluggable sample-index ordering (spec §5): sequential for evaluation,
//! seeded random for training.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Produces the full ordering of sample indices for one epoch.
pub trait Sampler: Send {
    fn indices(&mut self, dataset_len: usize) -> Vec<usize>;
}

/// `0, 1, 2, ..., dataset_len-1`.
pub struct SequentialSampler;

impl Sampler for SequentialSampler {
    fn indices(&mut self, dataset_len: usize) -> Vec<usize> {
        (0..dataset_len).collect()
    }
}

/// A fixed-seed shuffle, recorded by the dataloader alongside its run
/// record so an epoch's ordering is reproducible (spec §5).
pub struct RandomSampler {
    seed: u64,
}

impl RandomSampler {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Sampler for RandomSampler {
    fn indices(&mut self, dataset_len: usize) -> Vec<usize> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut order: Vec<usize> = (0..dataset_len).collect();
        order.shuffle(&mut rng);
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_sampler_is_identity_order() {
        let mut s = SequentialSampler;
        assert_eq!(s.indices(5), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn random_sampler_is_deterministic_for_a_fixed_seed() {
        let mut a = RandomSampler::new(42);
        let mut b = RandomSampler::new(42);
        assert_eq!(a.indices(20), b.indices(20));
    }

    #[test]
    fn random_sampler_is_a_permutation() {
        let mut s = RandomSampler::new(7);
        let mut order = s.indices(10);
        order.sort_unstable();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }
}
