use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A generator seeded from `base_seed` and whatever identifies the stream in `hash`.
/// `DefaultHasher::new` uses fixed keys, so equal inputs give equal streams across runs.
pub fn get_rnd<H: Hash>(base_seed: u64, hash: H) -> SmallRng {
    let mut hasher = DefaultHasher::new();
    hash.hash(&mut hasher);
    base_seed.hash(&mut hasher);
    let combined_seed = hasher.finish();

    SmallRng::seed_from_u64(combined_seed)
}

/// Random streams of one model step. Every chooser gets its own stream keyed by
/// (base seed, step, chooser id), so a chooser's draws neither depend on which other choosers
/// are in the sample nor on how they are split into chunks.
#[derive(Debug, Clone)]
pub struct RandomChannel {
    base_seed: u64,
    step: String,
}

impl RandomChannel {
    pub fn new(base_seed: u64, step: impl Into<String>) -> Self {
        RandomChannel {
            base_seed,
            step: step.into(),
        }
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn rng_for(&self, chooser_id: i64) -> SmallRng {
        get_rnd(self.base_seed, (self.step.as_str(), chooser_id))
    }
}
