//! Scrum master succession.

use common::types::UserId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

/// Chooses a new role holder when the current one departs.
///
/// Candidates are sorted before selection so a seeded policy picks the same
/// successor for the same participant set regardless of map order.
#[derive(Debug)]
pub struct SuccessorPolicy {
    rng: Mutex<StdRng>,
}

impl SuccessorPolicy {
    /// Deterministic policy for a fixed seed; entropy-seeded otherwise.
    #[must_use]
    pub fn from_seed(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Pick one of `candidates` uniformly, or `None` if there are none.
    pub fn choose(&self, candidates: &[UserId]) -> Option<UserId> {
        if candidates.is_empty() {
            return None;
        }
        let mut sorted = candidates.to_vec();
        sorted.sort();
        let index = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0..sorted.len());
        sorted.get(index).copied()
    }
}

impl Default for SuccessorPolicy {
    fn default() -> Self {
        Self::from_seed(None)
    }
}
