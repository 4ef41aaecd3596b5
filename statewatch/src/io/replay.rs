//! Recorded-history lookup used in replay mode.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::region::Match;

/// Always replay a successful record when one exists.
pub const CERTAIN: u8 = 100;

/// One recorded locate attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub succeeded: bool,
    pub found: Option<Match>,
}

impl ActionRecord {
    pub fn success(found: Match) -> Self {
        Self {
            succeeded: true,
            found: Some(found),
        }
    }

    pub fn failure() -> Self {
        Self {
            succeeded: false,
            found: None,
        }
    }
}

/// Recorded attempts for one anchor, in recording order.
pub type ActionHistory = Vec<ActionRecord>;

/// Produces matches from recorded histories instead of searching the screen.
///
/// Histories are fixed at construction. Selection is uniform among successful
/// records; a per-anchor probability (0..=100) gates whether a match is
/// returned at all.
pub struct ReplayEngine {
    histories: HashMap<String, ActionHistory>,
    probabilities: HashMap<String, u8>,
    default_probability: u8,
    rng: Mutex<StdRng>,
}

impl ReplayEngine {
    pub fn new(histories: HashMap<String, ActionHistory>) -> Self {
        Self {
            histories,
            probabilities: HashMap::new(),
            default_probability: CERTAIN,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Make selection repeatable.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Probability, in percent, used for anchors without an explicit value.
    pub fn with_default_probability(mut self, percent: u8) -> Self {
        self.default_probability = percent.min(CERTAIN);
        self
    }

    pub fn with_probability(mut self, anchor_id: impl Into<String>, percent: u8) -> Self {
        self.probabilities
            .insert(anchor_id.into(), percent.min(CERTAIN));
        self
    }

    pub fn probability(&self, anchor_id: &str) -> u8 {
        self.probabilities
            .get(anchor_id)
            .copied()
            .unwrap_or(self.default_probability)
    }

    /// Pick a recorded match for `anchor_id`.
    ///
    /// Returns `None` when the anchor has no history, no successful record,
    /// or the probability roll fails. Callers treat `None` exactly like a live
    /// NotFound.
    pub fn try_replay(&self, anchor_id: &str) -> Option<Match> {
        let successes: Vec<&Match> = self
            .histories
            .get(anchor_id)?
            .iter()
            .filter(|record| record.succeeded)
            .filter_map(|record| record.found.as_ref())
            .collect();
        if successes.is_empty() {
            return None;
        }

        let probability = self.probability(anchor_id);
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        if probability < CERTAIN && rng.gen_range(0..CERTAIN) >= probability {
            return None;
        }
        let pick = successes[rng.gen_range(0..successes.len())];
        Some(pick.clone())
    }
}
