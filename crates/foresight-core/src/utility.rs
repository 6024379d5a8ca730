//! Expected Utility scoring contract
//!
//! ```text
//! EU = (benefit * pU - fp_cost * pFP - fn_cost * pFN) * (decay / 10)
//! ```
//!
//! Magnitudes live in `[0, 10]`, probabilities in `[0, 1]`. Out-of-range
//! inputs are clamped and non-finite inputs fall back to the neutral value of
//! the same field, so the result is always a finite, deterministic number.

use serde::{Deserialize, Serialize};

/// Maximum number of suggestions in one batch
pub const MAX_BATCH_SIZE: usize = 5;

/// Expected utility assigned when the scoring pass fails as a whole
pub const FALLBACK_EXPECTED_UTILITY: f64 = 5.0;

/// Probability of usefulness assigned when the scoring pass fails as a whole
pub const FALLBACK_PROBABILITY_USEFUL: f64 = 0.5;

/// Per-candidate inputs to the Expected Utility formula
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilityScore {
    pub benefit: f64,
    pub false_positive_cost: f64,
    pub false_negative_cost: f64,
    pub decay: f64,
    pub probability_useful: f64,
    pub probability_false_positive: f64,
    pub probability_false_negative: f64,
}

impl UtilityScore {
    /// Used for any candidate (or field) the scoring pass leaves out
    pub const NEUTRAL: UtilityScore = UtilityScore {
        benefit: 5.0,
        false_positive_cost: 3.0,
        false_negative_cost: 4.0,
        decay: 5.0,
        probability_useful: 0.5,
        probability_false_positive: 0.2,
        probability_false_negative: 0.3,
    };

    /// Clamp every field into its domain.
    pub fn clamped(self) -> Self {
        let n = Self::NEUTRAL;
        Self {
            benefit: clamp_or(self.benefit, 0.0, 10.0, n.benefit),
            false_positive_cost: clamp_or(self.false_positive_cost, 0.0, 10.0, n.false_positive_cost),
            false_negative_cost: clamp_or(self.false_negative_cost, 0.0, 10.0, n.false_negative_cost),
            decay: clamp_or(self.decay, 0.0, 10.0, n.decay),
            probability_useful: clamp_or(self.probability_useful, 0.0, 1.0, n.probability_useful),
            probability_false_positive: clamp_or(
                self.probability_false_positive,
                0.0,
                1.0,
                n.probability_false_positive,
            ),
            probability_false_negative: clamp_or(
                self.probability_false_negative,
                0.0,
                1.0,
                n.probability_false_negative,
            ),
        }
    }

    /// Expected utility of this score (clamped first)
    pub fn expected_utility(&self) -> f64 {
        expected_utility(self)
    }
}

impl Default for UtilityScore {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

fn clamp_or(value: f64, lo: f64, hi: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(lo, hi)
    } else {
        fallback
    }
}

/// Pure Expected Utility function.
pub fn expected_utility(score: &UtilityScore) -> f64 {
    let s = score.clamped();
    (s.benefit * s.probability_useful
        - s.false_positive_cost * s.probability_false_positive
        - s.false_negative_cost * s.probability_false_negative)
        * (s.decay / 10.0)
}

/// Stable sort descending by `key`, then keep at most [`MAX_BATCH_SIZE`].
///
/// Ties keep their input order.
pub fn rank_by_utility<T, F>(mut items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> f64,
{
    items.sort_by(|a, b| key(b).total_cmp(&key(a)));
    items.truncate(MAX_BATCH_SIZE);
    items
}
