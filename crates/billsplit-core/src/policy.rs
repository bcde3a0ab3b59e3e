// Percentage policy: how out-of-range percentages are treated on update.

use serde::{Deserialize, Serialize};

/// Lower bound of a single participant's share, in percent.
pub const MIN_PERCENTAGE: f64 = 0.0;

/// Upper bound of a single participant's share, in percent.
pub const MAX_PERCENTAGE: f64 = 100.0;

/// What the ledger does with a percentage outside `[0, 100]`.
///
/// The policy applies to one participant's value at a time. It never looks
/// at the running sum, so over-allocation is always representable and shows
/// up as a negative `remaining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PercentagePolicy {
    /// Store the value exactly as given.
    #[default]
    Accept,
    /// Clamp the value into `[0, 100]` before storing it.
    Clamp,
    /// Refuse the update; the participant keeps its previous value.
    Reject,
}

impl PercentagePolicy {
    /// Map a requested percentage to the value that should be stored.
    ///
    /// Returns `None` when the update must be refused.
    pub fn apply(self, percentage: f64) -> Option<f64> {
        match self {
            PercentagePolicy::Accept => Some(percentage),
            PercentagePolicy::Clamp => {
                if percentage.is_nan() {
                    None
                } else {
                    Some(percentage.clamp(MIN_PERCENTAGE, MAX_PERCENTAGE))
                }
            }
            PercentagePolicy::Reject => {
                if (MIN_PERCENTAGE..=MAX_PERCENTAGE).contains(&percentage) {
                    Some(percentage)
                } else {
                    None
                }
            }
        }
    }
}
