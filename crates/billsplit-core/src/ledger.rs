// Bill-split ledger: total amount, participants, and their percentage shares.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::policy::PercentagePolicy;

/// Identifier assigned to a participant when it is added. Never reused.
pub type ParticipantId = u64;

/// The whole bill, in percent. `remaining` is measured against this.
const FULL_SHARE: f64 = 100.0;

/// First id handed out by a fresh ledger.
const FIRST_ID: ParticipantId = 1;

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// One person sharing the bill.
///
/// `id` and `name` are fixed at creation; only `percentage` changes
/// afterwards. The monetary amount is not stored here because it depends on
/// the ledger's current total.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    id: ParticipantId,
    name: String,
    percentage: f64,
}

impl Participant {
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    /// This participant's share of `total`.
    pub fn amount(&self, total: f64) -> f64 {
        total * self.percentage / FULL_SHARE
    }
}

// ---------------------------------------------------------------------------
// Snapshot (read model)
// ---------------------------------------------------------------------------

/// A participant as seen by a caller: stored fields plus the derived amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantShare {
    pub id: ParticipantId,
    pub name: String,
    pub percentage: f64,
    pub amount: f64,
}

/// Read-only projection of the ledger at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub total: f64,
    /// `100 - Σ percentage`; negative when the bill is over-allocated.
    pub remaining: f64,
    /// Participants in insertion order.
    pub participants: Vec<ParticipantShare>,
}

impl Snapshot {
    /// True when the participants' shares add up to more than 100%.
    pub fn is_over_allocated(&self) -> bool {
        self.remaining < 0.0
    }

    /// False when the total, `remaining`, or any derived amount overflowed
    /// to infinity (or is NaN). JSON has no encoding for such values.
    pub fn is_finite(&self) -> bool {
        self.total.is_finite()
            && self.remaining.is_finite()
            && self
                .participants
                .iter()
                .all(|p| p.percentage.is_finite() && p.amount.is_finite())
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// The in-memory authority for one bill.
///
/// Every operation either applies completely or leaves the ledger untouched.
/// Unknown ids are reported with `false`, never with a panic.
#[derive(Debug, Clone)]
pub struct Ledger {
    total: f64,
    /// Insertion order is display order.
    participants: Vec<Participant>,
    next_id: ParticipantId,
    /// Set by the first `set_total` or `add_person`. Until then `snapshot`
    /// returns `None`.
    initialized: bool,
    policy: PercentagePolicy,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Create an empty ledger that stores percentages as given.
    pub fn new() -> Self {
        Self::with_policy(PercentagePolicy::default())
    }

    /// Create an empty ledger with an explicit out-of-range policy.
    pub fn with_policy(policy: PercentagePolicy) -> Self {
        Ledger {
            total: 0.0,
            participants: Vec::new(),
            next_id: FIRST_ID,
            initialized: false,
            policy,
        }
    }

    /// Overwrite the bill total. No validation: negative totals are stored.
    pub fn set_total(&mut self, amount: f64) {
        debug!("Setting bill total {} -> {}", self.total, amount);
        self.total = amount;
        self.initialized = true;
    }

    /// Append a participant with a 0% share and return its new id.
    ///
    /// Empty names are allowed here; rejecting them is up to the caller.
    pub fn add_person(&mut self, name: impl Into<String>) -> ParticipantId {
        let id = self.next_id;
        self.next_id += 1;
        let name = name.into();
        debug!("Adding participant {} ({:?})", id, name);
        self.participants.push(Participant {
            id,
            name,
            percentage: 0.0,
        });
        self.initialized = true;
        id
    }

    /// Remove the participant with `id`. Returns `false` (and changes
    /// nothing) if there is no such participant.
    pub fn remove_person(&mut self, id: ParticipantId) -> bool {
        match self.participants.iter().position(|p| p.id == id) {
            Some(idx) => {
                let removed = self.participants.remove(idx);
                debug!(
                    "Removed participant {} ({:?}), freeing {}%",
                    removed.id, removed.name, removed.percentage
                );
                true
            }
            None => {
                debug!("Remove ignored: no participant with id {}", id);
                false
            }
        }
    }

    /// Set the share of the participant with `id`.
    ///
    /// Returns `false` if the participant does not exist or the configured
    /// policy refuses the value; in both cases nothing changes.
    pub fn update_percentage(&mut self, id: ParticipantId, percentage: f64) -> bool {
        let Some(participant) = self.participants.iter_mut().find(|p| p.id == id) else {
            debug!("Update ignored: no participant with id {}", id);
            return false;
        };

        let Some(stored) = self.policy.apply(percentage) else {
            debug!(
                "Update refused for participant {}: {}% is outside [0, 100]",
                id, percentage
            );
            return false;
        };

        participant.percentage = stored;
        true
    }

    /// Project the current state. `None` until the ledger is initialized.
    pub fn snapshot(&self) -> Option<Snapshot> {
        if !self.initialized {
            return None;
        }

        let participants = self
            .participants
            .iter()
            .map(|p| ParticipantShare {
                id: p.id,
                name: p.name.clone(),
                percentage: p.percentage,
                amount: p.amount(self.total),
            })
            .collect();

        Some(Snapshot {
            total: self.total,
            remaining: self.remaining(),
            participants,
        })
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    /// `100` minus the sum of all current percentages.
    pub fn remaining(&self) -> f64 {
        FULL_SHARE - self.participants.iter().map(|p| p.percentage).sum::<f64>()
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn policy(&self) -> PercentagePolicy {
        self.policy
    }
}
