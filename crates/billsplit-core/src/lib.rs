// Core bill-split ledger: state, invariants, and wire protocol types.
//
// Nothing in this crate performs I/O. Transports and the actor that
// serializes access to the ledger live in `billsplit-app` and
// `billsplit-server`.

pub mod ledger;
pub mod policy;
pub mod protocol;

pub use ledger::{Ledger, Participant, ParticipantId, ParticipantShare, Snapshot};
pub use policy::PercentagePolicy;
