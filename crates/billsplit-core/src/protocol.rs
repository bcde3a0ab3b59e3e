// Wire protocol: JSON messages exchanged between remote callers and the ledger.
//
// Every message is tagged with a SCREAMING_SNAKE_CASE `type`. Requests may
// carry a caller-chosen `requestId`, which is echoed on the matching reply so
// callers can correlate responses with pushes arriving on the same socket.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{ParticipantId, Snapshot};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(serde_json::Error),

    #[error("cannot encode {0}: value is not a finite number")]
    NonFinite(&'static str),
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    SetTotal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        payload: SetTotalPayload,
    },
    AddPerson {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        /// Optional so nameless callers (older clients) can still add people.
        #[serde(default)]
        payload: AddPersonPayload,
    },
    RemovePerson {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        payload: PersonRef,
    },
    UpdatePercentage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        payload: UpdatePercentagePayload,
    },
    GetSnapshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
    /// Read in the legacy tuple encoding, see [`LegacyBillSplit`].
    GetBillSplit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTotalPayload {
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AddPersonPayload {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRef {
    pub id: ParticipantId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePercentagePayload {
    pub id: ParticipantId,
    pub percentage: f64,
}

impl ClientMessage {
    /// Decode a request from a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn request_id(&self) -> Option<u64> {
        match self {
            ClientMessage::SetTotal { request_id, .. }
            | ClientMessage::AddPerson { request_id, .. }
            | ClientMessage::RemovePerson { request_id, .. }
            | ClientMessage::UpdatePercentage { request_id, .. }
            | ClientMessage::GetSnapshot { request_id }
            | ClientMessage::GetBillSplit { request_id } => *request_id,
        }
    }

    /// True for requests that can change ledger state.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            ClientMessage::GetSnapshot { .. } | ClientMessage::GetBillSplit { .. }
        )
    }
}

/// Best-effort extraction of `requestId` from a frame that failed to decode,
/// so the error reply can still be correlated.
pub fn peek_request_id(text: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("requestId")?.as_u64()
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    TotalSet {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
    PersonAdded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        payload: PersonRef,
    },
    PersonRemoved {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        payload: SuccessPayload,
    },
    PercentageUpdated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        payload: SuccessPayload,
    },
    /// `payload` is `null` while the ledger is uninitialized.
    Snapshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        payload: Option<Snapshot>,
    },
    BillSplit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        payload: Option<LegacyBillSplit>,
    },
    /// Pushed to every subscriber after a state-changing operation.
    LedgerUpdated {
        /// Unix milliseconds at which the change was applied.
        timestamp: i64,
        payload: Snapshot,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        payload: ErrorPayload,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessPayload {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

impl ServerMessage {
    pub fn error(request_id: Option<u64>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            request_id,
            payload: ErrorPayload {
                message: message.into(),
            },
        }
    }

    /// Encode for the wire. Refuses snapshots holding infinite or NaN
    /// numbers, which serde_json would otherwise write as `null`.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        match self {
            ServerMessage::Snapshot {
                payload: Some(snapshot),
                ..
            }
            | ServerMessage::LedgerUpdated {
                payload: snapshot, ..
            } if !snapshot.is_finite() => return Err(ProtocolError::NonFinite("snapshot")),
            ServerMessage::BillSplit {
                payload: Some(legacy),
                ..
            } if !legacy.is_finite() => return Err(ProtocolError::NonFinite("bill split")),
            _ => {}
        }
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

// ---------------------------------------------------------------------------
// Legacy encoding
// ---------------------------------------------------------------------------

/// The older read shape: participants as `[id, percentage, amount]` tuples
/// with no names. Tuple order is kept only for compatibility with clients
/// that index into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyBillSplit {
    pub total: f64,
    pub people: Vec<(ParticipantId, f64, f64)>,
}

impl LegacyBillSplit {
    pub fn is_finite(&self) -> bool {
        self.total.is_finite()
            && self
                .people
                .iter()
                .all(|(_, percentage, amount)| percentage.is_finite() && amount.is_finite())
    }
}

impl From<&Snapshot> for LegacyBillSplit {
    fn from(snapshot: &Snapshot) -> Self {
        LegacyBillSplit {
            total: snapshot.total,
            people: snapshot
                .participants
                .iter()
                .map(|p| (p.id, p.percentage, p.amount))
                .collect(),
        }
    }
}
