// Maps decoded wire requests onto ledger operations.

use billsplit_core::protocol::{
    ClientMessage, LegacyBillSplit, PersonRef, ServerMessage, SuccessPayload,
};
use tracing::debug;

use crate::app::LedgerUpdate;
use crate::handle::{AppError, LedgerHandle};

/// Run one request against the ledger and build the reply.
pub async fn dispatch(
    handle: &LedgerHandle,
    msg: ClientMessage,
) -> Result<ServerMessage, AppError> {
    debug!("Dispatching {:?}", msg);

    let reply = match msg {
        ClientMessage::SetTotal {
            request_id,
            payload,
        } => {
            handle.set_total(payload.amount).await?;
            ServerMessage::TotalSet { request_id }
        }
        ClientMessage::AddPerson {
            request_id,
            payload,
        } => {
            let id = handle.add_person(payload.name).await?;
            ServerMessage::PersonAdded {
                request_id,
                payload: PersonRef { id },
            }
        }
        ClientMessage::RemovePerson {
            request_id,
            payload,
        } => {
            let success = handle.remove_person(payload.id).await?;
            ServerMessage::PersonRemoved {
                request_id,
                payload: SuccessPayload { success },
            }
        }
        ClientMessage::UpdatePercentage {
            request_id,
            payload,
        } => {
            let success = handle
                .update_percentage(payload.id, payload.percentage)
                .await?;
            ServerMessage::PercentageUpdated {
                request_id,
                payload: SuccessPayload { success },
            }
        }
        ClientMessage::GetSnapshot { request_id } => ServerMessage::Snapshot {
            request_id,
            payload: handle.snapshot().await?,
        },
        ClientMessage::GetBillSplit { request_id } => ServerMessage::BillSplit {
            request_id,
            payload: handle
                .snapshot()
                .await?
                .as_ref()
                .map(LegacyBillSplit::from),
        },
    };

    Ok(reply)
}

/// Wire form of a broadcast update.
pub fn update_message(update: LedgerUpdate) -> ServerMessage {
    ServerMessage::LedgerUpdated {
        timestamp: update.timestamp,
        payload: update.snapshot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{spawn, AppState};
    use billsplit_core::protocol::{
        AddPersonPayload, SetTotalPayload, UpdatePercentagePayload,
    };
    use billsplit_core::{Ledger, ParticipantShare, Snapshot};

    fn handle() -> LedgerHandle {
        spawn(AppState::new(Ledger::new()), 8).0
    }

    #[tokio::test]
    async fn snapshot_is_null_before_any_mutation() {
        let h = handle();
        let reply = dispatch(&h, ClientMessage::GetSnapshot { request_id: Some(1) })
            .await
            .unwrap();
        assert_eq!(
            reply,
            ServerMessage::Snapshot {
                request_id: Some(1),
                payload: None,
            }
        );

        let reply = dispatch(&h, ClientMessage::GetBillSplit { request_id: None })
            .await
            .unwrap();
        assert_eq!(
            reply,
            ServerMessage::BillSplit {
                request_id: None,
                payload: None,
            }
        );
    }

    #[tokio::test]
    async fn full_round_echoes_request_ids() {
        let h = handle();

        let reply = dispatch(
            &h,
            ClientMessage::SetTotal {
                request_id: Some(1),
                payload: SetTotalPayload { amount: 60.0 },
            },
        )
        .await
        .unwrap();
        assert_eq!(reply, ServerMessage::TotalSet { request_id: Some(1) });

        let reply = dispatch(
            &h,
            ClientMessage::AddPerson {
                request_id: Some(2),
                payload: AddPersonPayload {
                    name: "Alice".into(),
                },
            },
        )
        .await
        .unwrap();
        assert_eq!(
            reply,
            ServerMessage::PersonAdded {
                request_id: Some(2),
                payload: PersonRef { id: 1 },
            }
        );

        let reply = dispatch(
            &h,
            ClientMessage::UpdatePercentage {
                request_id: Some(3),
                payload: UpdatePercentagePayload {
                    id: 1,
                    percentage: 50.0,
                },
            },
        )
        .await
        .unwrap();
        assert_eq!(
            reply,
            ServerMessage::PercentageUpdated {
                request_id: Some(3),
                payload: SuccessPayload { success: true },
            }
        );

        let reply = dispatch(&h, ClientMessage::GetSnapshot { request_id: Some(4) })
            .await
            .unwrap();
        assert_eq!(
            reply,
            ServerMessage::Snapshot {
                request_id: Some(4),
                payload: Some(Snapshot {
                    total: 60.0,
                    remaining: 50.0,
                    participants: vec![ParticipantShare {
                        id: 1,
                        name: "Alice".into(),
                        percentage: 50.0,
                        amount: 30.0,
                    }],
                }),
            }
        );

        let reply = dispatch(&h, ClientMessage::GetBillSplit { request_id: Some(5) })
            .await
            .unwrap();
        assert_eq!(
            reply,
            ServerMessage::BillSplit {
                request_id: Some(5),
                payload: Some(LegacyBillSplit {
                    total: 60.0,
                    people: vec![(1, 50.0, 30.0)],
                }),
            }
        );
    }

    #[tokio::test]
    async fn unknown_ids_reply_with_success_false() {
        let h = handle();

        let reply = dispatch(
            &h,
            ClientMessage::RemovePerson {
                request_id: None,
                payload: PersonRef { id: 9 },
            },
        )
        .await
        .unwrap();
        assert_eq!(
            reply,
            ServerMessage::PersonRemoved {
                request_id: None,
                payload: SuccessPayload { success: false },
            }
        );

        let reply = dispatch(
            &h,
            ClientMessage::UpdatePercentage {
                request_id: None,
                payload: UpdatePercentagePayload {
                    id: 9,
                    percentage: 10.0,
                },
            },
        )
        .await
        .unwrap();
        assert_eq!(
            reply,
            ServerMessage::PercentageUpdated {
                request_id: None,
                payload: SuccessPayload { success: false },
            }
        );
    }

    #[tokio::test]
    async fn stopped_actor_surfaces_as_error() {
        let h = handle();
        h.shutdown().await.unwrap();

        let err = dispatch(&h, ClientMessage::GetSnapshot { request_id: None })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ActorUnavailable));
    }

    #[test]
    fn update_message_carries_timestamp_and_snapshot() {
        let snapshot = Snapshot {
            total: 10.0,
            remaining: 100.0,
            participants: vec![],
        };
        let msg = update_message(LedgerUpdate {
            timestamp: 1234,
            snapshot: snapshot.clone(),
        });
        assert_eq!(
            msg,
            ServerMessage::LedgerUpdated {
                timestamp: 1234,
                payload: snapshot,
            }
        );
    }
}
