// Cloneable front door to the ledger actor.

use billsplit_core::{ParticipantId, Snapshot};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::app::{LedgerCommand, LedgerUpdate};

#[derive(Debug, Error)]
pub enum AppError {
    /// The actor task has stopped; no further operations can be served.
    #[error("ledger actor is no longer running")]
    ActorUnavailable,
}

/// Sends commands to the ledger actor and waits for the answers.
///
/// Cheap to clone; every transport connection gets its own copy.
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    cmd_tx: mpsc::Sender<LedgerCommand>,
    updates_tx: Option<broadcast::Sender<LedgerUpdate>>,
}

impl LedgerHandle {
    pub(crate) fn new(
        cmd_tx: mpsc::Sender<LedgerCommand>,
        updates_tx: Option<broadcast::Sender<LedgerUpdate>>,
    ) -> Self {
        LedgerHandle { cmd_tx, updates_tx }
    }

    pub async fn set_total(&self, amount: f64) -> Result<(), AppError> {
        self.request(|reply| LedgerCommand::SetTotal { amount, reply })
            .await
    }

    pub async fn add_person(&self, name: impl Into<String>) -> Result<ParticipantId, AppError> {
        let name = name.into();
        self.request(|reply| LedgerCommand::AddPerson { name, reply })
            .await
    }

    pub async fn remove_person(&self, id: ParticipantId) -> Result<bool, AppError> {
        self.request(|reply| LedgerCommand::RemovePerson { id, reply })
            .await
    }

    pub async fn update_percentage(
        &self,
        id: ParticipantId,
        percentage: f64,
    ) -> Result<bool, AppError> {
        self.request(|reply| LedgerCommand::UpdatePercentage {
            id,
            percentage,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<Option<Snapshot>, AppError> {
        self.request(|reply| LedgerCommand::Snapshot { reply }).await
    }

    /// Ask the actor to stop once everything queued before this is applied.
    pub async fn shutdown(&self) -> Result<(), AppError> {
        self.cmd_tx
            .send(LedgerCommand::Shutdown)
            .await
            .map_err(|_| AppError::ActorUnavailable)
    }

    /// Subscribe to post-change snapshots. `None` if broadcasting is off.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<LedgerUpdate>> {
        self.updates_tx.as_ref().map(broadcast::Sender::subscribe)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LedgerCommand,
    ) -> Result<T, AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| AppError::ActorUnavailable)?;
        reply_rx.await.map_err(|_| AppError::ActorUnavailable)
    }
}
