// Ledger actor: the single writer that owns the bill-split ledger.
//
// Transports never touch the `Ledger` directly. They send `LedgerCommand`s
// through a `LedgerHandle`; this loop applies them one at a time, in arrival
// order, and answers on each command's oneshot channel. Because only this
// task mutates the ledger, two concurrent ADD_PERSON requests can never see
// the same id, and a REMOVE_PERSON racing an UPDATE_PERCENTAGE on the same id
// resolves in whichever order the commands reached the mailbox.

use billsplit_core::{Ledger, ParticipantId, Snapshot};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::handle::LedgerHandle;

/// How many unread updates a slow subscriber may fall behind before it
/// starts skipping.
pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Commands and updates
// ---------------------------------------------------------------------------

/// A request for the ledger actor, carrying the channel to answer on.
#[derive(Debug)]
pub enum LedgerCommand {
    SetTotal {
        amount: f64,
        reply: oneshot::Sender<()>,
    },
    AddPerson {
        name: String,
        reply: oneshot::Sender<ParticipantId>,
    },
    RemovePerson {
        id: ParticipantId,
        reply: oneshot::Sender<bool>,
    },
    UpdatePercentage {
        id: ParticipantId,
        percentage: f64,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<Option<Snapshot>>,
    },
    /// Stop the actor after all earlier commands have been applied.
    Shutdown,
}

/// Published after every operation that changed the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerUpdate {
    /// Unix milliseconds at which the change was applied.
    pub timestamp: i64,
    pub snapshot: Snapshot,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Everything the actor owns.
pub struct AppState {
    pub ledger: Ledger,
    /// `None` when update broadcasting is disabled.
    pub updates_tx: Option<broadcast::Sender<LedgerUpdate>>,
    /// Number of commands that changed the ledger.
    pub mutation_count: u64,
}

impl AppState {
    /// Wrap a ledger without update broadcasting.
    pub fn new(ledger: Ledger) -> Self {
        AppState {
            ledger,
            updates_tx: None,
            mutation_count: 0,
        }
    }

    /// Wrap a ledger and publish a `LedgerUpdate` after every change.
    pub fn with_broadcast(ledger: Ledger) -> Self {
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        AppState {
            ledger,
            updates_tx: Some(updates_tx),
            mutation_count: 0,
        }
    }

    /// Build a fresh ledger and state from configuration.
    pub fn from_config(config: &Config) -> Self {
        let ledger = Ledger::with_policy(config.ledger.percentage_policy);
        if config.server.broadcast_updates {
            AppState::with_broadcast(ledger)
        } else {
            AppState::new(ledger)
        }
    }

    /// Apply one command and answer it. Returns `false` for `Shutdown`.
    pub fn handle_command(&mut self, cmd: LedgerCommand) -> bool {
        match cmd {
            LedgerCommand::SetTotal { amount, reply } => {
                self.ledger.set_total(amount);
                info!("Bill total set to {}", amount);
                self.publish_update();
                send_reply(reply, (), "SetTotal");
            }
            LedgerCommand::AddPerson { name, reply } => {
                let id = self.ledger.add_person(name);
                info!(
                    "Participant {} added ({} participants)",
                    id,
                    self.ledger.len()
                );
                self.publish_update();
                send_reply(reply, id, "AddPerson");
            }
            LedgerCommand::RemovePerson { id, reply } => {
                let removed = self.ledger.remove_person(id);
                if removed {
                    info!(
                        "Participant {} removed ({} participants)",
                        id,
                        self.ledger.len()
                    );
                    self.publish_update();
                }
                send_reply(reply, removed, "RemovePerson");
            }
            LedgerCommand::UpdatePercentage {
                id,
                percentage,
                reply,
            } => {
                let updated = self.ledger.update_percentage(id, percentage);
                if updated {
                    let stored = self
                        .ledger
                        .participant(id)
                        .map_or(percentage, |p| p.percentage());
                    info!(
                        "Participant {} share set to {}% (requested {}%, remaining {}%)",
                        id,
                        stored,
                        percentage,
                        self.ledger.remaining()
                    );
                    self.publish_update();
                }
                send_reply(reply, updated, "UpdatePercentage");
            }
            LedgerCommand::Snapshot { reply } => {
                send_reply(reply, self.ledger.snapshot(), "Snapshot");
            }
            LedgerCommand::Shutdown => return false,
        }
        true
    }

    fn publish_update(&mut self) {
        self.mutation_count += 1;

        let Some(tx) = &self.updates_tx else {
            return;
        };
        let Some(snapshot) = self.ledger.snapshot() else {
            return;
        };
        let update = LedgerUpdate {
            timestamp: chrono::Utc::now().timestamp_millis(),
            snapshot,
        };
        // No subscribers is not an error.
        let _ = tx.send(update);
    }
}

fn send_reply<T>(reply: oneshot::Sender<T>, value: T, op: &str) {
    if reply.send(value).is_err() {
        debug!("{} caller went away before the reply was sent", op);
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Run the ledger actor until `Shutdown` arrives or every handle is dropped.
pub async fn run(
    mut cmd_rx: mpsc::Receiver<LedgerCommand>,
    mut state: AppState,
) -> anyhow::Result<()> {
    info!(
        "Ledger actor started (policy={:?}, broadcast={})",
        state.ledger.policy(),
        state.updates_tx.is_some()
    );

    loop {
        match cmd_rx.recv().await {
            Some(cmd) => {
                if !state.handle_command(cmd) {
                    info!("Shutdown command received");
                    break;
                }
            }
            None => {
                info!("All ledger handles dropped, shutting down");
                break;
            }
        }
    }

    info!(
        "Ledger actor exiting after {} mutations ({} participants)",
        state.mutation_count,
        state.ledger.len()
    );
    Ok(())
}

/// Spawn the actor on the current runtime and return a handle to it.
pub fn spawn(
    state: AppState,
    buffer: usize,
) -> (LedgerHandle, JoinHandle<anyhow::Result<()>>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(buffer);
    let handle = LedgerHandle::new(cmd_tx, state.updates_tx.clone());
    let join = tokio::spawn(run(cmd_rx, state));
    (handle, join)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::AppError;
    use billsplit_core::PercentagePolicy;
    use std::collections::HashSet;

    fn spawn_ledger() -> (LedgerHandle, JoinHandle<anyhow::Result<()>>) {
        spawn(AppState::with_broadcast(Ledger::new()), 16)
    }

    #[tokio::test]
    async fn scenario_through_actor() {
        let (handle, join) = spawn_ledger();

        assert_eq!(handle.snapshot().await.unwrap(), None);

        handle.set_total(100.0).await.unwrap();
        let alice = handle.add_person("Alice").await.unwrap();
        let bob = handle.add_person("Bob").await.unwrap();
        assert_eq!((alice, bob), (1, 2));
        assert!(handle.update_percentage(alice, 60.0).await.unwrap());
        assert!(handle.update_percentage(bob, 30.0).await.unwrap());

        let snap = handle.snapshot().await.unwrap().unwrap();
        assert_eq!(snap.total, 100.0);
        assert_eq!(snap.remaining, 10.0);
        assert_eq!(snap.participants.len(), 2);
        assert_eq!(snap.participants[0].amount, 60.0);
        assert_eq!(snap.participants[1].amount, 30.0);

        handle.shutdown().await.unwrap();
        assert!(join.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn concurrent_adds_get_unique_ids() {
        let (handle, join) = spawn_ledger();

        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let h = handle.clone();
                tokio::spawn(async move { h.add_person(format!("p{i}")).await.unwrap() })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            assert!(ids.insert(task.await.unwrap()));
        }
        assert_eq!(ids.len(), 50);
        assert_eq!(ids.iter().copied().min(), Some(1));
        assert_eq!(ids.iter().copied().max(), Some(50));

        let snap = handle.snapshot().await.unwrap().unwrap();
        assert_eq!(snap.participants.len(), 50);

        drop(handle);
        assert!(join.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn racing_remove_and_update_resolve_cleanly() {
        let (handle, _join) = spawn_ledger();
        let id = handle.add_person("Target").await.unwrap();

        let remover = {
            let h = handle.clone();
            tokio::spawn(async move { h.remove_person(id).await.unwrap() })
        };
        let updater = {
            let h = handle.clone();
            tokio::spawn(async move { h.update_percentage(id, 50.0).await.unwrap() })
        };

        assert!(remover.await.unwrap());
        let _either_order = updater.await.unwrap();

        let snap = handle.snapshot().await.unwrap().unwrap();
        assert!(snap.participants.is_empty());
        assert_eq!(snap.remaining, 100.0);
    }

    #[tokio::test]
    async fn update_after_remove_returns_false() {
        let (handle, _join) = spawn_ledger();
        let id = handle.add_person("Gone").await.unwrap();

        assert!(handle.remove_person(id).await.unwrap());
        assert!(!handle.update_percentage(id, 20.0).await.unwrap());
        assert!(!handle.remove_person(id).await.unwrap());
    }

    #[tokio::test]
    async fn broadcast_only_on_change() {
        let (handle, _join) = spawn_ledger();
        let mut updates = handle.subscribe().unwrap();

        handle.set_total(40.0).await.unwrap();
        let update = updates.recv().await.unwrap();
        assert_eq!(update.snapshot.total, 40.0);
        assert!(update.timestamp > 0);

        // Failed operations publish nothing.
        assert!(!handle.remove_person(77).await.unwrap());
        assert!(!handle.update_percentage(77, 5.0).await.unwrap());
        handle.snapshot().await.unwrap();
        assert!(matches!(
            updates.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));

        let id = handle.add_person("Eve").await.unwrap();
        let update = updates.recv().await.unwrap();
        assert_eq!(update.snapshot.participants[0].id, id);
    }

    #[tokio::test]
    async fn no_subscription_without_broadcast() {
        let (handle, _join) = spawn(AppState::new(Ledger::new()), 4);
        assert!(handle.subscribe().is_none());
        handle.set_total(1.0).await.unwrap();
    }

    #[tokio::test]
    async fn from_config_applies_policy_and_broadcast_flag() {
        let mut config = Config::default();
        config.ledger.percentage_policy = PercentagePolicy::Reject;
        config.server.broadcast_updates = false;

        let state = AppState::from_config(&config);
        assert_eq!(state.ledger.policy(), PercentagePolicy::Reject);
        assert!(state.updates_tx.is_none());

        let (handle, _join) = spawn(state, config.ledger.command_buffer);
        let id = handle.add_person("A").await.unwrap();
        assert!(!handle.update_percentage(id, 120.0).await.unwrap());
        assert!(handle.update_percentage(id, 20.0).await.unwrap());
    }

    #[tokio::test]
    async fn handle_fails_after_shutdown() {
        let (handle, join) = spawn_ledger();
        handle.shutdown().await.unwrap();
        join.await.unwrap().unwrap();

        let err = handle.add_person("late").await.unwrap_err();
        assert!(matches!(err, AppError::ActorUnavailable));
    }

    #[test]
    fn handle_command_counts_only_mutations() {
        let mut state = AppState::new(Ledger::new());
        let (tx, _rx) = oneshot::channel();
        state.handle_command(LedgerCommand::RemovePerson { id: 1, reply: tx });
        assert_eq!(state.mutation_count, 0);

        let (tx, mut rx) = oneshot::channel();
        state.handle_command(LedgerCommand::AddPerson {
            name: "A".into(),
            reply: tx,
        });
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(state.mutation_count, 1);

        assert!(!state.handle_command(LedgerCommand::Shutdown));
    }

    #[test]
    fn dropped_caller_does_not_undo_mutation() {
        let mut state = AppState::new(Ledger::new());
        let (tx, rx) = oneshot::channel();
        drop(rx);
        assert!(state.handle_command(LedgerCommand::AddPerson {
            name: "A".into(),
            reply: tx,
        }));
        assert_eq!(state.ledger.len(), 1);
    }

    /// Collects formatted log output for assertions.
    #[derive(Clone, Default)]
    struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn clamped_update_logs_stored_share() {
        let mut state = AppState::new(Ledger::with_policy(PercentagePolicy::Clamp));
        let (tx, _rx) = oneshot::channel();
        state.handle_command(LedgerCommand::AddPerson {
            name: "A".into(),
            reply: tx,
        });

        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let (tx, mut rx) = oneshot::channel();
        tracing::subscriber::with_default(subscriber, || {
            state.handle_command(LedgerCommand::UpdatePercentage {
                id: 1,
                percentage: 150.0,
                reply: tx,
            });
        });
        assert!(rx.try_recv().unwrap());

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("share set to 100% (requested 150%, remaining 0%)"));
    }
}
