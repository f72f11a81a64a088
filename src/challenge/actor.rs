// src/challenge/actor.rs
//! Challenge actor
//!
//! A tokio task owns the `ChallengeManager` and applies commands one at a
//! time, in arrival order. Block notifications and transactions from the
//! chain client arrive on the same channel, so every transaction is judged
//! against the latest block delivered before it.

use ethereum_types::Address;
use log::{debug, info};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{BisectionChallenge, ChallengeKind, ChallengeManager};
use crate::error_handling::ChallengeError;
use crate::interfaces::StakingContract;

/// Command accepted by the challenge actor
#[derive(Debug)]
pub enum ChallengeCommand {
    /// A new finalised block; ledger time becomes `block × ticks_per_block`
    NewBlock(u64),

    /// Create an uninitialised challenge
    CreateChallenge {
        /// Kind of challenge
        kind: ChallengeKind,

        /// Receives the new identifier
        reply: oneshot::Sender<u64>,
    },

    /// Apply a transaction
    Transaction {
        /// Addressed challenge
        challenge_id: u64,

        /// Transaction sender
        sender: Address,

        /// Borsh-encoded `ChallengeInstruction`
        data: Vec<u8>,

        /// Receives the outcome
        reply: oneshot::Sender<Result<(), ChallengeError>>,
    },

    /// Settle every expired challenge
    CheckTimeouts {
        /// Receives the settled identifiers
        reply: oneshot::Sender<Vec<u64>>,
    },

    /// Copy of a challenge record
    Snapshot {
        /// Requested challenge
        challenge_id: u64,

        /// Receives the record, if any
        reply: oneshot::Sender<Option<BisectionChallenge>>,
    },
}

/// Cloneable sender side of the actor
#[derive(Debug, Clone)]
pub struct ChallengeHandle {
    commands: mpsc::Sender<ChallengeCommand>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ChallengeHandle {
    async fn send(&self, command: ChallengeCommand) -> Result<(), ChallengeError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ChallengeError::ActorStopped)
    }

    /// Deliver a finalised block
    pub async fn new_block(&self, block: u64) -> Result<(), ChallengeError> {
        self.send(ChallengeCommand::NewBlock(block)).await
    }

    /// Create a challenge
    pub async fn create_challenge(&self, kind: ChallengeKind) -> Result<u64, ChallengeError> {
        let (reply, response) = oneshot::channel();
        self.send(ChallengeCommand::CreateChallenge { kind, reply }).await?;
        response.await.map_err(|_| ChallengeError::ActorStopped)
    }

    /// Submit a transaction and wait for its outcome
    pub async fn submit(
        &self,
        challenge_id: u64,
        sender: Address,
        data: Vec<u8>,
    ) -> Result<(), ChallengeError> {
        let (reply, response) = oneshot::channel();
        self.send(ChallengeCommand::Transaction {
            challenge_id,
            sender,
            data,
            reply,
        })
        .await?;
        response.await.map_err(|_| ChallengeError::ActorStopped)?
    }

    /// Settle expired challenges
    pub async fn check_timeouts(&self) -> Result<Vec<u64>, ChallengeError> {
        let (reply, response) = oneshot::channel();
        self.send(ChallengeCommand::CheckTimeouts { reply }).await?;
        response.await.map_err(|_| ChallengeError::ActorStopped)
    }

    /// Fetch a copy of a challenge
    pub async fn snapshot(&self, challenge_id: u64) -> Result<Option<BisectionChallenge>, ChallengeError> {
        let (reply, response) = oneshot::channel();
        self.send(ChallengeCommand::Snapshot { challenge_id, reply }).await?;
        response.await.map_err(|_| ChallengeError::ActorStopped)
    }

    /// Ask the actor to stop after the commands already queued
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Task owning the challenge manager
pub struct ChallengeActor<S: StakingContract> {
    manager: ChallengeManager<S>,
    commands: mpsc::Receiver<ChallengeCommand>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl<S> ChallengeActor<S>
where
    S: StakingContract + Send + 'static,
{
    /// Wrap a manager; `buffer` bounds the command queue
    pub fn new(manager: ChallengeManager<S>, buffer: usize) -> (Self, ChallengeHandle) {
        let (commands_tx, commands) = mpsc::channel(buffer);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let actor = Self {
            manager,
            commands,
            shutdown_rx,
        };
        let handle = ChallengeHandle {
            commands: commands_tx,
            shutdown_tx,
        };
        (actor, handle)
    }

    /// Spawn the actor on the current runtime
    ///
    /// The task returns the manager once shut down or once every handle is
    /// dropped.
    pub fn spawn(manager: ChallengeManager<S>, buffer: usize) -> (ChallengeHandle, JoinHandle<ChallengeManager<S>>) {
        let (actor, handle) = Self::new(manager, buffer);
        (handle, tokio::spawn(actor.run()))
    }

    /// Apply commands until shut down
    pub async fn run(mut self) -> ChallengeManager<S> {
        info!("Challenge actor started at block {}", self.manager.current_block());
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = self.shutdown_rx.recv() => {
                    // Drain what was queued before the request
                    while let Ok(command) = self.commands.try_recv() {
                        self.handle(command);
                    }
                    break;
                }
            }
        }
        info!("Challenge actor stopped at block {}", self.manager.current_block());
        self.manager
    }

    fn handle(&mut self, command: ChallengeCommand) {
        match command {
            ChallengeCommand::NewBlock(block) => {
                let now = self.manager.new_block(block);
                debug!("Block {} at tick {}", block, now);
            }
            ChallengeCommand::CreateChallenge { kind, reply } => {
                let _ = reply.send(self.manager.create_challenge(kind));
            }
            ChallengeCommand::Transaction {
                challenge_id,
                sender,
                data,
                reply,
            } => {
                let _ = reply.send(self.manager.process_instruction(challenge_id, sender, &data));
            }
            ChallengeCommand::CheckTimeouts { reply } => {
                let _ = reply.send(self.manager.check_timeouts());
            }
            ChallengeCommand::Snapshot { challenge_id, reply } => {
                let _ = reply.send(self.manager.challenge(challenge_id).cloned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::{ChallengeInstruction, ChallengeState};
    use crate::config::ChallengeConfig;
    use crate::interfaces::RecordingStaking;
    use ethereum_types::H256;

    #[tokio::test]
    async fn test_actor_applies_transactions_in_order() {
        let vm = Address::repeat_byte(0x99);
        let config = ChallengeConfig {
            challenge_period_ticks: 1000,
            ..ChallengeConfig::default()
        };
        let manager = ChallengeManager::new(vm, config, RecordingStaking::new());
        let (handle, task) = ChallengeActor::spawn(manager, 16);

        let id = handle.create_challenge(ChallengeKind::Execution).await.unwrap();
        let init = ChallengeInstruction::InitializeBisection {
            asserter: [0xa1; 20],
            challenger: [0xc1; 20],
            challenge_period_ticks: 1000,
            root: H256::repeat_byte(1).to_fixed_bytes(),
            segment_count: 1,
        };
        handle.submit(id, vm, init.pack().unwrap()).await.unwrap();

        handle.new_block(2).await.unwrap();
        assert_eq!(handle.check_timeouts().await.unwrap(), vec![id]);

        let snapshot = handle.snapshot(id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, ChallengeState::Concluded);

        handle.shutdown().await;
        let manager = task.await.unwrap();
        assert_eq!(manager.staking().resolutions().len(), 1);
    }

    #[tokio::test]
    async fn test_stopped_actor_reports_error() {
        let manager = ChallengeManager::new(Address::zero(), ChallengeConfig::default(), RecordingStaking::new());
        let (handle, task) = ChallengeActor::spawn(manager, 4);

        handle.shutdown().await;
        task.await.unwrap();

        assert_eq!(handle.new_block(1).await, Err(ChallengeError::ActorStopped));
    }
}
