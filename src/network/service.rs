//! Root Chain Service
//!
//! Shares one [`ExitGame`] between connections. Every mutation holds the
//! write lock for its whole duration and reads the clock under it, so calls
//! are linearizable and timestamps never run backwards relative to the
//! order calls take effect.
//!
//! Finalization runs with a step budget; callers (or the background loop)
//! simply call again while `more_due` is set.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, instrument};

use crate::core::clock::{Clock, Timestamp};
use crate::core::hash::Hash;
use crate::core::utxo::UtxoPos;
use crate::game::events::RootChainEvent;
use crate::game::exit_game::{ExitGame, ExitGameError, FinalizeOutcome, Payout};
use crate::game::ledger::ChildBlock;
use crate::game::registry::{Exit, ExitStatus};

/// Default number of queue entries one finalize call may pop.
pub const DEFAULT_FINALIZE_BUDGET: usize = 256;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Operator identity.
    pub operator: Address,
    /// Entries popped per finalize call.
    pub finalize_step_budget: usize,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            operator: Address::ZERO,
            finalize_step_budget: DEFAULT_FINALIZE_BUDGET,
            event_capacity: 1024,
        }
    }
}

impl ServiceConfig {
    /// Create config from environment variables.
    ///
    /// `ROOT_CHAIN_OPERATOR` is required.
    pub fn from_env() -> Result<Self, ServiceError> {
        let operator = std::env::var("ROOT_CHAIN_OPERATOR")
            .map_err(|_| ServiceError::InvalidConfig("ROOT_CHAIN_OPERATOR is not set".into()))?
            .parse::<Address>()
            .map_err(|e| ServiceError::InvalidConfig(format!("ROOT_CHAIN_OPERATOR: {}", e)))?;

        let finalize_step_budget = match std::env::var("ROOT_CHAIN_FINALIZE_BUDGET") {
            Ok(value) => value
                .parse()
                .map_err(|e| ServiceError::InvalidConfig(format!("ROOT_CHAIN_FINALIZE_BUDGET: {}", e)))?,
            Err(_) => DEFAULT_FINALIZE_BUDGET,
        };

        Ok(Self { operator, finalize_step_budget, ..Default::default() })
    }
}

/// Service errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The exit game rejected the call.
    #[error(transparent)]
    Game(#[from] ExitGameError),

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Value the contract holds and has released.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutBook {
    /// Cumulative payouts per recipient.
    pub balances: BTreeMap<Address, U256>,
    /// Deposited value not yet paid out.
    pub custody: U256,
    /// Total paid out.
    pub paid_out: U256,
}

impl PayoutBook {
    fn credit_deposit(&mut self, amount: U256) {
        self.custody = self.custody.saturating_add(amount);
    }

    fn apply(&mut self, payout: &Payout) {
        let balance = self.balances.entry(payout.owner).or_default();
        *balance = balance.saturating_add(payout.amount);
        self.custody = self.custody.saturating_sub(payout.amount);
        self.paid_out = self.paid_out.saturating_add(payout.amount);
    }

    /// Total paid to `owner`.
    pub fn balance(&self, owner: &Address) -> U256 {
        self.balances.get(owner).copied().unwrap_or_default()
    }
}

struct ChainState {
    game: ExitGame,
    book: PayoutBook,
}

/// Shared, serialized access to the root chain.
pub struct RootChainService {
    state: RwLock<ChainState>,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
    events: broadcast::Sender<RootChainEvent>,
}

impl RootChainService {
    /// Create a fresh root chain.
    pub fn new(config: ServiceConfig, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        info!("Root chain operated by {}", config.operator);

        Self {
            state: RwLock::new(ChainState {
                game: ExitGame::new(config.operator),
                book: PayoutBook::default(),
            }),
            clock,
            config,
            events,
        }
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RootChainEvent> {
        self.events.subscribe()
    }

    /// Service configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Current time as seen by the service.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn publish(&self, event: &RootChainEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event.clone());
    }

    async fn mutate<F>(&self, op: &'static str, f: F) -> Result<RootChainEvent, ServiceError>
    where
        F: FnOnce(&mut ChainState, Timestamp) -> Result<RootChainEvent, ExitGameError>,
    {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        match f(&mut *state, now) {
            Ok(event) => {
                self.publish(&event);
                Ok(event)
            }
            Err(e) => {
                debug!("{} rejected: {}", op, e);
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Commit a child-block root.
    pub async fn submit_block(&self, caller: Address, root: Hash) -> Result<RootChainEvent, ServiceError> {
        self.mutate("submit_block", |state, now| state.game.submit_block(caller, root, now))
            .await
    }

    /// Deposit native value.
    pub async fn deposit(&self, caller: Address, amount: U256) -> Result<RootChainEvent, ServiceError> {
        self.mutate("deposit", |state, now| {
            let event = state.game.deposit(caller, amount, now)?;
            state.book.credit_deposit(amount);
            Ok(event)
        })
        .await
    }

    /// Provision an asset queue.
    pub async fn add_token(&self, caller: Address, token: Address) -> Result<RootChainEvent, ServiceError> {
        self.mutate("add_token", |state, _| state.game.add_token(caller, token)).await
    }

    /// Exit a deposit.
    pub async fn start_deposit_exit(
        &self,
        caller: Address,
        deposit_pos: UtxoPos,
        token: Address,
        amount: U256,
    ) -> Result<RootChainEvent, ServiceError> {
        self.mutate("start_deposit_exit", |state, now| {
            state.game.start_deposit_exit(caller, deposit_pos, token, amount, now)
        })
        .await
    }

    /// Queue an operator fee exit.
    pub async fn start_fee_exit(
        &self,
        caller: Address,
        token: Address,
        amount: U256,
    ) -> Result<RootChainEvent, ServiceError> {
        self.mutate("start_fee_exit", |state, now| {
            state.game.start_fee_exit(caller, token, amount, now)
        })
        .await
    }

    /// Exit a child-chain output.
    #[instrument(skip(self, tx_bytes, proof, sigs))]
    pub async fn start_exit(
        &self,
        caller: Address,
        utxo_pos: UtxoPos,
        tx_bytes: &[u8],
        proof: &[u8],
        sigs: &[u8],
    ) -> Result<RootChainEvent, ServiceError> {
        debug!("Exit tx {}", hex::encode(tx_bytes));
        self.mutate("start_exit", |state, now| {
            state.game.start_exit(caller, utxo_pos, tx_bytes, proof, sigs, now)
        })
        .await
    }

    /// Challenge a pending exit.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, tx_bytes, proof, sigs, confirmation_sig))]
    pub async fn challenge_exit(
        &self,
        caller: Address,
        challenging_pos: UtxoPos,
        exiting_input_index: u64,
        tx_bytes: &[u8],
        proof: &[u8],
        sigs: &[u8],
        confirmation_sig: &[u8],
    ) -> Result<RootChainEvent, ServiceError> {
        self.mutate("challenge_exit", |state, _| {
            state.game.challenge_exit(
                caller,
                challenging_pos,
                exiting_input_index,
                tx_bytes,
                proof,
                sigs,
                confirmation_sig,
            )
        })
        .await
    }

    /// Pay out due exits for `token`, up to the configured step budget.
    pub async fn finalize_exits(&self, token: Address) -> Result<FinalizeOutcome, ServiceError> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        let outcome = state
            .game
            .finalize_exits(token, now, self.config.finalize_step_budget)?;

        for payout in &outcome.payouts {
            state.book.apply(payout);
        }
        for event in &outcome.events {
            self.publish(event);
        }

        if outcome.processed > 0 {
            info!(
                "Finalized {} exits for {} ({} paid, more due: {})",
                outcome.processed,
                token,
                outcome.payouts.len(),
                outcome.more_due
            );
        }
        Ok(outcome)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Block root and timestamp.
    pub async fn block(&self, number: u64) -> Option<ChildBlock> {
        self.state.read().await.game.block(number)
    }

    /// Exit record and its status.
    pub async fn exit(&self, pos: UtxoPos) -> (Option<Exit>, ExitStatus) {
        let state = self.state.read().await;
        (state.game.exit(pos), state.game.exit_status(pos))
    }

    /// Next deposit block number.
    pub async fn deposit_block(&self) -> u64 {
        self.state.read().await.game.deposit_block()
    }

    /// Next child block number.
    pub async fn current_child_block(&self) -> u64 {
        self.state.read().await.game.current_child_block()
    }

    /// Next fee exit position.
    pub async fn current_fee_exit(&self) -> u64 {
        self.state.read().await.game.current_fee_exit()
    }

    /// Head of `token`'s queue.
    pub async fn next_exit(&self, token: Address) -> Result<Option<(UtxoPos, Timestamp)>, ServiceError> {
        Ok(self.state.read().await.game.next_exit(token)?)
    }

    /// Entries queued for `token`.
    pub async fn queue_len(&self, token: Address) -> Result<usize, ServiceError> {
        Ok(self.state.read().await.game.queue_len(token)?)
    }

    /// Snapshot of custody and payouts.
    pub async fn payout_book(&self) -> PayoutBook {
        self.state.read().await.book.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::{ManualClock, WEEK};
    use crate::NATIVE_TOKEN;

    const OPERATOR: Address = Address::repeat_byte(0x01);
    const ALICE: Address = Address::repeat_byte(0xa1);
    const BOB: Address = Address::repeat_byte(0xb0);
    const T0: Timestamp = 1_600_000_000;

    fn create_service(budget: usize) -> (Arc<RootChainService>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let config = ServiceConfig {
            operator: OPERATOR,
            finalize_step_budget: budget,
            ..Default::default()
        };
        (Arc::new(RootChainService::new(config, clock.clone())), clock)
    }

    async fn deposit_and_exit(service: &RootChainService, who: Address, amount: u64) -> UtxoPos {
        let RootChainEvent::Deposit { deposit_block, .. } =
            service.deposit(who, U256::from(amount)).await.unwrap()
        else {
            panic!("expected deposit event");
        };
        let pos = UtxoPos::new(deposit_block, 0, 0).unwrap();
        service
            .start_deposit_exit(who, pos, NATIVE_TOKEN, U256::from(amount))
            .await
            .unwrap();
        pos
    }

    #[tokio::test]
    async fn test_deposit_exit_and_payout() {
        let (service, clock) = create_service(16);
        let pos = deposit_and_exit(&service, ALICE, 40).await;

        assert_eq!(service.payout_book().await.custody, U256::from(40));
        assert_eq!(service.next_exit(NATIVE_TOKEN).await.unwrap(), Some((pos, T0 + 2 * WEEK)));

        clock.advance(2 * WEEK + 1);
        let outcome = service.finalize_exits(NATIVE_TOKEN).await.unwrap();
        assert_eq!(outcome.payouts.len(), 1);

        let book = service.payout_book().await;
        assert_eq!(book.balance(&ALICE), U256::from(40));
        assert_eq!(book.custody, U256::ZERO);
        assert_eq!(book.paid_out, U256::from(40));
        assert_eq!(service.exit(pos).await.1, ExitStatus::Settled);
    }

    #[tokio::test]
    async fn test_rejected_call_changes_nothing() {
        let (service, _) = create_service(16);
        service.deposit(ALICE, U256::from(5)).await.unwrap();

        let err = service
            .start_deposit_exit(BOB, UtxoPos::new(1, 0, 0).unwrap(), NATIVE_TOKEN, U256::from(5))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Game(ExitGameError::DepositMismatch(1)));
        assert_eq!(service.queue_len(NATIVE_TOKEN).await.unwrap(), 0);
        assert_eq!(service.exit(UtxoPos::new(1, 0, 0).unwrap()).await, (None, ExitStatus::Absent));
    }

    #[tokio::test]
    async fn test_finalize_budget_resumes() {
        let (service, clock) = create_service(2);
        for _ in 0..5 {
            deposit_and_exit(&service, ALICE, 1).await;
        }
        clock.advance(3 * WEEK);

        let mut rounds = 0;
        loop {
            rounds += 1;
            let outcome = service.finalize_exits(NATIVE_TOKEN).await.unwrap();
            if !outcome.more_due {
                break;
            }
        }

        assert_eq!(rounds, 3);
        assert_eq!(service.queue_len(NATIVE_TOKEN).await.unwrap(), 0);
        assert_eq!(service.payout_book().await.balance(&ALICE), U256::from(5));
    }

    #[tokio::test]
    async fn test_events_broadcast() {
        let (service, _) = create_service(16);
        let mut rx = service.subscribe();

        service.submit_block(OPERATOR, Hash::repeat_byte(3)).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            RootChainEvent::BlockSubmitted { block_number: 1000, root: Hash::repeat_byte(3), timestamp: T0 }
        );

        // Failed calls emit nothing.
        assert!(service.submit_block(ALICE, Hash::ZERO).await.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_deposits_get_distinct_blocks() {
        let (service, _) = create_service(16);

        let handles: Vec<_> = (0..20u64)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move { service.deposit(ALICE, U256::from(i + 1)).await })
            })
            .collect();

        let mut blocks = Vec::new();
        for handle in handles {
            if let RootChainEvent::Deposit { deposit_block, .. } = handle.await.unwrap().unwrap() {
                blocks.push(deposit_block);
            }
        }
        blocks.sort_unstable();

        assert_eq!(blocks, (1..=20).collect::<Vec<_>>());
        assert_eq!(service.deposit_block().await, 21);
        assert_eq!(service.payout_book().await.custody, U256::from(210));
    }

    #[tokio::test]
    async fn test_reads() {
        let (service, _) = create_service(16);
        assert_eq!(service.current_child_block().await, 1000);
        assert_eq!(service.current_fee_exit().await, 1);

        service.start_fee_exit(OPERATOR, NATIVE_TOKEN, U256::from(9)).await.unwrap();
        assert_eq!(service.current_fee_exit().await, 2);

        let token = Address::repeat_byte(0x77);
        assert!(service.next_exit(token).await.is_err());
        service.add_token(OPERATOR, token).await.unwrap();
        assert_eq!(service.next_exit(token).await.unwrap(), None);
    }

    #[test]
    fn test_config_default() {
        let config = ServiceConfig::default();
        assert_eq!(config.finalize_step_budget, DEFAULT_FINALIZE_BUDGET);
        assert_eq!(config.operator, Address::ZERO);
    }
}
