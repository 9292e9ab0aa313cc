//! Exit Game
//!
//! The root-chain state machine. Owns the block ledger, the exit registry
//! and one priority queue per provisioned asset.
//!
//! ## Exit lifecycle
//!
//! ```text
//! absent ──start_*_exit──► pending ──challenge_exit──► settled (no payout)
//!                             │
//!                             └──finalize_exits──────► settled (paid)
//! ```
//!
//! Every operation takes the caller and the current time explicitly and
//! validates everything before it writes anything, so a failed call leaves
//! no trace.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::clock::Timestamp;
use crate::core::hash::{confirmation_hash, deposit_commitment, hash_bytes, ConcatHasher, Hash};
use crate::core::utxo::UtxoPos;
use crate::game::events::RootChainEvent;
use crate::game::ledger::{ChainLedger, ChildBlock, LedgerError};
use crate::game::queue::{PriorityKey, PriorityQueue, QueueError};
use crate::game::registry::{Exit, ExitRegistry, ExitStatus};
use crate::proof::merkle::{check_membership, PROOF_LEN};
use crate::proof::signature::{check_sigs, recover, SIGNATURE_LEN};
use crate::proof::transaction::{challenging_utxo_pos, exiting_tx_fields, TxDecodeError};
use crate::{CHILD_BLOCK_INTERVAL, MIN_EXIT_PERIOD, NATIVE_TOKEN, UTXO_EXIT_PERIOD};

/// Bytes of signatures committed into a transaction's Merkle leaf.
pub const LEAF_SIGS_LEN: usize = 2 * SIGNATURE_LEN;

/// Full `[sig1, sig2, conf_sig1, conf_sig2]` blob length.
pub const MAX_EXIT_SIGS_LEN: usize = 4 * SIGNATURE_LEN;

/// Exit game errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExitGameError {
    /// Ledger rejected the call.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Transaction bytes did not decode.
    #[error("transaction: {0}")]
    Transaction(#[from] TxDecodeError),

    /// Asset queue is full.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// No block recorded at this number.
    #[error("unknown block {0}")]
    UnknownBlock(u64),

    /// Position does not point at a deposit pseudo-block.
    #[error("block {0} is not a deposit block")]
    NotDepositBlock(u64),

    /// Deposit commitment does not match the stored root.
    #[error("deposit commitment mismatch at block {0}")]
    DepositMismatch(u64),

    /// Caller does not own the exiting output.
    #[error("caller {caller} does not own output (owner {owner})")]
    NotOwner {
        /// Who called.
        caller: Address,
        /// Who the transaction pays.
        owner: Address,
    },

    /// Signature blob has the wrong size.
    #[error("malformed signatures ({0} bytes)")]
    MalformedSignatures(usize),

    /// Transaction and confirmation signers disagree.
    #[error("signature check failed")]
    InvalidSignatures,

    /// Proof is not exactly 16 hashes.
    #[error("malformed merkle proof ({0} bytes)")]
    MalformedProof(usize),

    /// Leaf is not in the block.
    #[error("merkle proof does not match block root")]
    InvalidProof,

    /// Asset has no queue.
    #[error("no exit queue for token {0}")]
    MissingQueue(Address),

    /// Asset already has a queue.
    #[error("token {0} already added")]
    TokenAlreadyAdded(Address),

    /// Exit amount is zero.
    #[error("exit amount is zero")]
    ZeroAmount,

    /// Position already used by an exit.
    #[error("exit already registered at {0}")]
    ExitExists(UtxoPos),

    /// Nothing pending at the challenged position.
    #[error("no pending exit at {0}")]
    ExitNotPending(UtxoPos),

    /// Confirmation was not signed by the exit owner.
    #[error("confirmation signature does not match exit owner")]
    WrongConfirmationSigner,

    /// Only the native asset can be paid out.
    #[error("token {0} cannot be paid out")]
    UnsupportedToken(Address),
}

/// Value owed to an exit owner after finalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Paid position.
    pub utxo_pos: UtxoPos,
    /// Recipient.
    pub owner: Address,
    /// Asset.
    pub token: Address,
    /// Amount.
    pub amount: U256,
}

/// Result of one bounded finalization pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeOutcome {
    /// Transfers the host ledger must perform, in queue order.
    pub payouts: Vec<Payout>,
    /// One event per popped entry.
    pub events: Vec<RootChainEvent>,
    /// Entries popped, paid or dropped.
    pub processed: usize,
    /// True when the step budget ran out with due exits left.
    pub more_due: bool,
}

/// Root-chain state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExitGame {
    ledger: ChainLedger,
    registry: ExitRegistry,
    queues: BTreeMap<Address, PriorityQueue>,
    current_fee_exit: u64,
}

impl ExitGame {
    /// Create a root chain operated by `operator` with the native asset provisioned.
    pub fn new(operator: Address) -> Self {
        let mut queues = BTreeMap::new();
        queues.insert(NATIVE_TOKEN, PriorityQueue::new());

        Self {
            ledger: ChainLedger::new(operator),
            registry: ExitRegistry::new(),
            queues,
            current_fee_exit: 1,
        }
    }

    // =========================================================================
    // Operator
    // =========================================================================

    /// Commit a child-block root.
    pub fn submit_block(
        &mut self,
        caller: Address,
        root: Hash,
        now: Timestamp,
    ) -> Result<RootChainEvent, ExitGameError> {
        let block_number = self.ledger.submit_block(caller, root, now)?;
        Ok(RootChainEvent::BlockSubmitted { block_number, root, timestamp: now })
    }

    /// Provision a queue for another asset.
    pub fn add_token(&mut self, caller: Address, token: Address) -> Result<RootChainEvent, ExitGameError> {
        self.ledger.ensure_operator(caller)?;
        if self.queues.contains_key(&token) {
            return Err(ExitGameError::TokenAlreadyAdded(token));
        }
        self.queues.insert(token, PriorityQueue::new());

        info!("Exit queue added for token {}", token);
        Ok(RootChainEvent::TokenAdded { token })
    }

    /// Operator withdrawal of collected fees, queued like any other exit.
    ///
    /// Fee exits take synthetic positions from a counter starting at 1.
    pub fn start_fee_exit(
        &mut self,
        caller: Address,
        token: Address,
        amount: U256,
        now: Timestamp,
    ) -> Result<RootChainEvent, ExitGameError> {
        self.ledger.ensure_operator(caller)?;
        let pos = UtxoPos(self.current_fee_exit);
        let event = self.add_exit_to_queue(pos, caller, token, amount, now.saturating_add(1), now)?;
        self.current_fee_exit += 1;
        Ok(event)
    }

    // =========================================================================
    // Deposits
    // =========================================================================

    /// Record a native-asset deposit by `caller`.
    pub fn deposit(
        &mut self,
        caller: Address,
        amount: U256,
        now: Timestamp,
    ) -> Result<RootChainEvent, ExitGameError> {
        let deposit_block = self.ledger.deposit(caller, NATIVE_TOKEN, amount, now)?;
        Ok(RootChainEvent::Deposit {
            depositor: caller,
            deposit_block,
            token: NATIVE_TOKEN,
            amount,
        })
    }

    /// Exit a deposit. The stored root is the only proof needed.
    pub fn start_deposit_exit(
        &mut self,
        caller: Address,
        deposit_pos: UtxoPos,
        token: Address,
        amount: U256,
        now: Timestamp,
    ) -> Result<RootChainEvent, ExitGameError> {
        let block_number = deposit_pos.block_number();
        if block_number % CHILD_BLOCK_INTERVAL == 0 {
            return Err(ExitGameError::NotDepositBlock(block_number));
        }
        let block = self.block_or_err(block_number)?;

        if deposit_commitment(&caller, &token, &amount) != block.root {
            return Err(ExitGameError::DepositMismatch(block_number));
        }

        self.add_exit_to_queue(deposit_pos, caller, token, amount, block.timestamp, now)
    }

    // =========================================================================
    // Exits
    // =========================================================================

    /// Exit an output of a transaction included in a child block.
    ///
    /// `sigs` is `[sig1, sig2, conf_sig1, conf_sig2]`; the first two are
    /// committed into the Merkle leaf together with the transaction hash.
    pub fn start_exit(
        &mut self,
        caller: Address,
        utxo_pos: UtxoPos,
        tx_bytes: &[u8],
        proof: &[u8],
        sigs: &[u8],
        now: Timestamp,
    ) -> Result<RootChainEvent, ExitGameError> {
        let block_number = utxo_pos.block_number();
        let output = exiting_tx_fields(tx_bytes, utxo_pos.output_index())?;
        if caller != output.owner {
            return Err(ExitGameError::NotOwner { caller, owner: output.owner });
        }

        let block = self.block_or_err(block_number)?;
        if sigs.len() < LEAF_SIGS_LEN || sigs.len() > MAX_EXIT_SIGS_LEN {
            return Err(ExitGameError::MalformedSignatures(sigs.len()));
        }

        let tx_hash = hash_bytes(tx_bytes);
        let leaf = ConcatHasher::new()
            .update(tx_hash.as_slice())
            .update(&sigs[..LEAF_SIGS_LEN])
            .finalize();

        if !check_sigs(&tx_hash, &block.root, output.input_count, sigs) {
            return Err(ExitGameError::InvalidSignatures);
        }
        verify_inclusion(&leaf, utxo_pos.tx_index(), &block.root, proof)?;

        self.add_exit_to_queue(utxo_pos, caller, output.token, output.amount, block.timestamp, now)
    }

    /// Cancel a pending exit by proving its owner confirmed a later spend.
    ///
    /// `challenging_pos` locates the spending transaction; its input
    /// `exiting_input_index` names the output under exit.
    #[allow(clippy::too_many_arguments)]
    pub fn challenge_exit(
        &mut self,
        challenger: Address,
        challenging_pos: UtxoPos,
        exiting_input_index: u64,
        tx_bytes: &[u8],
        proof: &[u8],
        sigs: &[u8],
        confirmation_sig: &[u8],
    ) -> Result<RootChainEvent, ExitGameError> {
        let exiting_pos = challenging_utxo_pos(tx_bytes, exiting_input_index)?;
        let block = self.block_or_err(challenging_pos.block_number())?;
        if sigs.len() > LEAF_SIGS_LEN {
            return Err(ExitGameError::MalformedSignatures(sigs.len()));
        }

        let owner = match self.registry.get(exiting_pos) {
            Some(exit) if self.registry.status(exiting_pos) == ExitStatus::Pending => exit.owner,
            _ => return Err(ExitGameError::ExitNotPending(exiting_pos)),
        };

        let tx_hash = hash_bytes(tx_bytes);
        let confirmation = confirmation_hash(&tx_hash, &block.root);
        if recover(&confirmation, confirmation_sig) != Some(owner) {
            return Err(ExitGameError::WrongConfirmationSigner);
        }

        let leaf = ConcatHasher::new().update(tx_hash.as_slice()).update(sigs).finalize();
        verify_inclusion(&leaf, challenging_pos.tx_index(), &block.root, proof)?;

        self.registry.tombstone(exiting_pos);
        info!("Exit {} challenged by {}", exiting_pos, challenger);
        Ok(RootChainEvent::ExitChallenged { utxo_pos: exiting_pos, challenger })
    }

    /// Pop due exits for `token`, oldest first, for at most `max_steps` entries.
    ///
    /// An exit is due once its `exitable_at` is strictly before `now`.
    /// Challenged entries are popped without a payout.
    pub fn finalize_exits(
        &mut self,
        token: Address,
        now: Timestamp,
        max_steps: usize,
    ) -> Result<FinalizeOutcome, ExitGameError> {
        let queue = self
            .queues
            .get_mut(&token)
            .ok_or(ExitGameError::MissingQueue(token))?;
        let mut outcome = FinalizeOutcome::default();

        while outcome.processed < max_steps {
            let Some(key) = queue.get_min() else { break };
            if key.exitable_at() >= now {
                break;
            }
            if token != NATIVE_TOKEN {
                return Err(ExitGameError::UnsupportedToken(token));
            }

            queue.del_min();
            let utxo_pos = key.utxo_pos();
            let exit = self.registry.get(utxo_pos).copied().unwrap_or_default();
            self.registry.tombstone(utxo_pos);

            if exit.owner.is_zero() {
                debug!("Dropping challenged exit {}", utxo_pos);
                outcome.events.push(RootChainEvent::ExitDropped { utxo_pos });
            } else {
                debug!("Finalizing exit {} for {} ({})", utxo_pos, exit.owner, exit.amount);
                outcome.payouts.push(Payout {
                    utxo_pos,
                    owner: exit.owner,
                    token: exit.token,
                    amount: exit.amount,
                });
                outcome.events.push(RootChainEvent::ExitFinalized {
                    utxo_pos,
                    owner: exit.owner,
                    token: exit.token,
                    amount: exit.amount,
                });
            }
            outcome.processed += 1;
        }

        outcome.more_due = queue.get_min().map_or(false, |key| key.exitable_at() < now);
        Ok(outcome)
    }

    /// Single gate through which every exit enters a queue.
    fn add_exit_to_queue(
        &mut self,
        utxo_pos: UtxoPos,
        owner: Address,
        token: Address,
        amount: U256,
        created_at: Timestamp,
        now: Timestamp,
    ) -> Result<RootChainEvent, ExitGameError> {
        let queue = self
            .queues
            .get_mut(&token)
            .ok_or(ExitGameError::MissingQueue(token))?;

        let exitable_at = exitable_at(created_at, now);
        if amount.is_zero() {
            return Err(ExitGameError::ZeroAmount);
        }
        if !self.registry.is_free(utxo_pos) {
            return Err(ExitGameError::ExitExists(utxo_pos));
        }

        queue.insert(PriorityKey::new(exitable_at, utxo_pos))?;
        self.registry.insert(utxo_pos, Exit { owner, token, amount });

        info!("Exit {} started by {} for {} (exitable at {})", utxo_pos, owner, amount, exitable_at);
        Ok(RootChainEvent::ExitStarted { owner, utxo_pos, token, amount, exitable_at })
    }

    fn block_or_err(&self, number: u64) -> Result<ChildBlock, ExitGameError> {
        self.ledger
            .block(number)
            .copied()
            .ok_or(ExitGameError::UnknownBlock(number))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Block root and timestamp.
    pub fn block(&self, number: u64) -> Option<ChildBlock> {
        self.ledger.block(number).copied()
    }

    /// Exit record at `pos`, including tombstones.
    pub fn exit(&self, pos: UtxoPos) -> Option<Exit> {
        self.registry.get(pos).copied()
    }

    /// Lifecycle state of `pos`.
    pub fn exit_status(&self, pos: UtxoPos) -> ExitStatus {
        self.registry.status(pos)
    }

    /// Number the next deposit will receive.
    pub fn deposit_block(&self) -> u64 {
        self.ledger.deposit_block_number()
    }

    /// Number the next operator block will receive.
    pub fn current_child_block(&self) -> u64 {
        self.ledger.current_child_block()
    }

    /// Position the next fee exit will take.
    pub fn current_fee_exit(&self) -> u64 {
        self.current_fee_exit
    }

    /// Operator identity.
    pub fn operator(&self) -> Address {
        self.ledger.operator()
    }

    /// Head of `token`'s queue as `(position, exitable_at)`.
    pub fn next_exit(&self, token: Address) -> Result<Option<(UtxoPos, Timestamp)>, ExitGameError> {
        let queue = self.queues.get(&token).ok_or(ExitGameError::MissingQueue(token))?;
        Ok(queue.get_min().map(|key| (key.utxo_pos(), key.exitable_at())))
    }

    /// Entries queued for `token`, challenged ones included.
    pub fn queue_len(&self, token: Address) -> Result<usize, ExitGameError> {
        self.queues
            .get(&token)
            .map(PriorityQueue::len)
            .ok_or(ExitGameError::MissingQueue(token))
    }

    /// Provisioned assets.
    pub fn tokens(&self) -> impl Iterator<Item = Address> + '_ {
        self.queues.keys().copied()
    }
}

/// `max(created_at + 2 weeks, now + 1 week)`.
pub fn exitable_at(created_at: Timestamp, now: Timestamp) -> Timestamp {
    created_at
        .saturating_add(UTXO_EXIT_PERIOD)
        .max(now.saturating_add(MIN_EXIT_PERIOD))
}

fn verify_inclusion(leaf: &Hash, tx_index: u64, root: &Hash, proof: &[u8]) -> Result<(), ExitGameError> {
    if proof.len() != PROOF_LEN {
        return Err(ExitGameError::MalformedProof(proof.len()));
    }
    if !check_membership(leaf, tx_index, root, proof) {
        return Err(ExitGameError::InvalidProof);
    }
    Ok(())
}
