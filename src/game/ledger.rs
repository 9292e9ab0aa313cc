//! Chain Ledger
//!
//! Block-root storage. Operator-submitted blocks take the multiples of
//! `CHILD_BLOCK_INTERVAL`; deposits fill the numbers in between, one
//! pseudo-block each.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::debug;

use crate::core::clock::Timestamp;
use crate::core::hash::{deposit_commitment, Hash};
use crate::CHILD_BLOCK_INTERVAL;

/// Ledger errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Caller is not the operator.
    #[error("caller {0} is not the operator")]
    NotOperator(Address),

    /// Every deposit slot before the next child block is taken.
    #[error("deposit slots exhausted before block {0}")]
    DepositSlotsExhausted(u64),

    /// Block counter would overflow.
    #[error("block number overflow")]
    BlockNumberOverflow,
}

/// A committed block or deposit pseudo-block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildBlock {
    /// Merkle root (or deposit commitment).
    pub root: Hash,
    /// Time the root was recorded.
    pub timestamp: Timestamp,
}

/// Block table plus its two counters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainLedger {
    operator: Address,
    blocks: BTreeMap<u64, ChildBlock>,
    current_child_block: u64,
    current_deposit_block: u64,
}

impl ChainLedger {
    /// Create an empty ledger owned by `operator`.
    pub fn new(operator: Address) -> Self {
        Self {
            operator,
            blocks: BTreeMap::new(),
            current_child_block: CHILD_BLOCK_INTERVAL,
            current_deposit_block: 1,
        }
    }

    /// Operator identity.
    pub fn operator(&self) -> Address {
        self.operator
    }

    /// Fail unless `caller` is the operator.
    pub fn ensure_operator(&self, caller: Address) -> Result<(), LedgerError> {
        if caller != self.operator {
            return Err(LedgerError::NotOperator(caller));
        }
        Ok(())
    }

    /// Record an operator block at the current child-block slot.
    ///
    /// Returns the block number assigned.
    pub fn submit_block(
        &mut self,
        caller: Address,
        root: Hash,
        now: Timestamp,
    ) -> Result<u64, LedgerError> {
        self.ensure_operator(caller)?;
        let number = self.current_child_block;
        let next = number
            .checked_add(CHILD_BLOCK_INTERVAL)
            .ok_or(LedgerError::BlockNumberOverflow)?;

        self.blocks.insert(number, ChildBlock { root, timestamp: now });
        self.current_child_block = next;
        self.current_deposit_block = 1;

        debug!("Child block {} recorded with root {}", number, hex::encode(root));
        Ok(number)
    }

    /// Record a native-asset deposit as a one-leaf pseudo-block.
    ///
    /// Returns the deposit block number.
    pub fn deposit(
        &mut self,
        depositor: Address,
        token: Address,
        amount: U256,
        now: Timestamp,
    ) -> Result<u64, LedgerError> {
        if self.current_deposit_block >= CHILD_BLOCK_INTERVAL {
            return Err(LedgerError::DepositSlotsExhausted(self.current_child_block));
        }
        let number = self.deposit_block_number();
        let root = deposit_commitment(&depositor, &token, &amount);

        self.blocks.insert(number, ChildBlock { root, timestamp: now });
        self.current_deposit_block += 1;

        debug!("Deposit block {} recorded for {} ({})", number, depositor, amount);
        Ok(number)
    }

    /// Number the next deposit will receive.
    pub fn deposit_block_number(&self) -> u64 {
        self.current_child_block - CHILD_BLOCK_INTERVAL + self.current_deposit_block
    }

    /// Next operator block number.
    pub fn current_child_block(&self) -> u64 {
        self.current_child_block
    }

    /// Position of the next deposit within the current interval.
    pub fn current_deposit_block(&self) -> u64 {
        self.current_deposit_block
    }

    /// Block at `number`.
    pub fn block(&self, number: u64) -> Option<&ChildBlock> {
        self.blocks.get(&number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPERATOR: Address = Address::repeat_byte(0x01);
    const ALICE: Address = Address::repeat_byte(0xa1);

    #[test]
    fn test_initial_counters() {
        let ledger = ChainLedger::new(OPERATOR);
        assert_eq!(ledger.current_child_block(), 1000);
        assert_eq!(ledger.current_deposit_block(), 1);
        assert_eq!(ledger.deposit_block_number(), 1);
        assert!(ledger.block(1000).is_none());
    }

    #[test]
    fn test_submit_block_requires_operator() {
        let mut ledger = ChainLedger::new(OPERATOR);
        let err = ledger.submit_block(ALICE, Hash::repeat_byte(1), 10).unwrap_err();
        assert_eq!(err, LedgerError::NotOperator(ALICE));
        assert_eq!(ledger.current_child_block(), 1000);
    }

    #[test]
    fn test_submit_block_advances_and_resets_deposits() {
        let mut ledger = ChainLedger::new(OPERATOR);
        ledger.deposit(ALICE, Address::ZERO, U256::from(5), 1).unwrap();
        ledger.deposit(ALICE, Address::ZERO, U256::from(6), 2).unwrap();
        assert_eq!(ledger.deposit_block_number(), 3);

        let root = Hash::repeat_byte(7);
        assert_eq!(ledger.submit_block(OPERATOR, root, 50).unwrap(), 1000);
        assert_eq!(ledger.block(1000), Some(&ChildBlock { root, timestamp: 50 }));
        assert_eq!(ledger.current_child_block(), 2000);
        assert_eq!(ledger.current_deposit_block(), 1);
        assert_eq!(ledger.deposit_block_number(), 1001);
    }

    #[test]
    fn test_deposit_stores_commitment() {
        let mut ledger = ChainLedger::new(OPERATOR);
        let amount = U256::from(42);
        let number = ledger.deposit(ALICE, Address::ZERO, amount, 99).unwrap();

        assert_eq!(number, 1);
        let block = ledger.block(1).unwrap();
        assert_eq!(block.root, deposit_commitment(&ALICE, &Address::ZERO, &amount));
        assert_eq!(block.timestamp, 99);
    }

    #[test]
    fn test_deposit_slots_exhaust() {
        let mut ledger = ChainLedger::new(OPERATOR);
        for i in 1..CHILD_BLOCK_INTERVAL {
            assert_eq!(ledger.deposit(ALICE, Address::ZERO, U256::from(1), 0).unwrap(), i);
        }
        assert_eq!(
            ledger.deposit(ALICE, Address::ZERO, U256::from(1), 0),
            Err(LedgerError::DepositSlotsExhausted(1000))
        );

        ledger.submit_block(OPERATOR, Hash::ZERO, 1).unwrap();
        assert_eq!(ledger.deposit(ALICE, Address::ZERO, U256::from(1), 2).unwrap(), 1001);
    }
}
