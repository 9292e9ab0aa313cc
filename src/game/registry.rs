//! Exit Registry
//!
//! Maps a UTXO position to its exit record. A record whose owner has been
//! zeroed is a tombstone: the amount stays behind so the slot can never be
//! claimed again.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde::{Serialize, Deserialize};

use crate::core::utxo::UtxoPos;

/// A registered exit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exit {
    /// Recipient of the payout; zero once challenged or finalized.
    pub owner: Address,
    /// Asset being withdrawn.
    pub token: Address,
    /// Amount being withdrawn.
    pub amount: U256,
}

/// Lifecycle of a registry slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Nothing registered.
    Absent,
    /// Waiting in a queue.
    Pending,
    /// Challenged or finalized. The two are indistinguishable here.
    Settled,
}

/// Exit records keyed by position.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExitRegistry {
    exits: BTreeMap<UtxoPos, Exit>,
}

impl ExitRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record at `pos`, if any.
    pub fn get(&self, pos: UtxoPos) -> Option<&Exit> {
        self.exits.get(&pos)
    }

    /// A slot is free while no amount has ever been recorded there.
    pub fn is_free(&self, pos: UtxoPos) -> bool {
        self.exits.get(&pos).map_or(true, |exit| exit.amount.is_zero())
    }

    /// Current status of `pos`.
    pub fn status(&self, pos: UtxoPos) -> ExitStatus {
        match self.exits.get(&pos) {
            None => ExitStatus::Absent,
            Some(exit) if exit.amount.is_zero() => ExitStatus::Absent,
            Some(exit) if exit.owner.is_zero() => ExitStatus::Settled,
            Some(_) => ExitStatus::Pending,
        }
    }

    /// Write a record. Callers check `is_free` first.
    pub(crate) fn insert(&mut self, pos: UtxoPos, exit: Exit) {
        self.exits.insert(pos, exit);
    }

    /// Zero the owner at `pos`, keeping token and amount.
    ///
    /// Returns the owner that was cleared.
    pub(crate) fn tombstone(&mut self, pos: UtxoPos) -> Option<Address> {
        let exit = self.exits.get_mut(&pos)?;
        Some(std::mem::replace(&mut exit.owner, Address::ZERO))
    }

    /// Number of slots ever written.
    pub fn len(&self) -> usize {
        self.exits.len()
    }

    /// True when no exit was ever registered.
    pub fn is_empty(&self) -> bool {
        self.exits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit(owner: u8, amount: u64) -> Exit {
        Exit {
            owner: Address::repeat_byte(owner),
            token: Address::ZERO,
            amount: U256::from(amount),
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut registry = ExitRegistry::new();
        let pos = UtxoPos(1_000_000_000);

        assert_eq!(registry.status(pos), ExitStatus::Absent);
        assert!(registry.is_free(pos));

        registry.insert(pos, exit(0xaa, 5));
        assert_eq!(registry.status(pos), ExitStatus::Pending);
        assert!(!registry.is_free(pos));

        assert_eq!(registry.tombstone(pos), Some(Address::repeat_byte(0xaa)));
        assert_eq!(registry.status(pos), ExitStatus::Settled);
        assert!(!registry.is_free(pos));

        let tomb = registry.get(pos).unwrap();
        assert!(tomb.owner.is_zero());
        assert_eq!(tomb.amount, U256::from(5));
    }

    #[test]
    fn test_tombstone_missing_slot() {
        let mut registry = ExitRegistry::new();
        assert_eq!(registry.tombstone(UtxoPos(1)), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_zero_amount_record_is_free() {
        let mut registry = ExitRegistry::new();
        registry.insert(UtxoPos(3), exit(0xbb, 0));
        assert!(registry.is_free(UtxoPos(3)));
        assert_eq!(registry.status(UtxoPos(3)), ExitStatus::Absent);
    }
}
