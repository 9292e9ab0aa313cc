//! UTXO Position Packing
//!
//! A UTXO is addressed by a single integer:
//! `block_number * 1_000_000_000 + tx_index * 10_000 + output_index`.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Radix of the block number component.
pub const BLOCK_OFFSET: u64 = 1_000_000_000;

/// Radix of the transaction index component.
pub const TX_OFFSET: u64 = 10_000;

/// Packed position of an output on the child chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtxoPos(pub u64);

impl UtxoPos {
    /// Pack `(block, tx_index, output_index)`.
    ///
    /// Returns `None` if a component would spill into its neighbour or the
    /// packed value overflows.
    pub fn new(block_number: u64, tx_index: u64, output_index: u64) -> Option<Self> {
        if tx_index >= BLOCK_OFFSET / TX_OFFSET || output_index >= TX_OFFSET {
            return None;
        }
        block_number
            .checked_mul(BLOCK_OFFSET)?
            .checked_add(tx_index * TX_OFFSET + output_index)
            .map(Self)
    }

    /// Block number component.
    #[inline]
    pub fn block_number(self) -> u64 {
        self.0 / BLOCK_OFFSET
    }

    /// Transaction index within the block.
    #[inline]
    pub fn tx_index(self) -> u64 {
        (self.0 % BLOCK_OFFSET) / TX_OFFSET
    }

    /// Output index within the transaction.
    #[inline]
    pub fn output_index(self) -> u64 {
        self.0 % TX_OFFSET
    }

    /// Raw packed value.
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for UtxoPos {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for UtxoPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.block_number(), self.tx_index(), self.output_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pack_and_unpack() {
        let pos = UtxoPos::new(1000, 3, 1).unwrap();
        assert_eq!(pos.0, 1_000_000_030_001);
        assert_eq!(pos.block_number(), 1000);
        assert_eq!(pos.tx_index(), 3);
        assert_eq!(pos.output_index(), 1);
    }

    #[test]
    fn test_deposit_position() {
        let pos = UtxoPos::new(1, 0, 0).unwrap();
        assert_eq!(pos.0, BLOCK_OFFSET);
        assert_eq!(pos.block_number(), 1);
    }

    #[test]
    fn test_component_overflow_rejected() {
        assert!(UtxoPos::new(1, 100_000, 0).is_none());
        assert!(UtxoPos::new(1, 0, 10_000).is_none());
        assert!(UtxoPos::new(u64::MAX, 0, 0).is_none());
    }

    #[test]
    fn test_fee_exit_positions_decode_to_block_zero() {
        let pos = UtxoPos(7);
        assert_eq!(pos.block_number(), 0);
        assert_eq!(pos.tx_index(), 0);
        assert_eq!(pos.output_index(), 7);
    }

    #[test]
    fn test_display() {
        assert_eq!(UtxoPos::new(2000, 5, 0).unwrap().to_string(), "2000:5:0");
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(
            block in 0u64..10_000_000_000,
            tx_index in 0u64..100_000,
            output_index in 0u64..2,
        ) {
            let pos = UtxoPos::new(block, tx_index, output_index).unwrap();
            prop_assert_eq!(pos.block_number(), block);
            prop_assert_eq!(pos.tx_index(), tx_index);
            prop_assert_eq!(pos.output_index(), output_index);
        }
    }
}
