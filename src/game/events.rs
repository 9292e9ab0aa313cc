//! Root Chain Events
//!
//! Notifications emitted by every successful state change. They are returned
//! to the caller alongside the result and broadcast to connected clients.

use alloy_primitives::{Address, U256};
use serde::{Serialize, Deserialize};

use crate::core::clock::Timestamp;
use crate::core::hash::Hash;
use crate::core::utxo::UtxoPos;

/// Event emitted by the root chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RootChainEvent {
    /// Operator committed a child block.
    BlockSubmitted {
        /// Assigned block number.
        block_number: u64,
        /// Committed Merkle root.
        root: Hash,
        /// Recording time.
        timestamp: Timestamp,
    },

    /// Value deposited into a pseudo-block.
    Deposit {
        /// Depositor.
        depositor: Address,
        /// Assigned deposit block number.
        deposit_block: u64,
        /// Asset deposited.
        token: Address,
        /// Amount deposited.
        amount: U256,
    },

    /// An exit entered a queue.
    ExitStarted {
        /// Claimed owner.
        owner: Address,
        /// Exiting position.
        utxo_pos: UtxoPos,
        /// Asset.
        token: Address,
        /// Amount.
        amount: U256,
        /// Earliest payout time.
        exitable_at: Timestamp,
    },

    /// A queue was provisioned for a new asset.
    TokenAdded {
        /// Asset identifier.
        token: Address,
    },

    /// A pending exit was invalidated.
    ExitChallenged {
        /// Invalidated position.
        utxo_pos: UtxoPos,
        /// Who proved the spend.
        challenger: Address,
    },

    /// An exit was paid out.
    ExitFinalized {
        /// Paid position.
        utxo_pos: UtxoPos,
        /// Recipient.
        owner: Address,
        /// Asset.
        token: Address,
        /// Amount paid.
        amount: U256,
    },

    /// A challenged exit left the queue without payment.
    ExitDropped {
        /// Dropped position.
        utxo_pos: UtxoPos,
    },
}

impl RootChainEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BlockSubmitted { .. } => "block_submitted",
            Self::Deposit { .. } => "deposit",
            Self::ExitStarted { .. } => "exit_started",
            Self::TokenAdded { .. } => "token_added",
            Self::ExitChallenged { .. } => "exit_challenged",
            Self::ExitFinalized { .. } => "exit_finalized",
            Self::ExitDropped { .. } => "exit_dropped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let event = RootChainEvent::ExitDropped { utxo_pos: UtxoPos(1_000_000_000) };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "exit_dropped");
        assert_eq!(json["utxo_pos"], 1_000_000_000u64);
        assert_eq!(event.name(), "exit_dropped");
    }

    #[test]
    fn test_round_trips_through_json() {
        let event = RootChainEvent::TokenAdded { token: Address::repeat_byte(0xee) };
        let back: RootChainEvent =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(back, event);
    }
}
