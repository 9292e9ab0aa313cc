//! Exit Proof Checks
//!
//! Everything needed to decide whether an exit or challenge is backed by
//! child-chain data:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PROOF CHECKS                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  transaction.rs - RLP codec for child-chain transactions    │
//! │  merkle.rs      - Depth-16 Keccak Merkle membership         │
//! │  signature.rs   - ecrecover + signature/confirmation pairs  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod merkle;
pub mod signature;
pub mod transaction;

// Re-export key types
pub use merkle::{check_membership, FixedMerkleTree, PROOF_LEN, TREE_DEPTH};
pub use signature::{check_sigs, recover, secret_key_address, sign, SIGNATURE_LEN};
pub use transaction::{
    challenging_utxo_pos, exiting_tx_fields, ExitingOutput, PlasmaTransaction, TxDecodeError,
    TxInput, TxOutput,
};
