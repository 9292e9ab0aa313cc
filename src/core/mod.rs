//! Core primitives.
//!
//! Hashing, position packing and time. Nothing in this module touches
//! chain state.

pub mod clock;
pub mod hash;
pub mod utxo;

// Re-export core types
pub use clock::{Clock, ManualClock, SystemClock, Timestamp, WEEK};
pub use hash::{confirmation_hash, deposit_commitment, hash_bytes, hash_pair, Hash};
pub use utxo::UtxoPos;
