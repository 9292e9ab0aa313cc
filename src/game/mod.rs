//! Exit Game Module
//!
//! Root-chain state and its transitions. Nothing here reads the clock or
//! performs I/O; time and caller are always passed in.
//!
//! ## Module Structure
//!
//! - `queue`: Per-asset min-heap of exit priorities
//! - `registry`: Exit records keyed by UTXO position
//! - `ledger`: Child blocks, deposit blocks and their counters
//! - `events`: Notifications emitted by successful calls
//! - `exit_game`: The state machine tying them together

pub mod events;
pub mod exit_game;
pub mod ledger;
pub mod queue;
pub mod registry;

// Re-export key types
pub use events::RootChainEvent;
pub use exit_game::{exitable_at, ExitGame, ExitGameError, FinalizeOutcome, Payout};
pub use ledger::{ChainLedger, ChildBlock, LedgerError};
pub use queue::{PriorityKey, PriorityQueue, QueueError, MAX_QUEUE_SIZE};
pub use registry::{Exit, ExitRegistry, ExitStatus};
