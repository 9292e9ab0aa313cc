//! # Plasma Root Chain
//!
//! Root-chain exit game for a Plasma MVP child chain: operator block
//! commitments, deposits, priority-ordered exits, fraud challenges and
//! time-locked finalization.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PLASMA ROOT CHAIN                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Primitives                              │
//! │  ├── hash.rs      - Keccak-256 helpers and commitments      │
//! │  ├── utxo.rs      - Packed UTXO positions                   │
//! │  └── clock.rs     - Injected time source                    │
//! │                                                             │
//! │  proof/           - Exit evidence                           │
//! │  ├── transaction.rs - RLP transaction codec                 │
//! │  ├── merkle.rs    - Depth-16 membership proofs              │
//! │  └── signature.rs - Signature recovery and checks           │
//! │                                                             │
//! │  game/            - Exit game (pure state machine)          │
//! │  ├── ledger.rs    - Child and deposit blocks                │
//! │  ├── registry.rs  - Exit records                            │
//! │  ├── queue.rs     - Per-asset priority queues               │
//! │  ├── events.rs    - Emitted notifications                   │
//! │  └── exit_game.rs - Deposit, exit, challenge, finalize      │
//! │                                                             │
//! │  network/         - Async surface                           │
//! │  ├── service.rs   - Serialized access, payouts, events      │
//! │  ├── protocol.rs  - JSON message types                      │
//! │  ├── auth.rs      - JWT caller identity                     │
//! │  └── server.rs    - WebSocket server                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! `core/`, `proof/` and `game/` never read the clock or do I/O. The caller
//! and the current time are arguments, so a sequence of calls always
//! produces the same state and events.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod proof;

use alloy_primitives::Address;

// Re-export commonly used types
pub use core::clock::{Clock, ManualClock, SystemClock, Timestamp, WEEK};
pub use core::hash::Hash;
pub use core::utxo::UtxoPos;
pub use game::{ExitGame, ExitGameError, RootChainEvent, MAX_QUEUE_SIZE};
pub use network::{RootChainServer, RootChainService};
pub use proof::PlasmaTransaction;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Spacing between operator block numbers. Deposit blocks fill the gaps.
pub const CHILD_BLOCK_INTERVAL: u64 = 1000;

/// Asset identifier of the native asset.
pub const NATIVE_TOKEN: Address = Address::ZERO;

/// Minimum wait between starting an exit and its payout.
pub const MIN_EXIT_PERIOD: Timestamp = WEEK;

/// Age after which an output's exit only waits `MIN_EXIT_PERIOD`.
pub const UTXO_EXIT_PERIOD: Timestamp = 2 * WEEK;
