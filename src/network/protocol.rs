//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Messages are JSON objects tagged by `type`. Binary values (roots,
//! transactions, proofs, signatures) travel as `0x`-prefixed hex and
//! amounts as hex quantities.

use alloy_primitives::{Address, Bytes, U256};
use serde::{Serialize, Deserialize};

use crate::core::clock::Timestamp;
use crate::core::hash::Hash;
use crate::core::utxo::UtxoPos;
use crate::game::events::RootChainEvent;
use crate::game::exit_game::{ExitGameError, Payout};
use crate::game::ledger::{ChildBlock, LedgerError};
use crate::game::registry::{Exit, ExitStatus};
use crate::network::service::ServiceError;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Establish the caller identity.
    Auth(AuthRequest),

    /// Operator: commit a child-block root.
    SubmitBlock {
        /// Merkle root of the block's transactions.
        root: Hash,
    },

    /// Deposit native value.
    Deposit {
        /// Value credited to the caller.
        amount: U256,
    },

    /// Operator: provision an asset queue.
    AddToken {
        /// Asset to provision.
        token: Address,
    },

    /// Exit a deposit.
    StartDepositExit {
        /// Position of the deposit (output 0 of its deposit block).
        deposit_pos: UtxoPos,
        /// Deposited asset.
        token: Address,
        /// Deposited amount.
        amount: U256,
    },

    /// Operator: exit collected fees.
    StartFeeExit {
        /// Asset the fees are held in.
        token: Address,
        /// Amount to withdraw.
        amount: U256,
    },

    /// Exit a child-chain output.
    StartExit(StartExitRequest),

    /// Challenge a pending exit.
    ChallengeExit(ChallengeRequest),

    /// Pay out due exits.
    FinalizeExits {
        /// Queue to drain.
        token: Address,
    },

    /// Query a block.
    GetBlock {
        /// Child or deposit block number.
        block_number: u64,
    },

    /// Query an exit record.
    GetExit {
        /// Exiting position.
        utxo_pos: UtxoPos,
    },

    /// Query the head of an asset queue.
    GetNextExit {
        /// Queue to inspect.
        token: Address,
    },

    /// Query the block and fee-exit counters.
    GetCounters,

    /// Ping for latency measurement.
    Ping {
        /// Client send time, echoed back.
        timestamp: u64,
    },
}

/// Authentication request.
///
/// `token` is a JWT whose `sub` is the caller address. Servers without auth
/// configured accept `address` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// JWT.
    #[serde(default)]
    pub token: Option<String>,
    /// Declared address (development mode only).
    #[serde(default)]
    pub address: Option<Address>,
    /// Client version for compatibility check.
    pub client_version: String,
}

/// Arguments of `start_exit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartExitRequest {
    /// Position of the exiting output.
    pub utxo_pos: UtxoPos,
    /// RLP-encoded transaction.
    pub tx_bytes: Bytes,
    /// 16 concatenated sibling hashes.
    pub proof: Bytes,
    /// `[sig1, sig2, conf_sig1, conf_sig2]`.
    pub sigs: Bytes,
}

/// Arguments of `challenge_exit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRequest {
    /// Position of the spending transaction.
    pub challenging_pos: UtxoPos,
    /// Which input of the spending transaction consumes the exiting output.
    pub exiting_input_index: u64,
    /// RLP-encoded spending transaction.
    pub tx_bytes: Bytes,
    /// Inclusion proof of the spending transaction.
    pub proof: Bytes,
    /// Spending transaction signatures (no confirmations).
    pub sigs: Bytes,
    /// Exit owner's confirmation of the spend.
    pub confirmation_sig: Bytes,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// A mutation succeeded.
    Accepted(RootChainEvent),

    /// Outcome of a finalize request.
    Finalized(FinalizeSummary),

    /// Event broadcast to every client.
    Event(RootChainEvent),

    /// Block query result.
    Block {
        /// Requested number.
        block_number: u64,
        /// Root and timestamp, if recorded.
        block: Option<ChildBlock>,
    },

    /// Exit query result.
    Exit {
        /// Requested position.
        utxo_pos: UtxoPos,
        /// Stored record, tombstones included.
        exit: Option<Exit>,
        /// Lifecycle state.
        status: ExitStatus,
    },

    /// Queue head query result.
    NextExit {
        /// Queried asset.
        token: Address,
        /// Head position, `None` for an empty queue.
        utxo_pos: Option<UtxoPos>,
        /// When the head becomes payable.
        exitable_at: Option<Timestamp>,
    },

    /// Counter query result.
    Counters(Counters),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time in milliseconds.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why the server is going away.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Caller address if successful.
    pub address: Option<Address>,
    /// Connection identifier.
    pub connection_id: Option<String>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Summary of one bounded finalization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeSummary {
    /// Asset finalized.
    pub token: Address,
    /// Entries popped.
    pub processed: usize,
    /// Payouts made.
    pub payouts: Vec<Payout>,
    /// Whether due exits remain.
    pub more_due: bool,
}

/// Root-chain counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Next operator block number.
    pub current_child_block: u64,
    /// Next deposit block number.
    pub deposit_block: u64,
    /// Next fee exit position.
    pub current_fee_exit: u64,
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Build an error message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl From<&ServiceError> for ServerError {
    fn from(err: &ServiceError) -> Self {
        let code = match err {
            ServiceError::Game(ExitGameError::Ledger(LedgerError::NotOperator(_))) => ErrorCode::Unauthorized,
            ServiceError::Game(ExitGameError::MissingQueue(_)) => ErrorCode::UnknownToken,
            ServiceError::Game(_) => ErrorCode::Rejected,
            ServiceError::InvalidConfig(_) => ErrorCode::InternalError,
        };
        Self::new(code, err.to_string())
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid JWT token (signature, format, claims).
    InvalidToken,
    /// Invalid input.
    InvalidInput,
    /// Caller is not the operator.
    Unauthorized,
    /// Asset has no exit queue.
    UnknownToken,
    /// The root chain rejected the call.
    Rejected,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// True for messages that need an authenticated caller.
    pub fn requires_auth(&self) -> bool {
        !matches!(
            self,
            Self::Auth(_)
                | Self::Ping { .. }
                | Self::GetBlock { .. }
                | Self::GetExit { .. }
                | Self::GetNextExit { .. }
                | Self::GetCounters
        )
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_json_roundtrip() {
        let msg = ClientMessage::StartExit(StartExitRequest {
            utxo_pos: UtxoPos::new(1000, 2, 1).unwrap(),
            tx_bytes: Bytes::from(vec![0xc0]),
            proof: Bytes::from(vec![0u8; 512]),
            sigs: Bytes::from(vec![1u8; 195]),
        });

        let json = msg.to_json().unwrap();
        let parsed = ClientMessage::from_json(&json).unwrap();

        if let ClientMessage::StartExit(req) = parsed {
            assert_eq!(req.utxo_pos, UtxoPos(1_000_000_020_001));
            assert_eq!(req.tx_bytes.as_ref(), &[0xc0]);
            assert_eq!(req.proof.len(), 512);
            assert_eq!(req.sigs.len(), 195);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_client_message_from_handwritten_json() {
        let json = r#"{"type":"deposit","amount":"0x2386f26fc10000"}"#;
        match ClientMessage::from_json(json).unwrap() {
            ClientMessage::Deposit { amount } => {
                assert_eq!(amount, U256::from(10_000_000_000_000_000u64));
            }
            other => panic!("Wrong message type: {:?}", other),
        }

        let json = r#"{"type":"get_counters"}"#;
        assert!(matches!(ClientMessage::from_json(json).unwrap(), ClientMessage::GetCounters));

        let json = r#"{"type":"auth","client_version":"1.0","address":"0x00000000000000000000000000000000000000a1"}"#;
        match ClientMessage::from_json(json).unwrap() {
            ClientMessage::Auth(auth) => {
                assert!(auth.token.is_none());
                assert_eq!(auth.address, Some(Address::with_last_byte(0xa1)));
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_server_message_event_roundtrip() {
        let msg = ServerMessage::Event(RootChainEvent::ExitChallenged {
            utxo_pos: UtxoPos(1_000_000_000),
            challenger: Address::repeat_byte(0xb0),
        });

        let json = msg.to_json().unwrap();
        let parsed = ServerMessage::from_json(&json).unwrap();

        if let ServerMessage::Event(RootChainEvent::ExitChallenged { utxo_pos, .. }) = parsed {
            assert_eq!(utxo_pos, UtxoPos(1_000_000_000));
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"withdraw_everything"}"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_requires_auth() {
        assert!(!ClientMessage::GetCounters.requires_auth());
        assert!(!ClientMessage::Ping { timestamp: 1 }.requires_auth());
        assert!(ClientMessage::Deposit { amount: U256::from(1) }.requires_auth());
        assert!(ClientMessage::FinalizeExits { token: Address::ZERO }.requires_auth());
    }

    #[test]
    fn test_error_code_mapping() {
        let not_operator = ServiceError::Game(ExitGameError::Ledger(LedgerError::NotOperator(Address::ZERO)));
        assert_eq!(ServerError::from(&not_operator).code, ErrorCode::Unauthorized);

        let rejected = ServiceError::Game(ExitGameError::ZeroAmount);
        let error = ServerError::from(&rejected);
        assert_eq!(error.code, ErrorCode::Rejected);
        assert_eq!(error.message, "exit amount is zero");
    }
}
