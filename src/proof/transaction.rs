//! Child-Chain Transaction Codec
//!
//! A child-chain transaction is an RLP list of eleven fields:
//!
//! ```text
//! [blknum1, txindex1, oindex1,
//!  blknum2, txindex2, oindex2,
//!  token,
//!  newowner1, amount1,
//!  newowner2, amount2]
//! ```
//!
//! The exit game only ever needs two views of it: the output being exited
//! and the position of an input being spent.

use alloy_primitives::{Address, U256};
use alloy_rlp::{Encodable, Header};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::utxo::UtxoPos;

/// Number of RLP items in an encoded transaction.
pub const TX_FIELD_COUNT: usize = 11;

/// Transaction decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxDecodeError {
    /// RLP structure is malformed.
    #[error("malformed rlp: {0}")]
    Rlp(String),

    /// Top-level item is not a list.
    #[error("transaction is not an rlp list")]
    NotAList,

    /// Bytes remain after the list.
    #[error("{0} trailing bytes after transaction")]
    TrailingBytes(usize),

    /// Wrong number of list items.
    #[error("expected {TX_FIELD_COUNT} fields, got {0}")]
    FieldCount(usize),

    /// Integer field wider than its target type.
    #[error("field {0} does not fit its integer type")]
    IntegerOverflow(usize),

    /// Address field is not 20 bytes.
    #[error("field {index} is {len} bytes, expected a 20-byte address")]
    BadAddress {
        /// Field position.
        index: usize,
        /// Actual length.
        len: usize,
    },

    /// Output or input selector outside {0, 1}.
    #[error("output index {0} is not 0 or 1")]
    InvalidOutputIndex(u64),
}

impl From<alloy_rlp::Error> for TxDecodeError {
    fn from(err: alloy_rlp::Error) -> Self {
        Self::Rlp(err.to_string())
    }
}

/// Reference to a spent output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Block number of the spent output.
    pub block_number: u64,
    /// Transaction index within that block.
    pub tx_index: u64,
    /// Output index within that transaction.
    pub output_index: u64,
}

/// A newly created output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// New owner.
    pub owner: Address,
    /// Amount assigned.
    pub amount: U256,
}

/// Fields of the output an exit claims.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitingOutput {
    /// Owner of the output.
    pub owner: Address,
    /// Asset of the transaction.
    pub token: Address,
    /// Amount of the output.
    pub amount: U256,
    /// `blknum1 * blknum2`: non-zero iff both inputs reference a block.
    pub input_count: u128,
}

/// Decoded child-chain transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlasmaTransaction {
    /// The two inputs.
    pub inputs: [TxInput; 2],
    /// Asset being moved.
    pub token: Address,
    /// The two outputs.
    pub outputs: [TxOutput; 2],
}

impl PlasmaTransaction {
    /// Decode an RLP-encoded transaction.
    ///
    /// Integer fields tolerate leading zero bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, TxDecodeError> {
        let mut buf = bytes;
        let header = Header::decode(&mut buf)?;
        if !header.list {
            return Err(TxDecodeError::NotAList);
        }
        if buf.len() < header.payload_length {
            return Err(TxDecodeError::Rlp("list payload truncated".into()));
        }
        if buf.len() > header.payload_length {
            return Err(TxDecodeError::TrailingBytes(buf.len() - header.payload_length));
        }

        let mut items = Vec::with_capacity(TX_FIELD_COUNT);
        while !buf.is_empty() {
            items.push(Header::decode_bytes(&mut buf, false)?);
        }
        if items.len() != TX_FIELD_COUNT {
            return Err(TxDecodeError::FieldCount(items.len()));
        }

        let input = |base: usize| -> Result<TxInput, TxDecodeError> {
            Ok(TxInput {
                block_number: be_u64(items[base], base)?,
                tx_index: be_u64(items[base + 1], base + 1)?,
                output_index: be_u64(items[base + 2], base + 2)?,
            })
        };
        let output = |base: usize| -> Result<TxOutput, TxDecodeError> {
            Ok(TxOutput {
                owner: address(items[base], base)?,
                amount: be_u256(items[base + 1], base + 1)?,
            })
        };

        Ok(Self {
            inputs: [input(0)?, input(3)?],
            token: address(items[6], 6)?,
            outputs: [output(7)?, output(9)?],
        })
    }

    /// Canonical RLP encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(160);
        for input in &self.inputs {
            input.block_number.encode(&mut payload);
            input.tx_index.encode(&mut payload);
            input.output_index.encode(&mut payload);
        }
        self.token.encode(&mut payload);
        for output in &self.outputs {
            output.owner.encode(&mut payload);
            output.amount.encode(&mut payload);
        }

        let mut out = Vec::with_capacity(payload.len() + 3);
        Header { list: true, payload_length: payload.len() }.encode(&mut out);
        out.extend_from_slice(&payload);
        out
    }

    /// `blknum1 * blknum2`.
    pub fn input_count(&self) -> u128 {
        u128::from(self.inputs[0].block_number) * u128::from(self.inputs[1].block_number)
    }

    /// View of output `output_index` as an exit claim.
    pub fn exiting_output(&self, output_index: u64) -> Result<ExitingOutput, TxDecodeError> {
        let output = self.outputs[selector(output_index)?];
        Ok(ExitingOutput {
            owner: output.owner,
            token: self.token,
            amount: output.amount,
            input_count: self.input_count(),
        })
    }

    /// Packed position of the output spent by input `input_index`.
    ///
    /// The three input fields are summed, so a spender may carry the whole
    /// packed position in the block field.
    pub fn spent_utxo_pos(&self, input_index: u64) -> Result<UtxoPos, TxDecodeError> {
        let index = selector(input_index)?;
        let input = self.inputs[index];
        input
            .block_number
            .checked_add(input.tx_index)
            .and_then(|sum| sum.checked_add(input.output_index))
            .map(UtxoPos)
            .ok_or(TxDecodeError::IntegerOverflow(index * 3))
    }
}

/// Decode `tx` and return the exiting output's `(owner, token, amount, input_count)`.
pub fn exiting_tx_fields(tx: &[u8], output_index: u64) -> Result<ExitingOutput, TxDecodeError> {
    // Reject the selector before paying for a decode.
    selector(output_index)?;
    PlasmaTransaction::decode(tx)?.exiting_output(output_index)
}

/// Decode `tx` and return the position its input `input_index` spends.
pub fn challenging_utxo_pos(tx: &[u8], input_index: u64) -> Result<UtxoPos, TxDecodeError> {
    selector(input_index)?;
    PlasmaTransaction::decode(tx)?.spent_utxo_pos(input_index)
}

fn selector(index: u64) -> Result<usize, TxDecodeError> {
    match index {
        0 => Ok(0),
        1 => Ok(1),
        other => Err(TxDecodeError::InvalidOutputIndex(other)),
    }
}

fn be_u64(bytes: &[u8], index: usize) -> Result<u64, TxDecodeError> {
    let value = be_u256(bytes, index)?;
    u64::try_from(value).map_err(|_| TxDecodeError::IntegerOverflow(index))
}

fn be_u256(bytes: &[u8], index: usize) -> Result<U256, TxDecodeError> {
    U256::try_from_be_slice(bytes).ok_or(TxDecodeError::IntegerOverflow(index))
}

fn address(bytes: &[u8], index: usize) -> Result<Address, TxDecodeError> {
    if bytes.len() != 20 {
        return Err(TxDecodeError::BadAddress { index, len: bytes.len() });
    }
    Ok(Address::from_slice(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, hex};

    const OWNER: Address = address!("627306090abab3a6e1400e9345bc60c78a8bef57");

    fn sample() -> PlasmaTransaction {
        PlasmaTransaction {
            inputs: [
                TxInput { block_number: 1000, tx_index: 2, output_index: 1 },
                TxInput { block_number: 3, tx_index: 0, output_index: 0 },
            ],
            token: Address::ZERO,
            outputs: [
                TxOutput { owner: OWNER, amount: U256::from(10_000_000_000_000_000u64) },
                TxOutput { owner: Address::repeat_byte(0x22), amount: U256::from(5) },
            ],
        }
    }

    #[test]
    fn test_encode_decode() {
        let tx = sample();
        let decoded = PlasmaTransaction::decode(&tx.encode()).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_decodes_zero_bytes_as_integers() {
        // Legacy encoders write integer zero as the single byte 0x00.
        let raw = hex!(
            "f84e01000000000094000000000000000000000000000000000000000094627306090abab3a6e1400e9345bc60c78a8bef57872386f26fc1000094000000000000000000000000000000000000000000"
        );
        let tx = PlasmaTransaction::decode(&raw).unwrap();

        assert_eq!(tx.inputs[0].block_number, 1);
        assert_eq!(tx.inputs[1].block_number, 0);
        assert_eq!(tx.token, Address::ZERO);
        assert_eq!(tx.outputs[0].owner, OWNER);
        assert_eq!(tx.outputs[0].amount, U256::from(10_000_000_000_000_000u64));
        assert_eq!(tx.outputs[1].amount, U256::ZERO);
        assert_eq!(tx.input_count(), 0);
    }

    #[test]
    fn test_exiting_tx_fields() {
        let tx = sample();
        let bytes = tx.encode();

        let first = exiting_tx_fields(&bytes, 0).unwrap();
        assert_eq!(first.owner, OWNER);
        assert_eq!(first.token, Address::ZERO);
        assert_eq!(first.amount, U256::from(10_000_000_000_000_000u64));
        assert_eq!(first.input_count, 3000);

        let second = exiting_tx_fields(&bytes, 1).unwrap();
        assert_eq!(second.owner, Address::repeat_byte(0x22));
        assert_eq!(second.amount, U256::from(5));
    }

    #[test]
    fn test_output_index_must_be_binary() {
        let bytes = sample().encode();
        assert_eq!(exiting_tx_fields(&bytes, 2), Err(TxDecodeError::InvalidOutputIndex(2)));
        assert_eq!(challenging_utxo_pos(&bytes, 7), Err(TxDecodeError::InvalidOutputIndex(7)));
    }

    #[test]
    fn test_challenging_utxo_pos_sums_fields() {
        let mut tx = sample();
        tx.inputs[0] = TxInput { block_number: 1_000_000_001, tx_index: 0, output_index: 0 };
        let bytes = tx.encode();

        assert_eq!(challenging_utxo_pos(&bytes, 0).unwrap(), UtxoPos(1_000_000_001));
        assert_eq!(challenging_utxo_pos(&bytes, 1).unwrap(), UtxoPos(3));
    }

    #[test]
    fn test_wrong_field_count() {
        let mut payload = Vec::new();
        for _ in 0..10 {
            0u64.encode(&mut payload);
        }
        let mut bytes = Vec::new();
        Header { list: true, payload_length: payload.len() }.encode(&mut bytes);
        bytes.extend_from_slice(&payload);

        assert_eq!(PlasmaTransaction::decode(&bytes), Err(TxDecodeError::FieldCount(10)));
    }

    #[test]
    fn test_not_a_list() {
        let mut bytes = Vec::new();
        5u64.encode(&mut bytes);
        assert_eq!(PlasmaTransaction::decode(&bytes), Err(TxDecodeError::NotAList));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = sample().encode();
        bytes.push(0x80);
        assert_eq!(PlasmaTransaction::decode(&bytes), Err(TxDecodeError::TrailingBytes(1)));
    }

    #[test]
    fn test_bad_address_width() {
        let mut tx = Vec::new();
        let mut payload = Vec::new();
        for _ in 0..6 {
            0u64.encode(&mut payload);
        }
        (&[0u8; 19][..]).encode(&mut payload);
        for _ in 0..4 {
            0u64.encode(&mut payload);
        }
        Header { list: true, payload_length: payload.len() }.encode(&mut tx);
        tx.extend_from_slice(&payload);

        assert_eq!(
            PlasmaTransaction::decode(&tx),
            Err(TxDecodeError::BadAddress { index: 6, len: 19 })
        );
    }

    #[test]
    fn test_garbage_is_an_error_not_a_panic() {
        assert!(PlasmaTransaction::decode(&[]).is_err());
        assert!(PlasmaTransaction::decode(&[0xf8]).is_err());
        assert!(PlasmaTransaction::decode(&[0xc3, 0x01]).is_err());
    }
}
