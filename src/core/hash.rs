//! Keccak-256 Hashing
//!
//! Every commitment the root chain checks is built from Keccak-256:
//! - Merkle leaves and internal nodes
//! - Confirmation hashes binding a transaction to a block root
//! - Deposit commitments stored as pseudo-block roots
//! - Address derivation from recovered public keys

use alloy_primitives::{keccak256, Address, B256, U256};

/// Hash output type (256 bits / 32 bytes).
pub type Hash = B256;

/// Incremental Keccak-256 over concatenated byte slices.
///
/// Order of updates is significant: `a ∥ b` and `b ∥ a` hash differently.
#[derive(Default)]
pub struct ConcatHasher {
    buf: Vec<u8>,
}

impl ConcatHasher {
    /// Create an empty hasher.
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(96) }
    }

    /// Append raw bytes.
    #[inline]
    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Append an address left-padded to 32 bytes.
    #[inline]
    pub fn update_address(&mut self, address: &Address) -> &mut Self {
        self.buf.extend_from_slice(address.into_word().as_slice());
        self
    }

    /// Append a 256-bit integer as 32 big-endian bytes.
    #[inline]
    pub fn update_u256(&mut self, value: &U256) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes::<32>());
        self
    }

    /// Finalize and return the hash.
    pub fn finalize(&self) -> Hash {
        keccak256(&self.buf)
    }
}

/// Hash arbitrary bytes.
#[inline]
pub fn hash_bytes(data: &[u8]) -> Hash {
    keccak256(data)
}

/// Hash the concatenation of two 32-byte values.
#[inline]
pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_slice());
    buf[32..].copy_from_slice(right.as_slice());
    keccak256(buf)
}

/// Confirmation hash: binds a transaction hash to the block root it was
/// included under.
#[inline]
pub fn confirmation_hash(tx_hash: &Hash, root: &Hash) -> Hash {
    hash_pair(tx_hash, root)
}

/// Commitment stored as the root of a deposit pseudo-block.
///
/// `keccak256(pad32(owner) ∥ pad32(token) ∥ be32(amount))`
pub fn deposit_commitment(owner: &Address, token: &Address, amount: &U256) -> Hash {
    ConcatHasher::new()
        .update_address(owner)
        .update_address(token)
        .update_u256(amount)
        .finalize()
}
