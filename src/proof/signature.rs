//! Signature Verification
//!
//! Recovers signer addresses from 65-byte `r ∥ s ∥ v` ECDSA signatures over
//! secp256k1 and validates the transaction/confirmation signature pairs that
//! gate `start_exit`.

use alloy_primitives::Address;
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, SecretKey, SECP256K1,
};

use crate::core::hash::{confirmation_hash, hash_bytes, Hash};

/// Length of a compact recoverable signature.
pub const SIGNATURE_LEN: usize = 65;

/// Recover the address that signed `hash`.
///
/// Returns `None` for anything that is not a well-formed, recoverable
/// signature. `None` is never equal to a real signer: callers compare
/// `Option<Address>` values and must not treat two failures as a match.
pub fn recover(hash: &Hash, signature: &[u8]) -> Option<Address> {
    if signature.len() != SIGNATURE_LEN {
        return None;
    }

    // Some signers emit 0/1 instead of 27/28.
    let mut v = signature[64];
    if v < 27 {
        v = v.wrapping_add(27);
    }
    if v != 27 && v != 28 {
        return None;
    }

    let recovery_id = RecoveryId::from_i32(i32::from(v - 27)).ok()?;
    let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id).ok()?;
    let message = Message::from_digest(hash.0);
    let public_key = SECP256K1.recover_ecdsa(&message, &recoverable).ok()?;

    Some(public_key_address(&public_key))
}

/// Derive the 20-byte address of a public key.
pub fn public_key_address(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    let digest = hash_bytes(&uncompressed[1..]);
    Address::from_slice(&digest[12..])
}

/// Both signers must be real and identical.
#[inline]
fn same_signer(a: Option<Address>, b: Option<Address>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

/// Fixed 65-byte slot of a concatenated signature blob.
#[inline]
fn slot(sigs: &[u8], index: usize) -> Option<&[u8]> {
    sigs.get(index * SIGNATURE_LEN..(index + 1) * SIGNATURE_LEN)
}

/// Validate the signature layout `[sig1, sig2, conf_sig1, conf_sig2]`.
///
/// For each spent input, the signer of `tx_hash` must equal the signer of
/// the confirmation hash `keccak(tx_hash ∥ root)`. The second pair is only
/// checked when `input_count` is non-zero (both inputs reference a real
/// block).
pub fn check_sigs(tx_hash: &Hash, root: &Hash, input_count: u128, sigs: &[u8]) -> bool {
    if sigs.len() % SIGNATURE_LEN != 0 {
        return false;
    }

    let confirmation = confirmation_hash(tx_hash, root);

    let first = match (slot(sigs, 0), slot(sigs, 2)) {
        (Some(sig), Some(conf)) => same_signer(recover(tx_hash, sig), recover(&confirmation, conf)),
        _ => false,
    };

    let second = if input_count > 0 {
        match (slot(sigs, 1), slot(sigs, 3)) {
            (Some(sig), Some(conf)) => same_signer(recover(tx_hash, sig), recover(&confirmation, conf)),
            _ => false,
        }
    } else {
        true
    };

    first && second
}

/// Sign `hash` and return the 65-byte `r ∥ s ∥ v` form with `v ∈ {27, 28}`.
pub fn sign(hash: &Hash, secret_key: &SecretKey) -> [u8; SIGNATURE_LEN] {
    let message = Message::from_digest(hash.0);
    let signature = SECP256K1.sign_ecdsa_recoverable(&message, secret_key);
    let (recovery_id, compact) = signature.serialize_compact();

    let mut out = [0u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&compact);
    out[64] = 27 + recovery_id.to_i32() as u8;
    out
}

/// Address controlled by `secret_key`.
pub fn secret_key_address(secret_key: &SecretKey) -> Address {
    public_key_address(&PublicKey::from_secret_key(SECP256K1, secret_key))
}
