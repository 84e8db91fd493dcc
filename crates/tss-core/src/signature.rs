//! Conversion of cluster DER signatures into chain-verifiable signatures
//!
//! The cluster returns a plain ASN.1 `(r, s)` pair. Chains expect a low-S
//! signature plus the recovery id that selects the signer's public key, and
//! DER carries no hint about that id, so both candidates are tried against
//! the address the wallet record says signed.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Keccak};
use tracing::debug;

use crate::{Error, Result};

/// Length of the digest the cluster signs
pub const HASH_LEN: usize = 32;

/// Low-S `(r, s)` signature with the recovery id that reproduces the signer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalSignature {
    /// R component, big-endian
    pub r: [u8; 32],
    /// S component, big-endian, at most half the curve order
    pub s: [u8; 32],
    /// Recovery ID (0 or 1)
    pub recovery_id: u8,
}

impl CanonicalSignature {
    /// `r || s || recovery_id`
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut bytes = [0u8; 65];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes[64] = self.recovery_id;
        bytes
    }

    /// Transaction `v` value: EIP-155 when a chain id is given, legacy otherwise.
    ///
    /// `None` when the chain id is too large for `35 + 2 * chain_id` to fit in a `u64`.
    pub fn v(&self, chain_id: Option<u64>) -> Option<u64> {
        let recovery_id = u64::from(self.recovery_id);
        match chain_id {
            Some(id) => id
                .checked_mul(2)
                .and_then(|v| v.checked_add(35 + recovery_id)),
            None => Some(27 + recovery_id),
        }
    }

    /// Address of the key that produced this signature over `message_hash`
    pub fn recover_address(&self, message_hash: &[u8]) -> Result<String> {
        let mut body = [0u8; 64];
        body[..32].copy_from_slice(&self.r);
        body[32..].copy_from_slice(&self.s);

        let signature =
            Signature::from_slice(&body).map_err(|e| Error::Malformed(e.to_string()))?;
        let recovery_id = RecoveryId::from_byte(self.recovery_id)
            .ok_or_else(|| Error::Malformed(format!("recovery id {}", self.recovery_id)))?;

        let key = VerifyingKey::recover_from_prehash(message_hash, &signature, recovery_id)
            .map_err(|_| Error::RecoveryFailed {
                expected: "a recoverable key".into(),
            })?;
        Ok(address_from_key(&key))
    }
}

/// `0x`-prefixed lowercase address: last 20 bytes of Keccak-256 over the
/// uncompressed public key without its SEC1 tag
pub fn address_from_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);

    let mut hasher = Keccak::v256();
    hasher.update(&point.as_bytes()[1..]);
    let mut digest = [0u8; 32];
    hasher.finalize(&mut digest);

    format!("0x{}", hex::encode(&digest[12..]))
}

/// Convert a DER signature into a canonical one signed by `expected_address`
///
/// Steps, in order:
/// 1. parse the ASN.1 `(r, s)` pair
/// 2. replace `s` with `n - s` when `s > n/2`
/// 3. left-pad `r` and `s` to 32 bytes each
/// 4. recover with id 0, then id 1, comparing addresses case-insensitively
pub fn to_canonical_signature(
    der: &[u8],
    message_hash: &[u8],
    expected_address: &str,
) -> Result<CanonicalSignature> {
    if message_hash.len() != HASH_LEN {
        return Err(Error::Malformed(format!(
            "message hash must be {} bytes, got {}",
            HASH_LEN,
            message_hash.len()
        )));
    }

    let signature = Signature::from_der(der).map_err(|e| Error::Malformed(e.to_string()))?;
    let signature = signature.normalize_s().unwrap_or(signature);

    // Fixed-width scalars, already left-padded
    let body = signature.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&body[..32]);
    s.copy_from_slice(&body[32..]);

    for id in 0u8..2 {
        let Some(recovery_id) = RecoveryId::from_byte(id) else {
            continue;
        };
        let key = match VerifyingKey::recover_from_prehash(message_hash, &signature, recovery_id)
        {
            Ok(key) => key,
            Err(_) => continue,
        };

        let address = address_from_key(&key);
        if address.eq_ignore_ascii_case(expected_address) {
            debug!(recovery_id = id, "Recovered signer");
            return Ok(CanonicalSignature {
                r,
                s,
                recovery_id: id,
            });
        }
    }

    Err(Error::RecoveryFailed {
        expected: expected_address.to_string(),
    })
}
