//! secp256k1 signing and address recovery for atomic transactions.

use super::codec::{encode_unsigned, seal_tx};
use crate::domain::{AtomicTxError, Credential, RecoverableSignature, Result, Tx, UnsignedAtomicTx};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use shared_types::{keccak256, sha256, Address, Hash, ShortId};

/// Account address of a public key: last 20 bytes of keccak256 over the
/// uncompressed point without its `0x04` prefix.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// Owner identifier of a signing key, as it appears in UTXO owner lists.
pub fn short_id_of(key: &SigningKey) -> ShortId {
    ShortId::from(address_of(key.verifying_key()))
}

/// Sign a 32-byte digest.
pub fn sign_hash(hash: &Hash, key: &SigningKey) -> Result<RecoverableSignature> {
    let (sig, recid) = key
        .sign_prehash_recoverable(hash)
        .map_err(|e| AtomicTxError::InvalidSignature(e.to_string()))?;
    let bytes = sig.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);
    Ok(RecoverableSignature {
        r,
        s,
        v: recid.to_byte(),
    })
}

/// Recover the signer's address from a signature over `hash`.
pub fn recover_address(hash: &Hash, sig: &RecoverableSignature) -> Result<Address> {
    let recid = RecoveryId::from_byte(sig.v)
        .ok_or_else(|| AtomicTxError::InvalidSignature(format!("recovery id {}", sig.v)))?;
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&sig.r);
    bytes[32..].copy_from_slice(&sig.s);
    let sig = Signature::from_slice(&bytes)
        .map_err(|e| AtomicTxError::InvalidSignature(e.to_string()))?;
    let key = VerifyingKey::recover_from_prehash(hash, &sig, recid)
        .map_err(|e| AtomicTxError::InvalidSignature(e.to_string()))?;
    Ok(address_of(&key))
}

/// Digest that credentials sign: sha256 of the unsigned encoding.
pub fn signing_hash(unsigned: &UnsignedAtomicTx) -> Result<Hash> {
    Ok(sha256(&encode_unsigned(unsigned)?))
}

/// Sign `unsigned` with one group of keys per input, in input order.
pub fn sign_tx(unsigned: UnsignedAtomicTx, signers: &[Vec<SigningKey>]) -> Result<Tx> {
    if signers.len() != unsigned.input_count() {
        return Err(AtomicTxError::SignatureInputsMismatch);
    }
    let hash = signing_hash(&unsigned)?;
    let creds = signers
        .iter()
        .map(|keys| {
            let sigs = keys
                .iter()
                .map(|key| sign_hash(&hash, key))
                .collect::<Result<Vec<_>>>()?;
            Ok(Credential { sigs })
        })
        .collect::<Result<Vec<_>>>()?;
    seal_tx(unsigned, creds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_slice(&[seed; 32]).unwrap()
    }

    #[test]
    fn test_recover_matches_signer() {
        let key = key(7);
        let hash = sha256(b"atomic");
        let sig = sign_hash(&hash, &key).unwrap();
        assert_eq!(
            recover_address(&hash, &sig).unwrap(),
            address_of(key.verifying_key())
        );
    }

    #[test]
    fn test_recover_other_hash_gives_other_address() {
        let key = key(7);
        let sig = sign_hash(&sha256(b"a"), &key).unwrap();
        let recovered = recover_address(&sha256(b"b"), &sig).unwrap();
        assert_ne!(recovered, address_of(key.verifying_key()));
    }

    #[test]
    fn test_bad_recovery_id() {
        let sig = RecoverableSignature {
            r: [1; 32],
            s: [1; 32],
            v: 9,
        };
        assert!(matches!(
            recover_address(&[0; 32], &sig),
            Err(AtomicTxError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_random_key_address_is_stable() {
        let key = SigningKey::random(&mut rand::thread_rng());
        assert_eq!(address_of(key.verifying_key()), short_id_of(&key).0);
    }
}
