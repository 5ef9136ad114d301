//! Binary encoding of atomic transactions.
//!
//! Every encoding is a 2-byte big-endian codec version followed by the
//! bincode body. The transaction id is the sha256 of the signed encoding.

use crate::domain::{AtomicTxError, Credential, Result, Tx, UnsignedAtomicTx, CODEC_VERSION};
use serde::Serialize;
use shared_types::{sha256, Id};

const VERSION_LEN: usize = 2;

fn encode_versioned<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let body = bincode::serialize(value).map_err(|e| AtomicTxError::Codec(e.to_string()))?;
    let mut bytes = Vec::with_capacity(VERSION_LEN + body.len());
    bytes.extend_from_slice(&CODEC_VERSION.to_be_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Encode the unsigned body. Signatures cover the sha256 of these bytes.
pub fn encode_unsigned(unsigned: &UnsignedAtomicTx) -> Result<Vec<u8>> {
    encode_versioned(unsigned)
}

/// Assemble a signed transaction and derive its bytes and id.
pub fn seal_tx(unsigned: UnsignedAtomicTx, creds: Vec<Credential>) -> Result<Tx> {
    let mut tx = Tx {
        unsigned,
        creds,
        id: Id::EMPTY,
        bytes: Vec::new(),
    };
    tx.bytes = encode_versioned(&tx)?;
    tx.id = Id(sha256(&tx.bytes));
    Ok(tx)
}

/// Encode a signed transaction.
pub fn encode_tx(tx: &Tx) -> Result<Vec<u8>> {
    if !tx.bytes.is_empty() {
        return Ok(tx.bytes.clone());
    }
    encode_versioned(tx)
}

/// Decode a signed transaction, rejecting unknown versions and trailing bytes.
pub fn decode_tx(bytes: &[u8]) -> Result<Tx> {
    if bytes.len() < VERSION_LEN {
        return Err(AtomicTxError::Codec(format!(
            "need at least {} bytes, got {}",
            VERSION_LEN,
            bytes.len()
        )));
    }
    let version = u16::from_be_bytes([bytes[0], bytes[1]]);
    if version != CODEC_VERSION {
        return Err(AtomicTxError::UnknownCodecVersion(version));
    }

    let mut tx: Tx = bincode::deserialize(&bytes[VERSION_LEN..])
        .map_err(|e| AtomicTxError::Codec(e.to_string()))?;

    // Re-encode so the id always derives from canonical bytes
    let canonical = encode_versioned(&tx)?;
    if canonical != bytes {
        return Err(AtomicTxError::Codec("non-canonical encoding".into()));
    }
    tx.id = Id(sha256(&canonical));
    tx.bytes = canonical;
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EvmInput, RecoverableSignature, UnsignedExportTx};

    fn sample() -> Tx {
        let unsigned = UnsignedAtomicTx::Export(UnsignedExportTx {
            network_id: 5,
            blockchain_id: Id([1; 32]),
            destination_chain: Id([2; 32]),
            ins: vec![EvmInput {
                address: [3; 20],
                amount: 42,
                asset_id: Id([4; 32]),
                nonce: 0,
            }],
            exported_outputs: vec![],
        });
        let creds = vec![Credential {
            sigs: vec![RecoverableSignature {
                r: [5; 32],
                s: [6; 32],
                v: 1,
            }],
        }];
        seal_tx(unsigned, creds).unwrap()
    }

    #[test]
    fn test_decode_restores_id_and_bytes() {
        let tx = sample();
        let decoded = decode_tx(tx.bytes()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.id(), tx.id());
        assert_eq!(decoded.bytes(), tx.bytes());
    }

    #[test]
    fn test_version_prefix() {
        let tx = sample();
        assert_eq!(&tx.bytes()[..2], &CODEC_VERSION.to_be_bytes());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = sample().bytes().to_vec();
        bytes[1] = 7;
        assert_eq!(decode_tx(&bytes), Err(AtomicTxError::UnknownCodecVersion(7)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample().bytes().to_vec();
        bytes.push(0);
        assert!(decode_tx(&bytes).is_err());
    }

    #[test]
    fn test_short_input_rejected() {
        assert!(matches!(decode_tx(&[0]), Err(AtomicTxError::Codec(_))));
    }

    #[test]
    fn test_id_changes_with_signature() {
        let a = sample();
        let mut creds = a.creds.clone();
        creds[0].sigs[0].v = 0;
        let b = seal_tx(a.unsigned.clone(), creds).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
