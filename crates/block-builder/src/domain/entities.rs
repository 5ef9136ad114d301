//! Domain entities for block production
//!
//! The execution engine's block is opaque to consensus; this layer only needs
//! its header, its transactions and the extra-data field that carries an
//! atomic transaction.

use crate::error::{Result, VmError};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use shared_types::{Address, Hash, U256};

/// Coinbase every non-genesis block must use; fees paid to it are burned.
pub const BURN_ADDRESS: Address = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

/// Length of the random tag appended to each locally built header.
pub const HEADER_TAG_LEN: usize = 32;

/// Block header
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthHeader {
    /// Parent block hash
    pub parent_hash: Hash,
    /// Block number
    pub number: u64,
    /// Unix timestamp (seconds)
    pub timestamp: u64,
    /// Fee recipient
    pub coinbase: Address,
    /// Free-form header bytes; locally built blocks carry a random tag here
    pub extra: Vec<u8>,
}

/// A plain value transfer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthTransaction {
    /// Sender nonce
    pub nonce: u64,
    /// Sender
    pub from: Address,
    /// Recipient
    pub to: Address,
    /// Amount (18-decimal units)
    pub value: U256,
}

impl EthTransaction {
    /// Transaction hash
    pub fn hash(&self) -> Hash {
        let mut value = [0u8; 32];
        self.value.to_big_endian(&mut value);
        let mut hasher = Keccak256::new();
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(self.from);
        hasher.update(self.to);
        hasher.update(value);
        hasher.finalize().into()
    }
}

/// Execution engine block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthBlock {
    /// Header
    pub header: EthHeader,
    /// Ordinary transactions
    pub transactions: Vec<EthTransaction>,
    /// Encoded atomic transaction, or empty
    pub ext_data: Vec<u8>,
}

impl EthBlock {
    /// Content hash over header, transactions and extra data
    pub fn hash(&self) -> Hash {
        let header = &self.header;
        let mut hasher = Keccak256::new();
        hasher.update(header.parent_hash);
        hasher.update(header.number.to_be_bytes());
        hasher.update(header.timestamp.to_be_bytes());
        hasher.update(header.coinbase);
        hasher.update((header.extra.len() as u64).to_be_bytes());
        hasher.update(&header.extra);
        hasher.update((self.transactions.len() as u64).to_be_bytes());
        for tx in &self.transactions {
            hasher.update(tx.hash());
        }
        hasher.update((self.ext_data.len() as u64).to_be_bytes());
        hasher.update(&self.ext_data);
        hasher.finalize().into()
    }

    /// Parent hash
    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }

    /// Block number
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Wire encoding
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| VmError::Codec(e.to_string()))
    }

    /// Parse the wire encoding
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| VmError::Codec(e.to_string()))
    }
}

/// Consensus status of a block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockStatus {
    /// Verified or built, not yet decided
    Processing,
    /// Accepted by consensus
    Accepted,
    /// Rejected by consensus
    Rejected,
}

impl BlockStatus {
    /// Accepted or rejected
    pub fn is_decided(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }
}

/// Message from this VM to the consensus engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsensusMessage {
    /// There is work pending; the engine should call `build_block`
    PendingTxs,
}

/// Execution engine notification that its pool has absorbed a mined block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MinedBlockEvent {
    /// Hash of the mined block
    pub hash: Hash,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> EthBlock {
        EthBlock {
            header: EthHeader {
                parent_hash: [1; 32],
                number: 7,
                timestamp: 1_700_000_000,
                coinbase: BURN_ADDRESS,
                extra: vec![9; HEADER_TAG_LEN],
            },
            transactions: vec![EthTransaction {
                nonce: 0,
                from: [2; 20],
                to: [3; 20],
                value: U256::from(5),
            }],
            ext_data: vec![],
        }
    }

    #[test]
    fn test_hash_covers_header_tag() {
        let a = block();
        let mut b = block();
        b.header.extra[0] = 8;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_covers_ext_data() {
        let a = block();
        let mut b = block();
        b.ext_data = vec![0, 0, 1];
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_decode_preserves_hash() {
        let a = block();
        let decoded = EthBlock::decode(&a.encode().unwrap()).unwrap();
        assert_eq!(decoded.hash(), a.hash());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(EthBlock::decode(&[0xff; 3]), Err(VmError::Codec(_))));
    }

    #[test]
    fn test_status_decided() {
        assert!(!BlockStatus::Processing.is_decided());
        assert!(BlockStatus::Rejected.is_decided());
    }
}
