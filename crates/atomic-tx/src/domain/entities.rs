//! # Domain Entities
//!
//! The atomic transaction and the records it consumes and produces.
//!
//! An import consumes UTXOs that the peer chain placed in shared memory and
//! credits EVM accounts. An export debits EVM accounts and produces UTXOs for
//! the peer chain.

use serde::{Deserialize, Serialize};
use shared_types::{Address, Id, ShortId};

/// Reference to an output of a transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoId {
    /// Transaction that produced the output.
    pub tx_id: Id,
    /// Index of the output within that transaction.
    pub output_index: u32,
}

/// Spend of a UTXO's amount, authorised by the owners at `sig_indices`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInput {
    /// Amount consumed.
    pub amount: u64,
    /// Indices into the UTXO's owner list, one per signature.
    pub sig_indices: Vec<u32>,
}

/// An input spending a UTXO from shared memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferableInput {
    /// The UTXO being spent.
    pub utxo_id: UtxoId,
    /// Asset the input claims the UTXO holds.
    pub asset_id: Id,
    /// Amount and authorisation.
    pub input: TransferInput,
}

/// Ownership and amount of a produced UTXO.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferOutput {
    /// Amount locked in the output.
    pub amount: u64,
    /// Unix time before which the output cannot be spent.
    pub locktime: u64,
    /// Number of owner signatures required.
    pub threshold: u32,
    /// Owners, sorted and unique.
    pub addrs: Vec<ShortId>,
}

/// An output exported to the peer chain.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferableOutput {
    /// Asset held by the output.
    pub asset_id: Id,
    /// Amount and owners.
    pub out: TransferOutput,
}

/// An unspent output held in shared memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Identifier of the output.
    pub utxo_id: UtxoId,
    /// Asset held.
    pub asset_id: Id,
    /// Amount and owners.
    pub out: TransferOutput,
}

/// Credit to an EVM account produced by an import.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmOutput {
    /// Account credited.
    pub address: Address,
    /// Amount in atomic units.
    pub amount: u64,
    /// Asset credited.
    pub asset_id: Id,
}

impl EvmOutput {
    /// Canonical ordering key.
    pub fn sort_key(&self) -> (Address, Id) {
        (self.address, self.asset_id)
    }
}

/// Debit from an EVM account consumed by an export.
///
/// Records the account nonce at selection time; applying the export requires
/// the nonce to still match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmInput {
    /// Account debited.
    pub address: Address,
    /// Amount in atomic units.
    pub amount: u64,
    /// Asset debited.
    pub asset_id: Id,
    /// Account nonce at selection time.
    pub nonce: u64,
}

impl EvmInput {
    /// Canonical ordering key.
    pub fn sort_key(&self) -> (Address, Id) {
        (self.address, self.asset_id)
    }
}

/// A secp256k1 recoverable signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverableSignature {
    /// R component.
    pub r: [u8; 32],
    /// S component.
    pub s: [u8; 32],
    /// Recovery id (0 or 1).
    pub v: u8,
}

/// Signatures authorising one input.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// One signature per required owner.
    pub sigs: Vec<RecoverableSignature>,
}

/// Import of UTXOs from the peer chain into EVM accounts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedImportTx {
    /// Network this transaction is valid on.
    pub network_id: u32,
    /// Chain this transaction executes on.
    pub blockchain_id: Id,
    /// Chain the consumed UTXOs come from.
    pub source_chain: Id,
    /// UTXOs consumed, sorted and unique.
    pub imported_inputs: Vec<TransferableInput>,
    /// EVM credits, sorted.
    pub outs: Vec<EvmOutput>,
}

/// Export of EVM balances into UTXOs on the peer chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedExportTx {
    /// Network this transaction is valid on.
    pub network_id: u32,
    /// Chain this transaction executes on.
    pub blockchain_id: Id,
    /// Chain receiving the produced UTXOs.
    pub destination_chain: Id,
    /// EVM debits, sorted and unique.
    pub ins: Vec<EvmInput>,
    /// UTXOs produced, sorted.
    pub exported_outputs: Vec<TransferableOutput>,
}

/// The unsigned body of an atomic transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnsignedAtomicTx {
    /// Peer chain to EVM.
    Import(UnsignedImportTx),
    /// EVM to peer chain.
    Export(UnsignedExportTx),
}

impl UnsignedAtomicTx {
    /// Number of inputs that each need a credential.
    pub fn input_count(&self) -> usize {
        match self {
            Self::Import(tx) => tx.imported_inputs.len(),
            Self::Export(tx) => tx.ins.len(),
        }
    }

    /// Peer-chain UTXOs this transaction consumes; empty for exports.
    pub fn input_utxos(&self) -> Vec<UtxoId> {
        match self {
            Self::Import(tx) => tx.imported_inputs.iter().map(|i| i.utxo_id).collect(),
            Self::Export(_) => Vec::new(),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Import(_) => "import",
            Self::Export(_) => "export",
        }
    }
}

/// A signed atomic transaction.
///
/// Never mutated after signing or decoding; `id` and `bytes` are derived
/// from the signed encoding at that point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tx {
    /// Transfer payload.
    pub unsigned: UnsignedAtomicTx,
    /// One credential per input, in input order.
    pub creds: Vec<Credential>,
    #[serde(skip)]
    pub(crate) id: Id,
    #[serde(skip)]
    pub(crate) bytes: Vec<u8>,
}

impl Tx {
    /// Identifier: sha256 of the signed encoding.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Signed encoding.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl PartialEq for Tx {
    fn eq(&self, other: &Self) -> bool {
        self.unsigned == other.unsigned && self.creds == other.creds
    }
}

impl Eq for Tx {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utxo_id_ordering() {
        let a = UtxoId {
            tx_id: Id([1; 32]),
            output_index: 5,
        };
        let b = UtxoId {
            tx_id: Id([1; 32]),
            output_index: 6,
        };
        let c = UtxoId {
            tx_id: Id([2; 32]),
            output_index: 0,
        };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_input_count() {
        let export = UnsignedAtomicTx::Export(UnsignedExportTx {
            network_id: 1,
            blockchain_id: Id::EMPTY,
            destination_chain: Id::EMPTY,
            ins: vec![EvmInput {
                address: [1; 20],
                amount: 1,
                asset_id: Id::EMPTY,
                nonce: 0,
            }],
            exported_outputs: vec![],
        });
        assert_eq!(export.input_count(), 1);
        assert_eq!(export.kind(), "export");
        assert!(export.input_utxos().is_empty());
    }
}
