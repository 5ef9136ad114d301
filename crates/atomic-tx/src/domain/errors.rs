//! # Domain Errors
//!
//! Validation and economic errors for atomic transactions.

use shared_types::{Address, Id};
use thiserror::Error;

/// Result alias for atomic transaction operations.
pub type Result<T> = std::result::Result<T, AtomicTxError>;

/// Atomic transaction error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AtomicTxError {
    /// Import carries no inputs.
    #[error("tx has no imported inputs")]
    NoImportInputs,

    /// Export carries no outputs.
    #[error("tx has no export outputs")]
    NoExportOutputs,

    /// Export carries no EVM inputs.
    #[error("tx has no export inputs")]
    NoExportInputs,

    /// Inputs are not in canonical order or contain duplicates.
    #[error("inputs not sorted and unique")]
    InputsNotSortedUnique,

    /// Outputs are not in canonical order.
    #[error("tx outputs not sorted")]
    OutputsNotSorted,

    /// Credential count differs from input count.
    #[error("number of inputs does not match number of signatures")]
    SignatureInputsMismatch,

    /// A signature does not recover to the expected owner.
    #[error("signature doesn't match public key")]
    PublicKeySignatureMismatch,

    /// Signature bytes could not be parsed or recovered.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The consumed UTXO holds a different asset than the input claims.
    #[error("asset IDs in the input don't match the utxo")]
    AssetIdMismatch,

    /// Network identifier does not match this node.
    #[error("tx has wrong network ID: expected {expected}, got {actual}")]
    WrongNetworkId {
        /// Network this node runs on.
        expected: u32,
        /// Network named in the transaction.
        actual: u32,
    },

    /// Blockchain, source or destination chain is not the expected one.
    #[error("tx has wrong chain ID")]
    WrongChainId,

    /// Not enough funds to cover the requested amount.
    #[error("insufficient funds: need {need}, available {available}")]
    InsufficientFunds {
        /// Amount required.
        need: u64,
        /// Amount that could be covered.
        available: u64,
    },

    /// Export amount plus fee overflows.
    #[error("overflow when computing export amount + txFee")]
    OverflowExport,

    /// Import amounts overflow.
    #[error("overflow when computing imported amount")]
    OverflowImport,

    /// Account nonce does not match the input nonce.
    #[error("invalid nonce for {address:02x?}: expected {expected}, got {actual}")]
    InvalidNonce {
        /// Account whose nonce mismatched.
        address: Address,
        /// Nonce recorded in state.
        expected: u64,
        /// Nonce carried by the input.
        actual: u64,
    },

    /// A zero amount was supplied where a positive one is required.
    #[error("amount must be positive")]
    ZeroAmount,

    /// Output owners are malformed.
    #[error("invalid output owners: {0}")]
    InvalidOwners(String),

    /// Input amount differs from the amount locked in the UTXO.
    #[error("input amount {input} doesn't match utxo amount {utxo}")]
    UtxoAmountMismatch {
        /// Amount the input claims.
        input: u64,
        /// Amount held by the UTXO.
        utxo: u64,
    },

    /// The UTXO is still time-locked.
    #[error("utxo locked until {locktime}, now {now}")]
    UtxoLocked {
        /// Unlock time of the UTXO.
        locktime: u64,
        /// Time the spend was checked at.
        now: u64,
    },

    /// Number of signatures does not equal the owner threshold.
    #[error("wrong number of signatures: threshold {threshold}, got {got}")]
    ThresholdMismatch {
        /// Signatures the UTXO requires.
        threshold: u32,
        /// Signatures supplied.
        got: usize,
    },

    /// A referenced UTXO is not present in shared memory.
    #[error("utxo not found: {tx_id}:{output_index}")]
    UtxoNotFound {
        /// Transaction that produced the UTXO.
        tx_id: Id,
        /// Output index within that transaction.
        output_index: u32,
    },

    /// Encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Unknown codec version prefix.
    #[error("unknown codec version {0}")]
    UnknownCodecVersion(u16),

    /// Shared memory failure.
    #[error("shared memory error: {0}")]
    SharedMemory(String),
}

impl AtomicTxError {
    /// Economic errors reject the transaction before submission; the caller
    /// may correct the request and retry.
    pub fn is_economic(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds { .. } | Self::OverflowExport | Self::OverflowImport
        )
    }
}
