//! Error types for the chain VM

use atomic_tx::{AtomicTxError, UtxoId};
use shared_types::Id;
use thiserror::Error;

/// Result type alias for chain VM operations
pub type Result<T> = std::result::Result<T, VmError>;

/// Errors that can occur while building, parsing and accepting blocks
#[derive(Debug, Clone, Error)]
pub enum VmError {
    /// Atomic transaction queue is full
    #[error("too many pending atomic txs")]
    TooManyPendingAtomicTxs,

    /// An atomic tx spends a UTXO already spent by a queued tx or an
    /// undecided ancestor block
    #[error("conflicting atomic inputs: utxo {tx_id}:{output_index} already spent")]
    ConflictingAtomicInputs {
        /// Transaction that produced the UTXO
        tx_id: Id,
        /// Output index within that transaction
        output_index: u32,
    },

    /// Block assembly found neither an atomic tx nor ordinary txs
    #[error("empty block")]
    EmptyBlock,

    /// Block assembly failed
    #[error("couldn't create block")]
    CreateBlock,

    /// Block is not known to the execution engine
    #[error("unknown block")]
    UnknownBlock,

    /// Build notification channel to consensus is full
    #[error("too frequent block issuance")]
    BlockFrequency,

    /// Block failed verification
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// VM used before `initialize`
    #[error("vm not initialized")]
    NotInitialized,

    /// `initialize` called twice
    #[error("vm already initialized")]
    AlreadyInitialized,

    /// Genesis bytes could not be parsed
    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),

    /// VM configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Execution engine failure
    #[error("execution engine error: {0}")]
    Engine(String),

    /// Key-value store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Block encoding or decoding failed
    #[error("codec error: {0}")]
    Codec(String),

    /// The VM is shutting down
    #[error("vm is shutting down")]
    Shutdown,

    /// Atomic transaction validation or economic error
    #[error(transparent)]
    Atomic(#[from] AtomicTxError),
}

impl VmError {
    pub(crate) fn conflicting_input(utxo: UtxoId) -> Self {
        Self::ConflictingAtomicInputs {
            tx_id: utxo.tx_id,
            output_index: utxo.output_index,
        }
    }

    /// Check if error is recoverable (caller should retry later)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TooManyPendingAtomicTxs | Self::BlockFrequency | Self::EmptyBlock | Self::CreateBlock
        )
    }

    /// Check if error is critical (initialization must abort)
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::InvalidGenesis(_) | Self::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recoverability() {
        assert!(VmError::TooManyPendingAtomicTxs.is_recoverable());
        assert!(VmError::BlockFrequency.is_recoverable());
        assert!(!VmError::InvalidGenesis("bad".into()).is_recoverable());
        let conflict = VmError::ConflictingAtomicInputs {
            tx_id: Id([7; 32]),
            output_index: 0,
        };
        assert!(!conflict.is_recoverable());
        assert!(!conflict.is_critical());
    }

    #[test]
    fn test_error_criticality() {
        assert!(VmError::InvalidConfig("zero batch".into()).is_critical());
        assert!(!VmError::EmptyBlock.is_critical());
    }

    #[test]
    fn test_atomic_errors_pass_through() {
        let err: VmError = AtomicTxError::OutputsNotSorted.into();
        assert_eq!(err.to_string(), "tx outputs not sorted");
    }
}
