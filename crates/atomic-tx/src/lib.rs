//! # Atomic Transactions
//!
//! Cross-chain value transfer between the EVM chain and its peer chain
//! through shared memory.
//!
//! **Architecture:** Hexagonal (domain / algorithms / ports / adapters)
//!
//! ## Purpose
//!
//! - **Import**: consume UTXOs the peer chain placed in shared memory and
//!   credit EVM accounts.
//! - **Export**: debit EVM accounts and produce UTXOs for the peer chain.
//!
//! ## Invariants
//!
//! | Rule | Enforced by |
//! |------|-------------|
//! | Inputs sorted and unique | `syntactic_verify` |
//! | Outputs sorted | `syntactic_verify` |
//! | One credential per input | `semantic_verify` |
//! | Inputs cover outputs plus fee | `syntactic_verify` |
//! | Export nonce matches account nonce | `apply_state_transfer` |
//!
//! ## Module Structure
//!
//! ```text
//! atomic-tx/
//! ├── domain/      # Tx model, errors, ordering invariants, constants
//! ├── algorithms/  # codec, signing, verify, state transfer, fund selector, builders
//! ├── ports/       # StateDb, SharedMemory
//! └── adapters/    # MemoryState, MemorySharedMemory
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod domain;
pub mod ports;

// Re-exports
pub use adapters::{MemorySharedMemory, MemoryState};
pub use algorithms::{
    address_of, apply_state_transfer, atomic_requests, decode_tx, encode_tx, new_export_tx,
    new_import_tx, select_spendable_funds, semantic_verify, short_id_of, sign_tx,
    syntactic_verify, ExportRequest, SelectedFunds,
};
pub use domain::{
    AtomicContext, AtomicTxError, Credential, EvmInput, EvmOutput, RecoverableSignature, Result,
    TransferInput, TransferOutput, TransferableInput, TransferableOutput, Tx, UnsignedAtomicTx,
    UnsignedExportTx, UnsignedImportTx, Utxo, UtxoId, CODEC_VERSION, DEFAULT_TX_FEE, X2C_RATE,
};
pub use k256::ecdsa::SigningKey;
pub use ports::{AtomicRequests, SharedMemory, StateDb, UtxoCursor, UtxoPage};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    #[allow(clippy::const_is_empty)]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
