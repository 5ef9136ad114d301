//! # Algorithms
//!
//! Encoding, signing, verification, state transfer, fund selection and
//! transaction construction.

pub mod builder;
pub mod codec;
pub mod fund_selector;
pub mod signing;
pub mod state_transfer;
pub mod verify;

pub use builder::{new_export_tx, new_import_tx, ExportRequest};
pub use codec::{decode_tx, encode_tx, encode_unsigned, seal_tx};
pub use fund_selector::{select_spendable_funds, SelectedFunds};
pub use signing::{address_of, recover_address, short_id_of, sign_hash, sign_tx, signing_hash};
pub use state_transfer::{apply_state_transfer, atomic_requests, native_balance_atomic};
pub use verify::{semantic_verify, syntactic_verify};
